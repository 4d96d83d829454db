//! `gather`: browse, create and RSVP to community events from the terminal.
//!
//! Each subcommand stands in for one page of the application. Credentials
//! come from `GATHER_EMAIL` / `GATHER_PASSWORD` (a `.env` file is read
//! first); `--demo` runs against a seeded in-memory backend.

mod render;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use gather::demo::{self, DEMO_ORGANIZER, DEMO_PASSWORD};
use gather::event_detail::EventDetailAction;
use gather::event_list::EventListAction;
use gather::types::wire_time;
use gather::{
    CommentsView, Config, CreateEventView, EventDetailView, EventDraft, EventListView, NoticeBoard,
    ProfileUpdate, RsvpStatus, RsvpView, SearchFilters, SignUpDetails, SortBy, SyncEnvironment,
    TerminalNotifier, UserRole,
};
use gather_core::environment::{Clock, SystemClock};
use gather_supabase::SupabaseClient;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LIVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "gather")]
#[command(version, about = "Browse, create and RSVP to community events")]
struct Cli {
    /// Use a seeded in-memory backend instead of Supabase
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Welcome page with the next few events
    Home,
    /// Browse and create events
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Show or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Create an account and sign in as it
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: String,
        /// organizer or participant
        #[arg(long, default_value = "participant")]
        role: UserRole,
    },
    /// Answer an event invitation
    Rsvp {
        event_id: String,
        /// attending, maybe or not_attending
        #[arg(long, default_value = "attending")]
        status: RsvpStatus,
    },
    /// Withdraw your answer to an event
    Unrsvp { event_id: String },
    /// Comment on events
    Comment {
        #[command(subcommand)]
        command: CommentCommand,
    },
}

#[derive(Subcommand, Debug)]
enum EventsCommand {
    /// List events matching the filters
    List(FilterArgs),
    /// List events and keep the list up to date until Ctrl-C
    Watch(FilterArgs),
    /// Show one event with its RSVPs and comments
    Show {
        id: String,
        /// Keep the page up to date until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Create an event
    Create(CreateArgs),
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Text to look for in title and description
    #[arg(short, long)]
    query: Option<String>,
    #[arg(short, long)]
    category: Option<String>,
    /// Earliest date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(short, long)]
    location: Option<String>,
    /// date, popularity or created_at
    #[arg(long, default_value = "date")]
    sort: SortBy,
}

impl From<FilterArgs> for SearchFilters {
    fn from(args: FilterArgs) -> Self {
        SearchFilters {
            query: args.query,
            category: args.category,
            date: args.from,
            location: args.location,
            sort_by: args.sort,
        }
    }
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    /// YYYY-MM-DD
    #[arg(long)]
    date: NaiveDate,
    /// HH:MM
    #[arg(long, value_parser = parse_time)]
    time: NaiveTime,
    #[arg(long)]
    location: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    max_attendees: Option<i64>,
    #[arg(long)]
    image_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// Show the signed-in user's profile
    Show,
    /// Change profile fields; unspecified fields keep their value
    Update {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        /// Comma-separated
        #[arg(long)]
        skills: Option<String>,
        /// Comma-separated
        #[arg(long)]
        interests: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CommentCommand {
    /// Post a comment
    Add { event_id: String, content: String },
    /// Delete a comment
    Delete { comment_id: String },
}

fn parse_time(text: &str) -> Result<NaiveTime, String> {
    wire_time::parse(text).map_err(|e| format!("expected HH:MM ({e})"))
}

fn list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.as_str().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn connect(demo_mode: bool, config: &Config) -> Result<SyncEnvironment> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notices = NoticeBoard::with_sink(clock.clone(), config.notices, Arc::new(TerminalNotifier));

    if demo_mode {
        let backend = demo::seeded_backend(clock.today())?;
        let env = SyncEnvironment::start(Arc::new(backend.client()), notices, clock).await?;
        let (email, password) = config.credentials.as_ref().map_or(
            (DEMO_ORGANIZER, DEMO_PASSWORD),
            |c| (c.email.as_str(), c.password.as_str()),
        );
        env.session
            .sign_in(email, password)
            .await
            .with_context(|| format!("Demo sign-in as {email} failed"))?;
        return Ok(env);
    }

    let client = SupabaseClient::new(config.supabase()?).context("Invalid Supabase settings")?;
    let env = SyncEnvironment::start(Arc::new(client), notices, clock).await?;
    if let Some(credentials) = &config.credentials {
        env.session
            .sign_in(&credentials.email, &credentials.password)
            .await
            .with_context(|| format!("Sign-in as {} failed", credentials.email))?;
    }
    Ok(env)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    let env = connect(cli.demo, &config).await?;
    if let Some(user) = env.session.current_user() {
        tracing::info!(user_id = %user.id, "Signed in as {}", user.display_name());
    }

    match cli.command {
        Commands::Home => home(&env).await,
        Commands::Events { command } => match command {
            EventsCommand::List(filters) => list_events(&env, filters.into()).await,
            EventsCommand::Watch(filters) => watch_events(&env, filters.into()).await,
            EventsCommand::Show { id, watch } => show_event(&env, &id, watch).await,
            EventsCommand::Create(args) => create_event(&env, args).await,
        },
        Commands::Profile { command } => profile(&env, command).await,
        Commands::Signup {
            email,
            password,
            full_name,
            role,
        } => {
            let user = env
                .session
                .sign_up(SignUpDetails {
                    email,
                    password,
                    full_name,
                    role,
                })
                .await?;
            print!("{}", render::profile(&user));
            Ok(ExitCode::SUCCESS)
        },
        Commands::Rsvp { event_id, status } => rsvp(&env, &event_id, status).await,
        Commands::Unrsvp { event_id } => outcome(RsvpView::new(env.clone()).remove_rsvp(event_id).await),
        Commands::Comment { command } => {
            let view = CommentsView::new(env.clone());
            match command {
                CommentCommand::Add { event_id, content } => {
                    outcome(view.add_comment(event_id, content).await)
                },
                CommentCommand::Delete { comment_id } => outcome(view.delete_comment(comment_id).await),
            }
        },
    }
}

/// Mutation failures were already shown as a notice
#[allow(clippy::unnecessary_wraps)]
fn outcome<T>(result: Result<T, gather::SyncError>) -> Result<ExitCode> {
    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

async fn home(env: &SyncEnvironment) -> Result<ExitCode> {
    println!("Discover amazing events in your community");
    println!("Connect with like-minded people, learn new skills, and create lasting memories.\n");

    match env.session.current_user() {
        Some(user) => println!("Welcome back, {}!\n", user.display_name()),
        None => println!("Sign in (GATHER_EMAIL / GATHER_PASSWORD) or run `gather signup` to join.\n"),
    }

    let view = EventListView::mount(env.clone(), SearchFilters::default()).await?;
    let events = view.events().await;
    println!("Upcoming events:");
    print!("{}", render::event_lines(&events[..events.len().min(3)]));
    Ok(ExitCode::SUCCESS)
}

async fn list_events(env: &SyncEnvironment, filters: SearchFilters) -> Result<ExitCode> {
    let view = EventListView::mount(env.clone(), filters).await?;
    let state = view.snapshot().await;
    if let Some(error) = state.error {
        bail!("Could not load events: {error}");
    }
    print!("{}", render::event_lines(&state.events));
    Ok(ExitCode::SUCCESS)
}

async fn watch_events(env: &SyncEnvironment, filters: SearchFilters) -> Result<ExitCode> {
    let view = EventListView::mount(env.clone(), filters).await?;
    let mut updates = view.updates();
    print!("{}", render::event_lines(&view.events().await));
    view.wait_live(LIVE_TIMEOUT).await?;
    eprintln!("Watching for changes, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(EventListAction::Pushed(_) | EventListAction::Loaded { .. })
                | Err(broadcast::error::RecvError::Lagged(_)) => {
                    println!();
                    print!("{}", render::event_lines(&view.events().await));
                },
                Ok(EventListAction::FeedFailed { error }) => bail!("Live updates stopped: {error}"),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    view.unmount().await?;
    Ok(ExitCode::SUCCESS)
}

/// Answer from the event's page, which knows whether the event is over
async fn rsvp(env: &SyncEnvironment, event_id: &str, status: RsvpStatus) -> Result<ExitCode> {
    let page = EventDetailView::open(env.clone(), event_id).await?;
    let state = page.snapshot().await;
    page.close().await?;
    let Some(event) = state.event else {
        bail!(state.error.unwrap_or_else(|| "Event not found".to_string()));
    };
    outcome(
        RsvpView::new(env.clone())
            .rsvp_to_event(event.id, event.date, status)
            .await,
    )
}

async fn show_event(env: &SyncEnvironment, id: &str, watch: bool) -> Result<ExitCode> {
    let view = EventDetailView::open(env.clone(), id).await?;
    let mut updates = view.updates();
    let state = view.snapshot().await;
    let Some(event) = state.event else {
        bail!(state.error.unwrap_or_else(|| "Event not found".to_string()));
    };
    print!("{}", render::event_page(&event));
    if !watch {
        return Ok(ExitCode::SUCCESS);
    }

    view.wait_live(LIVE_TIMEOUT).await?;
    eprintln!("Watching for changes, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(EventDetailAction::Loaded { result: Ok(event), .. }) => {
                    println!();
                    print!("{}", render::event_page(&event));
                },
                Ok(EventDetailAction::FeedFailed { error, .. }) => bail!("Live updates stopped: {error}"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    view.close().await?;
    Ok(ExitCode::SUCCESS)
}

async fn create_event(env: &SyncEnvironment, args: CreateArgs) -> Result<ExitCode> {
    let draft = EventDraft {
        title: args.title,
        description: args.description,
        date: Some(args.date),
        time: Some(args.time),
        location: args.location,
        category: args.category,
        max_attendees: args.max_attendees,
        image_url: args.image_url.unwrap_or_default(),
    };

    match CreateEventView::new(env.clone()).create_event(draft).await {
        Ok(event) => {
            print!("{}", render::event_page(&event));
            Ok(ExitCode::SUCCESS)
        },
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

async fn profile(env: &SyncEnvironment, command: ProfileCommand) -> Result<ExitCode> {
    let Some(user) = env.session.current_user() else {
        bail!("Not signed in. Set GATHER_EMAIL and GATHER_PASSWORD.");
    };

    match command {
        ProfileCommand::Show => {
            print!("{}", render::profile(&user));
            Ok(ExitCode::SUCCESS)
        },
        ProfileCommand::Update {
            full_name,
            bio,
            skills,
            interests,
            avatar_url,
        } => {
            let update = ProfileUpdate {
                full_name: full_name.or(user.full_name).unwrap_or_default(),
                bio: bio.or(user.bio).unwrap_or_default(),
                skills: skills.as_deref().map_or(user.skills, list),
                interests: interests.as_deref().map_or(user.interests, list),
                avatar_url,
            };
            match env.session.update_profile(update).await {
                Ok(user) => {
                    env.notices.success("Profile updated successfully!");
                    print!("{}", render::profile(&user));
                    Ok(ExitCode::SUCCESS)
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Profile update failed");
                    env.notices.error("Failed to update profile");
                    Ok(ExitCode::FAILURE)
                },
            }
        },
    }
}
