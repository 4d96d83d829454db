//! Integration tests for the shared session.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{MEMBER, PASSWORD, anonymous, e1_date, signed_in, world};
use gather::{ProfileUpdate, RsvpStatus, RsvpView, SignUpDetails, SyncError, UserRole};
use gather_core::remote::Table;

#[tokio::test]
async fn start_restores_the_signed_in_profile() {
    let world = world();
    let env = signed_in(&world.backend, MEMBER).await;

    let user = env.session.current_user().unwrap();
    assert_eq!(user.id, world.member_id);
    assert_eq!(user.full_name.as_deref(), Some("Pat"));
    assert_eq!(user.role, UserRole::Participant);
}

#[tokio::test]
async fn sign_in_publishes_to_every_view() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let mut watch = env.session.watch();
    let rsvps = RsvpView::new(env.clone());

    env.session.sign_in(MEMBER, PASSWORD).await.unwrap();

    assert!(watch.has_changed().unwrap());
    assert_eq!(
        watch.borrow_and_update().as_ref().map(|u| u.id.clone()),
        Some(world.member_id.clone())
    );
    // A view created before sign-in sees the new user
    rsvps.rsvp_to_event("e1", e1_date(), RsvpStatus::Attending).await.unwrap();
}

#[tokio::test]
async fn wrong_password_keeps_the_session_signed_out() {
    let world = world();
    let env = anonymous(&world.backend).await;

    let result = env.session.sign_in(MEMBER, "nope").await;

    assert_eq!(
        result,
        Err(SyncError::Remote("Invalid login credentials".to_string()))
    );
    assert_eq!(env.session.current_user(), None);
}

#[tokio::test]
async fn sign_up_creates_the_profile_with_its_role() {
    let world = world();
    let env = anonymous(&world.backend).await;

    let user = env
        .session
        .sign_up(SignUpDetails {
            email: "new@example.com".to_string(),
            password: "secret1".to_string(),
            full_name: " Noor ".to_string(),
            role: UserRole::Organizer,
        })
        .await
        .unwrap();

    assert_eq!(user.full_name.as_deref(), Some("Noor"));
    assert_eq!(user.role, UserRole::Organizer);
    assert!(world.backend.row(Table::Users, &user.id).is_some());
    assert_eq!(env.session.user_id(), Some(user.id));
}

#[tokio::test]
async fn sign_up_requires_a_name() {
    let world = world();
    let env = anonymous(&world.backend).await;

    let result = env
        .session
        .sign_up(SignUpDetails {
            email: "new@example.com".to_string(),
            password: "secret1".to_string(),
            full_name: "   ".to_string(),
            role: UserRole::Participant,
        })
        .await;

    assert_eq!(result, Err(SyncError::validation("Full name is required")));
}

#[tokio::test]
async fn sign_out_clears_the_user() {
    let world = world();
    let env = signed_in(&world.backend, MEMBER).await;

    env.session.sign_out().await.unwrap();

    assert_eq!(env.session.current_user(), None);
    let result = RsvpView::new(env).rsvp_to_event("e1", e1_date(), RsvpStatus::Maybe).await;
    assert!(matches!(result, Err(SyncError::Unauthenticated(_))));
}

#[tokio::test]
async fn profile_update_is_stored_and_published() {
    let world = world();
    let env = signed_in(&world.backend, MEMBER).await;

    let user = env
        .session
        .update_profile(ProfileUpdate {
            full_name: "Pat Q".to_string(),
            bio: "  ".to_string(),
            skills: vec!["rust".to_string()],
            interests: vec!["music".to_string(), "hiking".to_string()],
            avatar_url: None,
        })
        .await
        .unwrap();

    assert_eq!(user.full_name.as_deref(), Some("Pat Q"));
    assert_eq!(user.bio, None);
    assert_eq!(user.skills, ["rust"]);
    assert_eq!(env.session.current_user(), Some(user));
    let row = world.backend.row(Table::Users, &world.member_id).unwrap();
    assert_eq!(row["interests"].as_array().unwrap().len(), 2);
}
