//! The signed-in user, shared by every view.
//!
//! A [`Session`] is created once at start-up and handed to each view through
//! its environment. Views only read it; its own operations are the only
//! writers. Changes are published on a watch channel.

use crate::error::SyncError;
use crate::types::{ProfileUpdate, SignUpDetails, User};
use gather_core::auth::{AuthIdentity, AuthProvider, SignUpRequest};
use gather_core::environment::Clock;
use gather_core::remote::{DataClient, Filter, Query, RemoteError, Selection, Table};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;

struct SessionInner {
    auth: Arc<dyn AuthProvider>,
    client: Arc<dyn DataClient>,
    clock: Arc<dyn Clock>,
    user: watch::Sender<Option<User>>,
}

/// Auth context: current user plus sign-in, sign-up, sign-out and profile
/// updates
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session, restoring any account the provider is already
    /// signed in as
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the provider cannot be reached.
    pub async fn start(
        auth: Arc<dyn AuthProvider>,
        client: Arc<dyn DataClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        let session = Self::signed_out(auth, client, clock);

        if let Some(identity) = session.inner.auth.current().await? {
            let user = session.load_profile(&identity).await;
            tracing::info!(user_id = %user.id, "Restored session");
            session.publish(Some(user));
        }

        Ok(session)
    }

    /// A session nobody is signed in to, without asking the provider
    #[must_use]
    pub fn signed_out(
        auth: Arc<dyn AuthProvider>,
        client: Arc<dyn DataClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (user, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                auth,
                client,
                clock,
                user,
            }),
        }
    }

    /// The signed-in user, if any
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.inner.user.borrow().clone()
    }

    /// Id of the signed-in user, if any
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.inner.user.borrow().as_ref().map(|user| user.id.clone())
    }

    /// Watch the current user
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<User>> {
        self.inner.user.subscribe()
    }

    fn publish(&self, user: Option<User>) {
        self.inner.user.send_replace(user);
    }

    /// Profile row of `identity`, or a bare profile when the row is missing
    async fn load_profile(&self, identity: &AuthIdentity) -> User {
        let row = self
            .inner
            .client
            .select_single(Query::table(Table::Users).eq("id", identity.user_id.clone()))
            .await;

        match row.map(serde_json::from_value::<User>) {
            Ok(Ok(user)) => user,
            Ok(Err(e)) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "Malformed profile row");
                self.bare_profile(identity)
            },
            Err(RemoteError::NotFound(_)) => {
                tracing::warn!(user_id = %identity.user_id, "No profile row yet");
                self.bare_profile(identity)
            },
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "Profile load failed");
                self.bare_profile(identity)
            },
        }
    }

    fn bare_profile(&self, identity: &AuthIdentity) -> User {
        let now = self.inner.clock.now();
        User {
            id: identity.user_id.clone(),
            email: identity.email.clone(),
            full_name: None,
            avatar_url: None,
            bio: None,
            skills: Vec::new(),
            interests: Vec::new(),
            role: crate::types::UserRole::Participant,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sign in with email and password
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] with the provider's message (e.g.
    /// `Invalid login credentials`).
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SyncError> {
        let identity = self
            .inner
            .auth
            .sign_in(email.trim().to_string(), password.to_string())
            .await?;
        let user = self.load_profile(&identity).await;
        tracing::info!(user_id = %user.id, "Signed in");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    /// Create an account and sign in as it
    ///
    /// The profile row is created by the backend from the account metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for blank email or name, and
    /// [`SyncError::Remote`] when the provider refuses the account.
    pub async fn sign_up(&self, details: SignUpDetails) -> Result<User, SyncError> {
        if details.email.trim().is_empty() {
            return Err(SyncError::validation("Email is required"));
        }
        if details.full_name.trim().is_empty() {
            return Err(SyncError::validation("Full name is required"));
        }

        let identity = self
            .inner
            .auth
            .sign_up(SignUpRequest {
                email: details.email.trim().to_string(),
                password: details.password,
                metadata: json!({
                    "full_name": details.full_name.trim(),
                    "role": details.role.as_str(),
                }),
            })
            .await?;
        let user = self.load_profile(&identity).await;
        tracing::info!(user_id = %user.id, role = %user.role, "Signed up");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    /// End the session
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the provider fails; the local
    /// session is cleared regardless.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        let result = self.inner.auth.sign_out().await;
        self.publish(None);
        tracing::info!("Signed out");
        result.map_err(SyncError::from)
    }

    /// Patch the signed-in user's profile and publish the new row
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in
    /// - [`SyncError::Remote`]: the update was rejected or matched no row
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SyncError> {
        let Some(user_id) = self.user_id() else {
            return Err(SyncError::unauthenticated("Please sign in to update your profile"));
        };

        let text = |value: &str| {
            let value = value.trim();
            if value.is_empty() {
                Value::Null
            } else {
                json!(value)
            }
        };
        let mut patch = json!({
            "full_name": text(&update.full_name),
            "bio": text(&update.bio),
            "skills": update.skills,
            "interests": update.interests,
            "updated_at": self.inner.clock.now(),
        });
        if let Some(avatar_url) = update.avatar_url {
            patch["avatar_url"] = text(&avatar_url);
        }

        let mut rows = self
            .inner
            .client
            .update(
                Table::Users,
                patch,
                vec![Filter::eq("id", user_id.clone())],
                Selection::all(),
            )
            .await?;
        if rows.is_empty() {
            return Err(SyncError::Remote("Profile not found".to_string()));
        }

        let user: User = serde_json::from_value(rows.swap_remove(0))?;
        tracing::info!(user_id = %user.id, "Profile updated");
        self.publish(Some(user.clone()));
        Ok(user)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}
