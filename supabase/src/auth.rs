//! GoTrue password auth.

use crate::SupabaseClient;
use crate::error::{GoTrueErrorBody, SupabaseError};
use gather_core::auth::{AuthError, AuthFuture, AuthIdentity, AuthProvider, SignUpRequest};
use reqwest::Response;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Body of `/token` and (when confirmation is off) `/signup` responses
#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<GoTrueUser>,
}

impl SessionResponse {
    /// Identity of a signed-in session, or `None` when no token was issued
    fn into_identity(self, fallback_email: &str) -> Option<AuthIdentity> {
        let token = self.access_token?;
        let user = self.user?;
        Some(AuthIdentity {
            user_id: user.id,
            email: user.email.unwrap_or_else(|| fallback_email.to_string()),
            access_token: Some(token),
        })
    }
}

async fn check(response: Response) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<GoTrueErrorBody>(&text).unwrap_or_else(|_| GoTrueErrorBody {
        msg: (!text.is_empty()).then_some(text),
        ..GoTrueErrorBody::default()
    });
    Err(SupabaseError::GoTrue {
        status: status.as_u16(),
        body,
    })
}

impl SupabaseClient {
    async fn post_auth(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<SessionResponse, SupabaseError> {
        let url = self.endpoint(&format!("auth/v1/{path}"))?;
        let response = self
            .http
            .post(url)
            .query(query)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;
        Ok(check(response).await?.json::<SessionResponse>().await?)
    }
}

impl AuthProvider for SupabaseClient {
    fn current(&self) -> AuthFuture<'_, Option<AuthIdentity>> {
        Box::pin(async move { Ok(self.identity()) })
    }

    fn sign_in(&self, email: String, password: String) -> AuthFuture<'_, AuthIdentity> {
        Box::pin(async move {
            let session = self
                .post_auth(
                    "token",
                    &[("grant_type", "password")],
                    &json!({ "email": email, "password": password }),
                )
                .await?;

            let identity = session
                .into_identity(&email)
                .ok_or_else(|| AuthError::Rejected("No session returned".to_string()))?;
            tracing::info!(user_id = %identity.user_id, "Signed in");
            self.set_identity(Some(identity.clone()));
            Ok(identity)
        })
    }

    fn sign_up(&self, request: SignUpRequest) -> AuthFuture<'_, AuthIdentity> {
        Box::pin(async move {
            let session = self
                .post_auth(
                    "signup",
                    &[],
                    &json!({
                        "email": request.email,
                        "password": request.password,
                        "data": request.metadata,
                    }),
                )
                .await?;

            match session.into_identity(&request.email) {
                Some(identity) => {
                    tracing::info!(user_id = %identity.user_id, "Signed up");
                    self.set_identity(Some(identity.clone()));
                    Ok(identity)
                },
                None => {
                    tracing::info!(email = %request.email, "Sign-up awaiting email confirmation");
                    Err(AuthError::ConfirmationPending(request.email))
                },
            }
        })
    }

    fn sign_out(&self) -> AuthFuture<'_, ()> {
        Box::pin(async move {
            let Some(token) = self.identity().and_then(|identity| identity.access_token) else {
                return Ok(());
            };

            let url = self.endpoint("auth/v1/logout")?;
            let result = async {
                let response = self
                    .http
                    .post(url)
                    .header("apikey", &self.anon_key)
                    .bearer_auth(token)
                    .send()
                    .await?;
                check(response).await.map(|_| ())
            }
            .await;

            // The local session ends even if the server call fails
            self.set_identity(None);
            match result {
                Ok(()) | Err(SupabaseError::GoTrue { status: 401, .. }) => {
                    tracing::info!("Signed out");
                    Ok(())
                },
                Err(e) => Err(e.into()),
            }
        })
    }
}
