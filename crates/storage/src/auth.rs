use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::BoxFuture;
use super::client::BackendClient;
use super::error::{
    AuthRequestSnafu, AuthResult, DecodeAuthResponseSnafu, RejectedSnafu, backend_error_message,
};
use super::ids::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens for one signed-in user, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_unix_seconds: i64,
    pub user: AuthUser,
}

impl AuthSession {
    /// True when the access token is expired or expires within `margin_seconds`.
    pub fn expires_within(&self, now_unix_seconds: i64, margin_seconds: i64) -> bool {
        now_unix_seconds >= self.expires_at_unix_seconds - margin_seconds
    }
}

/// Auth-state transitions the session layer reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(AuthSession),
    /// The account exists but email confirmation is pending; no session yet.
    ConfirmationRequired(AuthUser),
}

pub trait AuthBackend: Send + Sync {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<AuthSession>>;
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>>;
    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>>;
    fn refresh_session<'a>(&'a self, refresh_token: &'a str)
    -> BoxFuture<'a, AuthResult<AuthSession>>;
    /// Attaches (or detaches) a session's access token to outgoing table requests.
    fn adopt_session(&self, session: Option<&AuthSession>);
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl UserResponse {
    fn into_user(self) -> AuthUser {
        AuthUser {
            id: UserId::new(self.id),
            email: self.email.filter(|email| !email.is_empty()),
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at_unix_seconds = self
            .expires_at
            .unwrap_or_else(|| current_unix_timestamp_seconds() + self.expires_in);

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at_unix_seconds,
            user: self.user.into_user(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(UserResponse),
}

/// Password auth against the backend's `/auth/v1` endpoints.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    client: BackendClient,
}

impl SupabaseAuth {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    async fn post_json<T>(
        &self,
        stage: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> AuthResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.client.config().auth_url(path);
        let response = self
            .client
            .request(Method::POST, &url)
            .json(&body)
            .send()
            .await
            .context(AuthRequestSnafu { stage })?;
        let status = response.status();
        let text = response.text().await.context(AuthRequestSnafu { stage })?;

        if !status.is_success() {
            return RejectedSnafu {
                stage,
                status: status.as_u16(),
                message: backend_error_message(status.as_u16(), &text),
            }
            .fail();
        }

        serde_json::from_str(&text).context(DecodeAuthResponseSnafu { stage })
    }

    fn adopt(&self, session: &AuthSession) {
        self.client
            .set_access_token(Some(session.access_token.clone()));
    }
}

impl AuthBackend for SupabaseAuth {
    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<AuthSession>> {
        Box::pin(async move {
            let response: TokenResponse = self
                .post_json(
                    "sign-in-password",
                    "token?grant_type=password",
                    serde_json::json!({ "email": email, "password": password }),
                )
                .await?;
            let session = response.into_session();
            self.adopt(&session);
            tracing::info!(user_id = %session.user.id, "signed in with password");
            Ok(session)
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<SignUpOutcome>> {
        Box::pin(async move {
            let response: SignUpResponse = self
                .post_json(
                    "sign-up",
                    "signup",
                    serde_json::json!({ "email": email, "password": password }),
                )
                .await?;

            match response {
                SignUpResponse::Session(token) => {
                    let session = token.into_session();
                    self.adopt(&session);
                    tracing::info!(user_id = %session.user.id, "signed up and signed in");
                    Ok(SignUpOutcome::SignedIn(session))
                }
                SignUpResponse::User(user) => {
                    let user = user.into_user();
                    tracing::info!(user_id = %user.id, "signed up; confirmation pending");
                    Ok(SignUpOutcome::ConfirmationRequired(user))
                }
            }
        })
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(async move {
            if self.client.access_token().is_none() {
                return Ok(());
            }

            let url = self.client.config().auth_url("logout");
            let result = self.client.request(Method::POST, &url).send().await;

            // The local token goes away regardless of what the server answered.
            self.client.set_access_token(None);

            let response = result.context(AuthRequestSnafu { stage: "sign-out" })?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return RejectedSnafu {
                    stage: "sign-out",
                    status: status.as_u16(),
                    message: backend_error_message(status.as_u16(), &text),
                }
                .fail();
            }
            Ok(())
        })
    }

    fn refresh_session<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, AuthResult<AuthSession>> {
        Box::pin(async move {
            let response: TokenResponse = self
                .post_json(
                    "refresh-session",
                    "token?grant_type=refresh_token",
                    serde_json::json!({ "refresh_token": refresh_token }),
                )
                .await?;
            let session = response.into_session();
            self.adopt(&session);
            tracing::debug!(user_id = %session.user.id, "refreshed access token");
            Ok(session)
        })
    }

    fn adopt_session(&self, session: Option<&AuthSession>) {
        self.client
            .set_access_token(session.map(|session| session.access_token.clone()));
    }
}

pub fn current_unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs() as i64)
}
