use std::path::PathBuf;
use std::sync::Arc;

use parley_storage::auth::current_unix_timestamp_seconds;
use parley_storage::{
    AuthBackend, AuthEvent, AuthSession, ProfileRecord, ProfileStore, ProfileUpsert,
    SignUpOutcome, UserId,
};
use snafu::ResultExt;
use tokio::sync::watch;

use crate::error::{AppError, AppResult, AuthFileSnafu, AuthSnafu, NoUserSnafu, StorageSnafu};
use crate::persist::{read_json, remove_file, write_json_atomically};

pub const AUTH_FILE_NAME: &str = "auth.json";
pub const PLACEHOLDER_EMAIL: &str = "-";
pub const PLACEHOLDER_NAME: &str = "-";
pub const DEFAULT_AVATAR_URL: &str = "https://galaxies.dev/img/meerkat_2.jpg";
/// Restored tokens this close to expiry are refreshed before use.
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub image_url: String,
}

impl User {
    fn placeholder(session: &AuthSession) -> Self {
        Self {
            id: session.user.id,
            email: session
                .user
                .email
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string()),
            name: PLACEHOLDER_NAME.to_string(),
            image_url: DEFAULT_AVATAR_URL.to_string(),
        }
    }

    fn merge_profile(&mut self, profile: &ProfileRecord) {
        if !profile.name.trim().is_empty() {
            self.name = profile.name.clone();
        }
        if !profile.image_url.trim().is_empty() {
            self.image_url = profile.image_url.clone();
        }
    }
}

/// Blank input keeps the current value, matching how stored profiles are merged.
fn field_or_current(update: Option<String>, current: &str) -> String {
    update
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| current.to_string())
}

/// Session and user always change together; readers get whole snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Option<AuthSession>,
    pub user: Option<User>,
}

impl SessionSnapshot {
    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub image_url: Option<String>,
}

pub struct SessionStore {
    auth: Arc<dyn AuthBackend>,
    profiles: Arc<dyn ProfileStore>,
    snapshot: watch::Sender<Arc<SessionSnapshot>>,
    auth_file: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthBackend>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(SessionSnapshot::default()));
        Self {
            auth,
            profiles,
            snapshot,
            auth_file: None,
        }
    }

    /// Persists the session at `path` so a later run can [`restore`](Self::restore) it.
    pub fn with_auth_file(mut self, path: PathBuf) -> Self {
        self.auth_file = Some(path);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.snapshot.borrow().user.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<Arc<SessionSnapshot>> {
        let session = self
            .auth
            .sign_in_with_password(email.trim(), password)
            .await
            .context(AuthSnafu { stage: "sign-in" })?;
        self.apply_auth_event(AuthEvent::SignedIn(session)).await?;
        Ok(self.snapshot())
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        let outcome = self
            .auth
            .sign_up(email.trim(), password)
            .await
            .context(AuthSnafu { stage: "sign-up" })?;
        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.apply_auth_event(AuthEvent::SignedIn(session.clone()))
                .await?;
        }
        Ok(outcome)
    }

    /// Local state is cleared even when the remote sign-out fails.
    pub async fn sign_out(&self) -> AppResult<()> {
        let remote = self.auth.sign_out().await;
        let local = self.apply_auth_event(AuthEvent::SignedOut).await;
        remote.context(AuthSnafu { stage: "sign-out" })?;
        local
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> AppResult<User> {
        let Some(user) = self.current_user() else {
            return NoUserSnafu {
                stage: "update-profile",
            }
            .fail();
        };

        let upsert = ProfileUpsert {
            id: user.id,
            name: field_or_current(update.name, &user.name),
            image_url: field_or_current(update.image_url, &user.image_url),
        };
        let profile = self
            .profiles
            .upsert_profile(upsert)
            .await
            .context(StorageSnafu {
                stage: "upsert-profile",
            })?;

        let mut updated = user;
        updated.merge_profile(&profile);
        self.replace_user(&updated);
        tracing::info!(user_id = %updated.id, "profile updated");
        Ok(updated)
    }

    /// Applies one auth-state transition.
    ///
    /// Sign-in and refresh publish a placeholder user first and fill in the
    /// stored profile afterwards; a missing profile row leaves the placeholder.
    pub async fn apply_auth_event(&self, event: AuthEvent) -> AppResult<()> {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                let user = User::placeholder(&session);
                let user_id = user.id;

                self.persist_session(&session)?;
                self.auth.adopt_session(Some(&session));
                self.snapshot.send_replace(Arc::new(SessionSnapshot {
                    session: Some(session),
                    user: Some(user.clone()),
                }));
                tracing::info!(user_id = %user_id, "session established");

                let profile = self
                    .profiles
                    .get_profile(user_id)
                    .await
                    .context(StorageSnafu {
                        stage: "load-profile",
                    })?;
                match profile {
                    Some(profile) => {
                        let mut user = user;
                        user.merge_profile(&profile);
                        self.replace_user(&user);
                    }
                    None => tracing::debug!(user_id = %user_id, "no profile row for user"),
                }
                Ok(())
            }
            AuthEvent::SignedOut => {
                self.auth.adopt_session(None);
                self.snapshot
                    .send_replace(Arc::new(SessionSnapshot::default()));
                tracing::info!("session cleared");

                if let Some(path) = &self.auth_file {
                    remove_file(path).context(AuthFileSnafu {
                        stage: "remove-auth-file",
                    })?;
                }
                Ok(())
            }
        }
    }

    /// Loads the persisted session, refreshing it first when it is about to expire.
    ///
    /// Returns whether a session was restored.
    pub async fn restore(&self) -> AppResult<bool> {
        let Some(path) = &self.auth_file else {
            return Ok(false);
        };

        let stored = match read_json::<AuthSession>(path) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(false),
            Err(error) => {
                tracing::warn!(error = %error, "discarding unreadable auth file");
                self.apply_auth_event(AuthEvent::SignedOut).await?;
                return Ok(false);
            }
        };

        if !stored.expires_within(current_unix_timestamp_seconds(), REFRESH_MARGIN_SECONDS) {
            self.apply_auth_event(AuthEvent::SignedIn(stored)).await?;
            return Ok(true);
        }

        match self.auth.refresh_session(&stored.refresh_token).await {
            Ok(session) => {
                self.apply_auth_event(AuthEvent::TokenRefreshed(session))
                    .await?;
                Ok(true)
            }
            Err(source) => {
                tracing::warn!(error = %source, "stored session could not be refreshed");
                self.apply_auth_event(AuthEvent::SignedOut).await?;
                Err(AppError::Auth {
                    stage: "refresh-session",
                    source,
                })
            }
        }
    }

    fn persist_session(&self, session: &AuthSession) -> AppResult<()> {
        let Some(path) = &self.auth_file else {
            return Ok(());
        };
        write_json_atomically(path, session).context(AuthFileSnafu {
            stage: "persist-auth-file",
        })
    }

    fn replace_user(&self, user: &User) {
        self.snapshot.send_modify(|snapshot| {
            let same_user = snapshot
                .user
                .as_ref()
                .is_some_and(|current| current.id == user.id);
            if same_user {
                let mut next = SessionSnapshot::clone(snapshot);
                next.user = Some(user.clone());
                *snapshot = Arc::new(next);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use parley_storage::{AuthError, AuthResult, AuthUser, BoxFuture, MemoryStorage};

    use super::*;

    const USER_ID: &str = "6f1c1c53-0c44-4d59-9f0a-2a4a0f4f3b11";

    fn session(access_token: &str, expires_at_unix_seconds: i64) -> AuthSession {
        AuthSession {
            access_token: access_token.to_string(),
            refresh_token: format!("{access_token}-refresh"),
            expires_at_unix_seconds,
            user: AuthUser {
                id: UserId::parse(USER_ID).expect("uuid"),
                email: Some("ada@example.com".to_string()),
            },
        }
    }

    fn far_future() -> i64 {
        current_unix_timestamp_seconds() + 3_600
    }

    fn rejected(message: &str) -> AuthError {
        AuthError::Rejected {
            stage: "scripted",
            status: 400,
            message: message.to_string(),
        }
    }

    #[derive(Default)]
    struct ScriptedAuth {
        reject_sign_in: bool,
        reject_sign_out: bool,
        anonymous: bool,
        refreshed_with: Mutex<Vec<String>>,
        adopted: Mutex<Vec<Option<String>>>,
    }

    impl AuthBackend for ScriptedAuth {
        fn sign_in_with_password<'a>(
            &'a self,
            _email: &'a str,
            _password: &'a str,
        ) -> BoxFuture<'a, AuthResult<AuthSession>> {
            Box::pin(async move {
                if self.reject_sign_in {
                    return Err(rejected("Invalid login credentials"));
                }
                let mut session = session("signed-in", far_future());
                if self.anonymous {
                    session.user.email = None;
                }
                Ok(session)
            })
        }

        fn sign_up<'a>(
            &'a self,
            _email: &'a str,
            _password: &'a str,
        ) -> BoxFuture<'a, AuthResult<SignUpOutcome>> {
            Box::pin(async move {
                Ok(SignUpOutcome::ConfirmationRequired(
                    session("pending", 0).user,
                ))
            })
        }

        fn sign_out<'a>(&'a self) -> BoxFuture<'a, AuthResult<()>> {
            Box::pin(async move {
                if self.reject_sign_out {
                    return Err(rejected("network unreachable"));
                }
                Ok(())
            })
        }

        fn refresh_session<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> BoxFuture<'a, AuthResult<AuthSession>> {
            Box::pin(async move {
                self.refreshed_with
                    .lock()
                    .expect("lock")
                    .push(refresh_token.to_string());
                Ok(session("refreshed", far_future()))
            })
        }

        fn adopt_session(&self, session: Option<&AuthSession>) {
            self.adopted
                .lock()
                .expect("lock")
                .push(session.map(|session| session.access_token.clone()));
        }
    }

    fn store(auth: ScriptedAuth, profiles: Arc<MemoryStorage>) -> (SessionStore, Arc<ScriptedAuth>) {
        let auth = Arc::new(auth);
        (SessionStore::new(auth.clone(), profiles), auth)
    }

    #[tokio::test]
    async fn sign_in_without_profile_row_keeps_placeholder() {
        let (store, _) = store(
            ScriptedAuth {
                anonymous: true,
                ..ScriptedAuth::default()
            },
            Arc::new(MemoryStorage::new()),
        );

        let snapshot = store.sign_in("ada@example.com", "secret").await.expect("sign in");
        let user = snapshot.user.clone().expect("user");

        assert!(snapshot.is_signed_in());
        assert_eq!(user.email, PLACEHOLDER_EMAIL);
        assert_eq!(user.name, PLACEHOLDER_NAME);
        assert_eq!(user.image_url, DEFAULT_AVATAR_URL);
    }

    #[tokio::test]
    async fn sign_in_republishes_with_stored_profile() {
        let profiles = Arc::new(MemoryStorage::new());
        profiles
            .upsert_profile(ProfileUpsert {
                id: UserId::parse(USER_ID).expect("uuid"),
                name: "Ada".to_string(),
                image_url: "https://img/ada.png".to_string(),
            })
            .await
            .expect("seed profile");
        let (store, auth) = store(ScriptedAuth::default(), profiles);
        let mut updates = store.subscribe();

        store.sign_in("ada@example.com", "secret").await.expect("sign in");

        assert!(updates.has_changed().expect("sender alive"));
        let user = updates.borrow_and_update().user.clone().expect("user");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.name, "Ada");
        assert_eq!(user.image_url, "https://img/ada.png");
        assert_eq!(
            *auth.adopted.lock().expect("lock"),
            vec![Some("signed-in".to_string())]
        );
    }

    #[tokio::test]
    async fn rejected_sign_in_is_an_alert_and_leaves_state_alone() {
        let (store, _) = store(
            ScriptedAuth {
                reject_sign_in: true,
                ..ScriptedAuth::default()
            },
            Arc::new(MemoryStorage::new()),
        );

        let error = store
            .sign_in("ada@example.com", "wrong")
            .await
            .expect_err("rejected");

        assert_eq!(error.alert().message, "Invalid login credentials");
        assert_eq!(*store.snapshot(), SessionSnapshot::default());
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_user_even_when_remote_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth_file = dir.path().join(AUTH_FILE_NAME);
        let (store, auth) = store(
            ScriptedAuth {
                reject_sign_out: true,
                ..ScriptedAuth::default()
            },
            Arc::new(MemoryStorage::new()),
        );
        let store = store.with_auth_file(auth_file.clone());
        store.sign_in("ada@example.com", "secret").await.expect("sign in");
        assert!(auth_file.exists());

        let result = store.sign_out().await;

        assert!(matches!(result, Err(AppError::Auth { .. })));
        let snapshot = store.snapshot();
        assert!(snapshot.session.is_none());
        assert!(snapshot.user.is_none());
        assert!(!auth_file.exists());
        assert_eq!(auth.adopted.lock().expect("lock").last(), Some(&None));
    }

    #[tokio::test]
    async fn sign_up_pending_confirmation_does_not_sign_in() {
        let (store, _) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));

        let outcome = store.sign_up("new@example.com", "secret").await.expect("sign up");

        assert!(matches!(outcome, SignUpOutcome::ConfirmationRequired(_)));
        assert!(!store.snapshot().is_signed_in());
    }

    #[tokio::test]
    async fn profile_update_without_user_fails_with_alert() {
        let (store, _) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));

        let error = store
            .update_profile(ProfileUpdate {
                name: Some("Ada".to_string()),
                image_url: None,
            })
            .await
            .expect_err("no user");

        assert_eq!(error.alert().message, "No user on the session!");
    }

    #[tokio::test]
    async fn profile_update_upserts_and_mutates_snapshot() {
        let profiles = Arc::new(MemoryStorage::new());
        let (store, _) = store(ScriptedAuth::default(), profiles.clone());
        store.sign_in("ada@example.com", "secret").await.expect("sign in");

        let user = store
            .update_profile(ProfileUpdate {
                name: Some(" Ada Lovelace ".to_string()),
                image_url: None,
            })
            .await
            .expect("update");

        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.image_url, DEFAULT_AVATAR_URL);
        assert_eq!(store.current_user(), Some(user.clone()));
        let stored = profiles
            .get_profile(user.id)
            .await
            .expect("lookup")
            .expect("row");
        assert_eq!(stored.name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn blank_profile_fields_keep_stored_and_published_values_in_step() {
        let profiles = Arc::new(MemoryStorage::new());
        let (store, _) = store(ScriptedAuth::default(), profiles.clone());
        store.sign_in("ada@example.com", "secret").await.expect("sign in");
        store
            .update_profile(ProfileUpdate {
                name: Some("Ada".to_string()),
                image_url: Some("https://img/ada.png".to_string()),
            })
            .await
            .expect("first update");

        let user = store
            .update_profile(ProfileUpdate {
                name: Some("   ".to_string()),
                image_url: Some(String::new()),
            })
            .await
            .expect("blank update");

        let stored = profiles
            .get_profile(user.id)
            .await
            .expect("lookup")
            .expect("row");
        assert_eq!(user.name, "Ada");
        assert_eq!(stored.name, user.name);
        assert_eq!(stored.image_url, user.image_url);
        assert_eq!(store.current_user(), Some(user));
    }

    #[tokio::test]
    async fn unwritable_auth_file_leaves_token_unadopted_and_signed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").expect("seed file");
        let (store, auth) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));
        let store = store.with_auth_file(blocker.join(AUTH_FILE_NAME));

        let error = store
            .sign_in("ada@example.com", "secret")
            .await
            .expect_err("auth file cannot be written");

        assert!(matches!(error, AppError::AuthFile { .. }));
        assert!(auth.adopted.lock().expect("lock").is_empty());
        assert!(!store.snapshot().is_signed_in());
    }

    #[tokio::test]
    async fn restore_refreshes_a_token_near_expiry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth_file = dir.path().join(AUTH_FILE_NAME);
        let expiring = session("stale", current_unix_timestamp_seconds() + 30);
        write_json_atomically(&auth_file, &expiring).expect("seed auth file");

        let (store, auth) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));
        let store = store.with_auth_file(auth_file.clone());

        assert!(store.restore().await.expect("restore"));

        assert_eq!(
            *auth.refreshed_with.lock().expect("lock"),
            vec!["stale-refresh".to_string()]
        );
        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.session.as_ref().map(|session| session.access_token.as_str()),
            Some("refreshed")
        );
        let persisted: AuthSession = read_json(&auth_file).expect("read").expect("auth file");
        assert_eq!(persisted.access_token, "refreshed");
    }

    #[tokio::test]
    async fn restore_uses_a_fresh_token_as_is() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth_file = dir.path().join(AUTH_FILE_NAME);
        write_json_atomically(&auth_file, &session("fresh", far_future())).expect("seed");

        let (store, auth) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));
        let store = store.with_auth_file(auth_file);

        assert!(store.restore().await.expect("restore"));
        assert!(auth.refreshed_with.lock().expect("lock").is_empty());
        assert_eq!(
            store.snapshot().session.as_ref().map(|session| session.access_token.clone()),
            Some("fresh".to_string())
        );
    }

    #[tokio::test]
    async fn restore_without_auth_file_is_signed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store(ScriptedAuth::default(), Arc::new(MemoryStorage::new()));
        let store = store.with_auth_file(dir.path().join(AUTH_FILE_NAME));

        assert!(!store.restore().await.expect("restore"));
        assert!(!store.snapshot().is_signed_in());
    }
}
