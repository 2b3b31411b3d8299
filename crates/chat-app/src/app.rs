use std::path::{Path, PathBuf};
use std::sync::Arc;

use parley_llm::{LlmProvider, OPENAI_PROVIDER_ID, create_provider};
use parley_storage::{
    AuthBackend, BackendClient, PostgrestStorage, ProfileStore, Storage, SupabaseAuth,
};
use snafu::{ResultExt, ensure};

use crate::cache::CredentialCache;
use crate::chat::ChatSession;
use crate::error::{AppResult, BackendNotConfiguredSnafu, ProviderSnafu};
use crate::model_selector::ModelSelector;
use crate::route::{Route, resolve_route};
use crate::session::{AUTH_FILE_NAME, SessionStore};
use crate::settings::SettingsStore;

/// Everything a screen needs, built once at startup and passed down explicitly.
pub struct AppContext {
    settings: SettingsStore,
    data_dir: PathBuf,
    credentials: CredentialCache,
    models: ModelSelector,
    storage: Arc<dyn Storage>,
    session: Arc<SessionStore>,
}

impl AppContext {
    /// Wires the hosted backend from the configured URL and anon key.
    pub fn connect(settings: SettingsStore) -> AppResult<Self> {
        let backend = settings.settings().backend_config();
        ensure!(
            backend.is_configured(),
            BackendNotConfiguredSnafu {
                stage: "connect-backend",
            }
        );

        let client = BackendClient::new(backend);
        let auth = Arc::new(SupabaseAuth::new(client.clone()));
        let storage = Arc::new(PostgrestStorage::new(client));
        tracing::debug!(config_path = ?settings.config_path(), "backend clients ready");
        Ok(Self::new(settings, auth, storage))
    }

    pub fn new<S>(settings: SettingsStore, auth: Arc<dyn AuthBackend>, storage: Arc<S>) -> Self
    where
        S: Storage + 'static,
    {
        let data_dir = settings.data_dir();
        let profiles: Arc<dyn ProfileStore> = storage.clone();
        let session = SessionStore::new(auth, profiles).with_auth_file(data_dir.join(AUTH_FILE_NAME));

        Self {
            credentials: CredentialCache::open(&data_dir),
            models: ModelSelector::open(&data_dir),
            storage,
            session: Arc::new(session),
            data_dir,
            settings,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    pub fn models(&self) -> &ModelSelector {
        &self.models
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn route(&self, requested: Route) -> Route {
        resolve_route(
            self.session.current_user().as_ref(),
            self.credentials.credentials().as_ref(),
            requested,
        )
    }

    /// The inference provider for the cached credentials, if both are set.
    pub fn provider(&self) -> AppResult<Option<Arc<dyn LlmProvider>>> {
        let Some(credentials) = self.credentials.credentials() else {
            return Ok(None);
        };
        let config = self.settings.settings().provider_config(
            OPENAI_PROVIDER_ID,
            &credentials.api_key,
            &credentials.organization,
        );
        create_provider(config)
            .map(Some)
            .context(ProviderSnafu {
                stage: "create-provider",
            })
    }

    pub fn chat_session(&self, provider: Arc<dyn LlmProvider>) -> ChatSession {
        let model = self.models.current_model();
        tracing::debug!(model_id = %model.id, provider_id = %provider.id(), "starting chat session");
        ChatSession::new(self.storage.clone(), provider, model.id)
    }
}
