use std::sync::Arc;

use arc_swap::ArcSwapOption;
use reqwest::{Method, RequestBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project root, e.g. `https://<project>.supabase.co`.
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: String,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.into().trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.anon_key.is_empty()
    }

    pub(crate) fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }
}

/// HTTP handle shared by the auth and table clients.
///
/// The auth client swaps the user's access token in on sign-in and out on
/// sign-out, so row-level policies see the signed-in user on table requests.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: Arc<BackendConfig>,
    access_token: Arc<ArcSwapOption<String>>,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
            access_token: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn set_access_token(&self, token: Option<String>) {
        self.access_token.store(token.map(Arc::new));
    }

    pub fn access_token(&self) -> Option<Arc<String>> {
        self.access_token.load_full()
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self
            .access_token
            .load_full()
            .map(|token| token.as_str().to_string())
            .unwrap_or_else(|| self.config.anon_key.clone());

        self.http
            .request(method, url)
            .header("apikey", self.config.anon_key.as_str())
            .bearer_auth(bearer)
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendClient")
            .field("url", &self.config.url)
            .field("has_access_token", &self.access_token.load().is_some())
            .finish()
    }
}
