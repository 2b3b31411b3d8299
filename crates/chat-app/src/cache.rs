use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use snafu::{ResultExt, Snafu};

use crate::persist::{PersistError, read_json, write_json_atomically};

pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";
pub const API_KEY: &str = "apikey";
pub const ORGANIZATION: &str = "org";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("failed to store `{key}` on `{stage}`: {source}"))]
    Persist {
        stage: &'static str,
        key: String,
        source: PersistError,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Unencrypted string map backed by one JSON file.
pub struct KeyValueCache {
    entries: ArcSwap<BTreeMap<String, String>>,
    path: PathBuf,
}

impl KeyValueCache {
    pub fn open(path: PathBuf) -> Self {
        let entries = match read_json::<BTreeMap<String, String>>(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to read cache, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            entries: ArcSwap::from_pointee(entries),
            path,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.load().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> CacheResult<()> {
        self.set_many([(key, value.into())])
    }

    /// Applies several writes with one file replacement.
    pub fn set_many<'a, I>(&self, values: I) -> CacheResult<()>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut next = BTreeMap::clone(&self.entries.load());
        let mut keys = Vec::new();
        for (key, value) in values {
            keys.push(key);
            next.insert(key.to_string(), value);
        }

        write_json_atomically(&self.path, &next).context(PersistSnafu {
            stage: "persist-cache",
            key: keys.join(","),
        })?;
        self.entries.store(Arc::new(next));
        tracing::debug!(path = ?self.path, keys = ?keys, "cache updated");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub organization: String,
}

/// The inference API key and organization, stored as `apikey` and `org`.
pub struct CredentialCache {
    cache: KeyValueCache,
}

impl CredentialCache {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            cache: KeyValueCache::open(data_dir.join(CREDENTIALS_FILE_NAME)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.get(key)
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> CacheResult<()> {
        self.cache.set(key, value)
    }

    /// Both values, or `None` when either is missing or blank.
    pub fn credentials(&self) -> Option<Credentials> {
        let api_key = self.present(API_KEY)?;
        let organization = self.present(ORGANIZATION)?;
        Some(Credentials {
            api_key,
            organization,
        })
    }

    pub fn set_credentials(&self, api_key: &str, organization: &str) -> CacheResult<()> {
        self.cache.set_many([
            (API_KEY, api_key.trim().to_string()),
            (ORGANIZATION, organization.trim().to_string()),
        ])
    }

    /// Blanks both keys, which routes the user back to settings.
    pub fn remove_credentials(&self) -> CacheResult<()> {
        self.cache
            .set_many([(API_KEY, String::new()), (ORGANIZATION, String::new())])
    }

    fn present(&self, key: &str) -> Option<String> {
        self.cache
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
