use std::fmt;

use parley_llm::ProviderError;
use parley_storage::{AuthError, StorageError};
use snafu::Snafu;

use crate::cache::CacheError;
use crate::persist::PersistError;
use crate::settings::SettingsError;

pub const NO_USER_MESSAGE: &str = "No user on the session!";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("authentication failed on `{stage}`, {source}"))]
    Auth {
        stage: &'static str,
        source: AuthError,
    },
    #[snafu(display("backend request failed on `{stage}`, {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("completion failed on `{stage}`, {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("{message}"))]
    Stream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("local cache failed on `{stage}`, {source}"))]
    Cache {
        stage: &'static str,
        source: CacheError,
    },
    #[snafu(display("settings failed on `{stage}`, {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("auth file failed on `{stage}`, {source}"))]
    AuthFile {
        stage: &'static str,
        source: PersistError,
    },
    #[snafu(display("No user on the session!"))]
    NoUser { stage: &'static str },
    #[snafu(display("backend is not configured; set backend_url and backend_anon_key"))]
    BackendNotConfigured { stage: &'static str },
    #[snafu(display("terminal I/O failed on `{stage}`, {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// What the user is shown when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

impl AppError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Auth { stage, .. }
            | Self::Storage { stage, .. }
            | Self::Provider { stage, .. }
            | Self::Stream { stage, .. }
            | Self::Cache { stage, .. }
            | Self::Settings { stage, .. }
            | Self::AuthFile { stage, .. }
            | Self::NoUser { stage }
            | Self::BackendNotConfigured { stage }
            | Self::Terminal { stage, .. } => *stage,
        }
    }

    pub fn alert(&self) -> Alert {
        let (title, message) = match self {
            Self::Auth { source, .. } => ("Authentication", source.to_string()),
            Self::Storage { source, .. } => ("Backend", source.to_string()),
            Self::Provider { source, .. } => ("Completion", source.to_string()),
            Self::Stream { message, .. } => ("Completion", message.clone()),
            Self::Cache { source, .. } => ("Local storage", source.to_string()),
            Self::Settings { source, .. } => ("Settings", source.to_string()),
            Self::AuthFile { source, .. } => ("Session", source.to_string()),
            Self::NoUser { .. } => ("Profile", NO_USER_MESSAGE.to_string()),
            Self::BackendNotConfigured { .. } => ("Settings", self.to_string()),
            Self::Terminal { source, .. } => ("Terminal", source.to_string()),
        };

        Alert {
            title: title.to_string(),
            message,
        }
    }
}
