pub mod state;

pub use state::{AppSettings, SETTINGS_FILE_NAME, SettingsError, SettingsStore};
