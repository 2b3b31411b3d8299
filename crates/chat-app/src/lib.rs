#![deny(unsafe_code)]

/// Startup wiring shared by every command.
pub mod app;
pub mod cache;
/// Chat domain: messages, the stream reducer and the open conversation.
pub mod chat;
pub mod error;
pub mod model_selector;
mod persist;
pub mod route;
/// Authentication state and the signed-in user's profile.
pub mod session;
/// Settings persistence.
pub mod settings;

pub use app::AppContext;
pub use error::{Alert, AppError, AppResult};
pub use persist::PersistError;
