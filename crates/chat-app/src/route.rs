use parley_storage::ChatId;

use crate::cache::Credentials;
use crate::session::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Welcome,
    Login,
    SignUp,
    Settings,
    Profile,
    Chats,
    /// `None` starts a new conversation.
    Chat(Option<ChatId>),
}

impl Route {
    /// Reachable without a signed-in user.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Welcome | Self::Login | Self::SignUp)
    }

    pub fn needs_credentials(&self) -> bool {
        matches!(self, Self::Chats | Self::Chat(_))
    }
}

/// Decides which screen actually opens for `requested`.
pub fn resolve_route(
    user: Option<&User>,
    credentials: Option<&Credentials>,
    requested: Route,
) -> Route {
    if user.is_none() {
        return if requested.is_public() {
            requested
        } else {
            Route::Welcome
        };
    }

    if credentials.is_none() && requested.needs_credentials() {
        tracing::debug!(requested = ?requested, "credentials missing, redirecting to settings");
        return Route::Settings;
    }

    requested
}
