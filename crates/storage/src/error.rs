use std::num::ParseIntError;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage entity '{entity}' with id '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("storage id '{raw}' is invalid for {id_type}"))]
    InvalidNumericId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("user id '{raw}' is not a valid uuid"))]
    InvalidUserId {
        stage: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("request against table '{table}' failed on `{stage}`: {source}"))]
    Request {
        stage: &'static str,
        table: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{message}"))]
    Status {
        stage: &'static str,
        table: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("failed to decode rows from table '{table}' on `{stage}`: {source}"))]
    DecodeRows {
        stage: &'static str,
        table: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("table '{table}' returned no representation on `{stage}`"))]
    EmptyRepresentation {
        stage: &'static str,
        table: &'static str,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("auth request failed on `{stage}`: {source}"))]
    AuthRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{message}"))]
    Rejected {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("failed to decode auth response on `{stage}`: {source}"))]
    DecodeAuthResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Pulls a human readable message out of a backend error body.
///
/// The REST layer answers `{"message": ..}` while the auth layer uses
/// `error_description`, `msg` or `error` depending on the endpoint.
pub(crate) fn backend_error_message(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        ["message", "error_description", "msg", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|field| field.as_str()))
            .map(str::to_string)
    });

    match message {
        Some(message) if !message.trim().is_empty() => message,
        _ if !body.trim().is_empty() => format!("backend returned status {status}: {}", body.trim()),
        _ => format!("backend returned status {status}"),
    }
}
