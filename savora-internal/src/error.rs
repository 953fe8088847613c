use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

/// Controls whether verification-failure detail is included in error
/// response bodies. Off by default so signature internals never leak to
/// clients.
static DEBUG: OnceCell<bool> = OnceCell::const_new();

pub fn set_debug(debug: bool) -> Result<(), Error> {
    DEBUG.set(debug).map_err(|_| {
        Error::new(ErrorDetails::Config {
            message: "Failed to set debug mode".to_string(),
        })
    })
}

/// Gateway-wide error type.
///
/// As long as the struct member is private, we force people to use the `new`
/// method and log the error. We box `ErrorDetails` per the
/// `clippy::result_large_err` lint.
#[derive(Debug, PartialEq)]
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    pub fn log(&self) {
        self.0.log();
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AppState {
        message: String,
    },
    Config {
        message: String,
    },
    FileRead {
        message: String,
        file_path: String,
    },
    Generation {
        message: String,
    },
    GenerationTimeout,
    InternalError {
        message: String,
    },
    InvalidRequest {
        message: String,
    },
    JsonRequest {
        message: String,
    },
    RouteNotFound {
        path: String,
        method: String,
    },
    Serialization {
        message: String,
    },
    SignatureVerification {
        message: String,
    },
    StoreConflict {
        key: String,
    },
    StoreConnection {
        message: String,
    },
    StoreQuery {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::FileRead { .. } => tracing::Level::ERROR,
            ErrorDetails::Generation { .. } => tracing::Level::ERROR,
            ErrorDetails::GenerationTimeout => tracing::Level::WARN,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidRequest { .. } => tracing::Level::WARN,
            ErrorDetails::JsonRequest { .. } => tracing::Level::WARN,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::SignatureVerification { .. } => tracing::Level::WARN,
            ErrorDetails::StoreConflict { .. } => tracing::Level::WARN,
            ErrorDetails::StoreConnection { .. } => tracing::Level::ERROR,
            ErrorDetails::StoreQuery { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::FileRead { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Generation { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::GenerationTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::SignatureVerification { .. } => StatusCode::UNAUTHORIZED,
            ErrorDetails::StoreConflict { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StoreConnection { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StoreQuery { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::Config { message } => {
                write!(f, "{message}")
            }
            ErrorDetails::FileRead { message, file_path } => {
                write!(f, "Error reading file {file_path}: {message}")
            }
            ErrorDetails::Generation { message } => {
                write!(f, "Error from meal generator: {message}")
            }
            ErrorDetails::GenerationTimeout => {
                write!(f, "Meal generation timed out")
            }
            ErrorDetails::InternalError { message } => {
                write!(f, "Internal error: {message}")
            }
            ErrorDetails::InvalidRequest { message } => {
                write!(f, "Invalid request: {message}")
            }
            ErrorDetails::JsonRequest { message } => {
                write!(f, "Error parsing request JSON: {message}")
            }
            ErrorDetails::RouteNotFound { path, method } => {
                write!(f, "Route not found: {method} {path}")
            }
            ErrorDetails::Serialization { message } => {
                write!(f, "Error serializing record: {message}")
            }
            ErrorDetails::SignatureVerification { message } => {
                write!(f, "Transaction signature verification failed: {message}")
            }
            ErrorDetails::StoreConflict { key } => {
                write!(f, "Store transaction conflict on key `{key}`")
            }
            ErrorDetails::StoreConnection { message } => {
                write!(f, "Error connecting to document store: {message}")
            }
            ErrorDetails::StoreQuery { message } => {
                write!(f, "Document store query failed: {message}")
            }
        }
    }
}

impl ErrorDetails {
    /// Body returned to the client for this error.
    ///
    /// Signature failures get a fixed generic body so that verification
    /// internals never reach the caller.
    fn to_response_json(&self) -> Value {
        match self {
            ErrorDetails::SignatureVerification { .. } if !*DEBUG.get().unwrap_or(&false) => {
                json!({"error": "Invalid signed transaction"})
            }
            _ => json!({"error": self.to_string()}),
        }
    }
}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = self.get_details().to_response_json();
        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_error_is_generic_in_response() {
        let error = Error::new_without_logging(ErrorDetails::SignatureVerification {
            message: "x5c chain is missing an intermediate".to_string(),
        });

        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
        let body = error.get_details().to_response_json();
        assert_eq!(body, json!({"error": "Invalid signed transaction"}));
        // The internal detail still reaches the logs via Display
        assert!(error.to_string().contains("intermediate"));
    }

    #[test]
    fn test_generation_timeout_status() {
        let error = Error::new_without_logging(ErrorDetails::GenerationTimeout);
        assert_eq!(error.status_code(), StatusCode::REQUEST_TIMEOUT);
    }
}
