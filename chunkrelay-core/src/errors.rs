//! # Errors
//!
//! chunkrelay reports every failure through one structured error type so the
//! HTTP layer can tell a client whether to retry, fix its request, or give up.
//!
//! - consistent status codes + class names (Feathers-style payload)
//! - can be carried through `anyhow::Error`
//! - transport-agnostic (the server crate decides how to serialize)
//!
//! Each error also carries a `retryable` hint. Transient store/engine
//! failures are retryable, credential and configuration failures are not.

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::{json, Value};

/// A convenience result type for chunkrelay APIs that flow through `anyhow`.
pub type RelayResult<T> = std::result::Result<T, AnyError>;

/// Error class names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,   // 400
    NotFound,     // 404
    Conflict,     // 409
    GeneralError, // 500
    BadGateway,   // 502
    Unavailable,  // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::GeneralError => 500,
            ErrorKind::BadGateway => 502,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Error `name` (e.g. "NotFound")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::BadGateway => "BadGateway",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    /// Error `className` (kebab-cased)
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::BadGateway => "bad-gateway",
            ErrorKind::Unavailable => "unavailable",
        }
    }

    /// Whether a client may repeat the same request and expect a different outcome.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict | ErrorKind::BadGateway | ErrorKind::Unavailable
        )
    }
}

/// A structured error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct RelayError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub data: Option<Value>,
    pub errors: Option<Value>,
    pub source: Option<AnyError>,
}

impl RelayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            data: None,
            errors: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the retry hint derived from the kind.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// Convert into `anyhow::Error`.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `RelayError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&RelayError> {
        err.downcast_ref::<RelayError>()
    }

    /// Turn any error into a RelayError:
    /// - if it's already a RelayError, keep it
    /// - otherwise wrap as GeneralError
    pub fn normalize(err: AnyError) -> RelayError {
        match err.downcast::<RelayError>() {
            Ok(relay) => relay,
            Err(other) => {
                RelayError::new(ErrorKind::GeneralError, other.to_string()).with_source(other)
            }
        }
    }

    /// A copy suitable for returning to clients (drops the inner `source`).
    pub fn sanitize_for_client(&self) -> RelayError {
        RelayError {
            kind: self.kind,
            message: self.message.clone(),
            retryable: self.retryable,
            data: self.data.clone(),
            errors: self.errors.clone(),
            source: None,
        }
    }

    /// JSON payload: `{name, message, code, className, data, errors?}`.
    ///
    /// `data.retryable` is always present so clients can branch on it without
    /// parsing status codes.
    pub fn to_json(&self) -> Value {
        let mut data = match &self.data {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(other) => json!({ "detail": other }),
            None => json!({}),
        };
        data["retryable"] = Value::Bool(self.retryable);

        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
            "data": data,
        });

        if let Some(e) = &self.errors {
            base["errors"] = e.clone();
        }
        base
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadGateway, msg)
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    /// Credential or configuration failure: needs an operator, not a retry.
    pub fn misconfigured(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
            .retryable(false)
            .with_data(json!({ "reason": "credential" }))
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience helper for "bail with RelayError".
#[macro_export]
macro_rules! bail_relay {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::RelayError::$ctor($msg).into_anyhow());
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::RelayError::$ctor(format!($fmt, $($arg)*)).into_anyhow());
    };
}
