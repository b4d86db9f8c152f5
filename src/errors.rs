// src/errors.rs

//! Crate-wide error type. One variant per failure kind named in the error
//! handling design, plus the handful of upstream error types RidgeDB
//! actually produces.

use std::sync::Arc;

/// The status byte a handler maps an error to on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    Invalid = 1,
    NotFound = 2,
    Exists = 3,
    Full = 4,
    Empty = 5,
    Timeout = 6,
    Network = 7,
    NoMem = 8,
    NotLeader = 9,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RidgeError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    Exists,

    #[error("datastore is full")]
    Full,

    #[error("requested collection is empty")]
    Empty,

    #[error("operation timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("out of memory")]
    NoMem,

    #[error("not the leader{}", .leader_hint.as_ref().map(|h| format!(", try {h}")).unwrap_or_default())]
    NotLeader { leader_hint: Option<String> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] IoErrorWrapper),

    #[error("config error: {0}")]
    Config(String),
}

impl RidgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RidgeError::Invalid(_) => StatusCode::Invalid,
            RidgeError::NotFound => StatusCode::NotFound,
            RidgeError::Exists => StatusCode::Exists,
            RidgeError::Full => StatusCode::Full,
            RidgeError::Empty => StatusCode::Empty,
            RidgeError::Timeout => StatusCode::Timeout,
            RidgeError::Network(_) => StatusCode::Network,
            RidgeError::NoMem => StatusCode::NoMem,
            RidgeError::NotLeader { .. } => StatusCode::NotLeader,
            RidgeError::Protocol(_) => StatusCode::Invalid,
            RidgeError::Io(_) => StatusCode::Network,
            RidgeError::Config(_) => StatusCode::Invalid,
        }
    }
}

/// `std::io::Error` is not `Clone`, so it is wrapped in an `Arc` the same way
/// the teacher's error enum wraps non-Clone upstream errors.
#[derive(Debug, Clone)]
pub struct IoErrorWrapper(pub Arc<std::io::Error>);

impl std::fmt::Display for IoErrorWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoErrorWrapper {}

impl PartialEq for IoErrorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<std::io::Error> for RidgeError {
    fn from(e: std::io::Error) -> Self {
        RidgeError::Io(IoErrorWrapper(Arc::new(e)))
    }
}

impl PartialEq for RidgeError {
    fn eq(&self, other: &Self) -> bool {
        self.status_code() == other.status_code()
    }
}

impl From<std::num::ParseIntError> for RidgeError {
    fn from(e: std::num::ParseIntError) -> Self {
        RidgeError::Invalid(e.to_string())
    }
}

impl From<toml::de::Error> for RidgeError {
    fn from(e: toml::de::Error) -> Self {
        RidgeError::Config(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for RidgeError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RidgeError::Protocol(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for RidgeError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RidgeError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RidgeError>;
