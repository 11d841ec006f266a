//! Error types and handling for the presence server.
//!
//! This module defines the error types that can occur during server operations,
//! providing clear categorization of different failure modes.

/// Enumeration of possible server errors.
///
/// Categorizes errors into authentication, network, store, and internal
/// failures to help with debugging and error handling. Only authentication
/// failures are fatal to a connection; store failures degrade behavior and
/// network failures end the offending connection alone.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The bearer token was missing, malformed, or expired
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Network-related errors such as binding failures or handshake issues
    #[error("network error: {0}")]
    Network(String),

    /// A backing store rejected or failed an operation
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Authentication failures encountered while establishing a session.
///
/// All variants close the socket with a policy-violation status before any
/// session state is created.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token was supplied with the connection request
    #[error("missing bearer token")]
    MissingToken,

    /// The token did not validate against the configured secret
    #[error("invalid bearer token")]
    InvalidToken,

    /// The token validated but its expiry has passed
    #[error("expired bearer token")]
    ExpiredToken,
}

/// Failures raised by the fast or durable store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database rejected the operation
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
