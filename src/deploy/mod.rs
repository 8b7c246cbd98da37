//! Encoding and publishing compositions.
//!
//! [`encode`](encode::encode) turns a composition's attached
//! sub-compositions into deployable conductor actions;
//! [`DeployClient`](client::DeployClient) publishes the attached actions
//! through the platform's management API, deleting any previous copy first
//! so each attachment reaches at-most-once final state.

/// Management-API deployment client.
pub mod client;
/// Conductor-source emission and the `encode` transformation.
pub mod encode;

pub use client::{DeployClient, DeployConfig};
pub use encode::{conductor_source, encode};

use thiserror::Error;

/// Convenience result alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors surfaced while publishing a composition.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Transport-level failure talking to the management API.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The management API rejected a request.
    #[error("management API returned {status} for {name}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Action the request was about.
        name: String,
        /// Response body, best effort.
        message: String,
    },

    /// The authorization key is not of the form `user:password`.
    #[error("invalid authorization key (expected user:password)")]
    InvalidAuth,

    /// A required configuration value is absent.
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// An attached action name does not split into namespace and action.
    #[error("undeployable action name: {0:?}")]
    BadName(String),

    /// Failure while building the composition to publish.
    #[error("composition error: {0}")]
    Compose(#[from] crate::compose::ComposeError),

    /// Serialization failure while rendering a payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
