//! Deployment client for the platform management API.
//!
//! Publishing is serial and idempotent per attachment: each action is first
//! deleted (a missing action is not an error) and then updated with
//! `overwrite=true`, so re-running a deployment converges on the same final
//! state.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::compose::ast::AttachedAction;

use super::{DeployError, Result};

const APIHOST_ENV: &str = "BATON_APIHOST";
const AUTH_ENV: &str = "BATON_AUTH";

/// Connection settings for the management API.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// API host, with or without an explicit scheme.
    pub apihost: String,
    /// Authorization key of the form `user:password`.
    pub auth: String,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
}

impl DeployConfig {
    /// Resolve settings from explicit values with environment fallbacks
    /// (`BATON_APIHOST`, `BATON_AUTH`).
    pub fn resolve(
        apihost: Option<String>,
        auth: Option<String>,
        insecure: bool,
    ) -> Result<DeployConfig> {
        let apihost = apihost
            .or_else(|| non_empty_env(APIHOST_ENV))
            .ok_or(DeployError::MissingConfig("apihost"))?;
        let auth = auth
            .or_else(|| non_empty_env(AUTH_ENV))
            .ok_or(DeployError::MissingConfig("auth"))?;
        Ok(DeployConfig {
            apihost,
            auth,
            insecure,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Client publishing attached actions through the management API.
pub struct DeployClient {
    base: String,
    user: String,
    password: String,
    http: Client,
}

impl DeployClient {
    /// Build a client from connection settings.
    pub fn new(config: DeployConfig) -> Result<DeployClient> {
        let (user, password) = config
            .auth
            .split_once(':')
            .ok_or(DeployError::InvalidAuth)?;
        let mut builder = Client::builder();
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;
        Ok(DeployClient {
            base: normalize_base(&config.apihost),
            user: user.to_string(),
            password: password.to_string(),
            http,
        })
    }

    /// Publish every attached action, in order.
    pub fn deploy(&self, actions: &[AttachedAction]) -> Result<()> {
        for record in actions {
            self.delete(&record.name)?;
            self.update(record)?;
            info!(action = %record.name, "deployed");
        }
        Ok(())
    }

    /// Delete any previous copy of an action; a missing action is fine.
    fn delete(&self, name: &str) -> Result<()> {
        let url = self.action_url(name)?;
        debug!(action = %name, "deleting previous copy");
        let response = self
            .http
            .delete(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(name, response))
        }
    }

    fn update(&self, record: &AttachedAction) -> Result<()> {
        let url = format!("{}?overwrite=true", self.action_url(&record.name)?);
        debug!(action = %record.name, "updating");
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&record.action)
            .send()?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(&record.name, response))
        }
    }

    fn action_url(&self, name: &str) -> Result<String> {
        let trimmed = name.strip_prefix('/').unwrap_or(name);
        let (namespace, action) = trimmed
            .split_once('/')
            .ok_or_else(|| DeployError::BadName(name.to_string()))?;
        Ok(format!(
            "{}/api/v1/namespaces/{}/actions/{}",
            self.base, namespace, action
        ))
    }
}

fn api_error(name: &str, response: Response) -> DeployError {
    let status = response.status().as_u16();
    let message = response.text().unwrap_or_default();
    DeployError::Api {
        status,
        name: name.to_string(),
        message,
    }
}

fn normalize_base(apihost: &str) -> String {
    let base = if apihost.starts_with("http://") || apihost.starts_with("https://") {
        apihost.to_string()
    } else {
        format!("https://{}", apihost)
    };
    base.trim_end_matches('/').to_string()
}
