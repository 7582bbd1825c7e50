//! Deployment targets
//!
//! Servers (for remote deployment) and registries (for image pushes) are
//! reference data resolved by the configuration layer. The engine never
//! mutates them.

use serde::Deserialize;

fn default_ssh_port() -> u16 {
    22
}

/// Remote host reachable over SSH
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Server {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: ServerAuth,
}

impl Server {
    /// `user@host:port`, for display
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Exactly one authentication method per server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerAuth {
    Password { password: String },
    Key { key_path: String },
}

/// Container image registry
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Registry {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Registry {
    /// Login is only attempted when credentials are configured
    pub fn requires_login(&self) -> bool {
        !self.username.is_empty()
    }
}
