//! Authentication for the HTTP transport.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::ConfigError;
use crate::extensions::WorkerExtension;
use crate::http::TransportConfig;

/// Sends an `Authorization: <scheme> <token>` header with every request.
#[derive(Debug, Clone)]
pub struct Auth {
    scheme: String,
    token: String,
}

impl Auth {
    pub fn new(
        scheme: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let scheme = scheme.into();
        let token = token.into();

        let invalid = |reason: &str| ConfigError::InvalidExtension {
            extension: "auth",
            reason: reason.to_string(),
        };

        if scheme.is_empty() {
            return Err(invalid("scheme must not be empty"));
        }
        if token.is_empty() {
            return Err(invalid("token must not be empty"));
        }

        Ok(Self { scheme, token })
    }

    /// Bearer-token authentication.
    pub fn bearer(token: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new("Bearer", token)
    }
}

impl WorkerExtension for Auth {
    fn configure_transport(&self, config: &mut TransportConfig) -> Result<(), ConfigError> {
        config.push_header("Authorization", format!("{} {}", self.scheme, self.token));
        Ok(())
    }
}

/// HTTP basic authentication.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    inner: Auth,
}

impl BasicAuth {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let username = username.into();
        let password = password.into();

        if username.is_empty() {
            return Err(ConfigError::InvalidExtension {
                extension: "basic-auth",
                reason: "username must not be empty".to_string(),
            });
        }

        let token = STANDARD.encode(format!("{username}:{password}"));
        Ok(Self {
            inner: Auth::new("Basic", token)?,
        })
    }
}

impl WorkerExtension for BasicAuth {
    fn configure_transport(&self, config: &mut TransportConfig) -> Result<(), ConfigError> {
        self.inner.configure_transport(config)
    }
}
