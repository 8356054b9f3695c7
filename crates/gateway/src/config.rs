//! Gateway configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! then `PRIXAGENT__SECTION__KEY` environment variables (for example
//! `PRIXAGENT__SERVER__BIND_ADDRESS=0.0.0.0:8080`).

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use prixagent_conversation_core::OrchestratorConfig;
use prixagent_providers::{ElevenLabsConfig, TwilioConfig};

use crate::auth::JwtConfig;
use crate::error::GatewayError;
use crate::logging::LoggingConfig;

pub const ENV_PREFIX: &str = "PRIXAGENT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub auth: JwtConfig,
    pub telephony: TelephonyConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub twilio: TwilioConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Allowed dashboard origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

/// Which provider places outbound calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundDialer {
    /// ElevenLabs dials through its Twilio integration and hosts the audio
    #[default]
    Elevenlabs,
    /// Twilio dials and streams media through this gateway
    Twilio,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub outbound_dialer: OutboundDialer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://` URL; `None` keeps call records in memory
    pub url: Option<String>,
    pub max_connections: u32,
    /// Mark records left `in-progress` by a previous process as failed
    pub reconcile_on_startup: bool,
    pub restart_reason: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            reconcile_on_startup: true,
            restart_reason: "orchestrator_restart".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        self.orchestrator.validate().map_err(|e| GatewayError::Config(e.to_string()))?;
        self.auth.validate().map_err(GatewayError::Config)?;
        self.elevenlabs.validate().map_err(GatewayError::Config)?;
        if self.telephony.outbound_dialer == OutboundDialer::Twilio {
            self.twilio.validate().map_err(GatewayError::Config)?;
        }
        if self.database.max_connections == 0 {
            return Err(GatewayError::Config("database max_connections must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const SECRET_VAR: &str = "PRIXAGENT__AUTH__JWT_SECRET";

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.telephony.outbound_dialer, OutboundDialer::Elevenlabs);
        assert_eq!(config.database.restart_reason, "orchestrator_restart");
        assert_eq!(config.orchestrator.idle_timeout_secs, 300);
    }

    #[test]
    #[serial]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_address = "0.0.0.0:9000"

[auth]
jwt_secret = "from-file-secret-0123456789abcdef"

[orchestrator]
idle_timeout_secs = 60

[telephony]
outbound_dialer = "elevenlabs"
"#
        )
        .unwrap();

        std::env::set_var(SECRET_VAR, "from-env-secret-0123456789abcdef");
        let loaded = GatewayConfig::load(Some(file.path()));
        std::env::remove_var(SECRET_VAR);

        let config = loaded.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.orchestrator.idle_timeout_secs, 60);
        assert_eq!(config.orchestrator.sweep_interval_secs, 30);
        assert_eq!(config.auth.jwt_secret, "from-env-secret-0123456789abcdef");
    }

    #[test]
    #[serial]
    fn test_twilio_dialer_requires_twilio_credentials() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[auth]
jwt_secret = "from-file-secret-0123456789abcdef"

[telephony]
outbound_dialer = "twilio"
"#
        )
        .unwrap();

        let err = GatewayConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, GatewayError::Config(ref m) if m.contains("twilio")));
    }
}
