use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags that were actually given are merged over
/// the file and environment layers.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "sportsline-server", version, about = "Sportsline real-time hub")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, env = "SPORTSLINE_CONFIG", default_value = "./sportsline.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Deployment environment: "development" or "production"
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Seconds between heartbeat sweeps
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    /// "development" or "production"
    pub environment: String,
    /// HS256 secret used to validate access tokens on the WebSocket upgrade.
    /// Deliberately not settable from the command line.
    pub jwt_secret: Option<String>,
    pub heartbeat_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            environment: "development".to_string(),
            jwt_secret: None,
            heartbeat_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SPORTSLINE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    fn figment(cli: Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("SPORTSLINE_").ignore(&["config"]))
            .merge(Serialized::defaults(cli))
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Hub settings derived from the server config.
    pub fn hub(&self) -> HubConfig {
        HubConfig {
            heartbeat_interval: self.heartbeat_interval(),
        }
    }
}

/// Settings the hub itself needs at construction time.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Sportsline Real-time Hub Configuration
# Place this file at ./sportsline.toml or specify with --config <path>
# All settings can be overridden via environment variables (SPORTSLINE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3001)
# port = 3001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# "development" or "production".
# In production the server refuses to start without jwt_secret.
# environment = "development"

# Secret used to validate access tokens presented on /ws?token=...
# Prefer SPORTSLINE_JWT_SECRET over writing it here.
# jwt_secret = ""

# Seconds between heartbeat sweeps. A silent connection is dropped
# after at most two intervals.
# heartbeat_interval_secs = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_file(path: &str) -> Cli {
        Cli {
            config: path.to_string(),
            ..Cli::default()
        }
    }

    #[test]
    fn env_overrides_file_and_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "sportsline.toml",
                r#"
                    port = 4000
                    environment = "production"
                    heartbeat_interval_secs = 10
                "#,
            )?;
            jail.set_env("SPORTSLINE_PORT", "5000");
            jail.set_env("SPORTSLINE_JWT_SECRET", "from-env");

            let config: Config = Config::figment(cli_with_file("sportsline.toml")).extract()?;

            assert_eq!(config.port, 5000);
            assert!(config.is_production());
            assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
            assert_eq!(config.jwt_secret.as_deref(), Some("from-env"));
            assert_eq!(config.bind_address, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn cli_flags_win_but_unset_flags_do_not_clobber() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("sportsline.toml", "port = 4000\nbind_address = \"127.0.0.1\"")?;

            let cli = Cli {
                port: Some(6000),
                ..cli_with_file("sportsline.toml")
            };
            let config: Config = Config::figment(cli).extract()?;

            assert_eq!(config.port, 6000);
            assert_eq!(config.bind_address, "127.0.0.1");
            assert_eq!(config.heartbeat_interval_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config: Config = Config::figment(cli_with_file("absent.toml")).extract()?;
            assert_eq!(config.port, 3001);
            assert!(!config.is_production());
            Ok(())
        });
    }

    #[test]
    fn environment_check_is_case_insensitive() {
        let config = Config {
            environment: "Production".to_string(),
            ..Config::default()
        };
        assert!(config.is_production());
        assert!(!Config::default().is_production());
    }
}
