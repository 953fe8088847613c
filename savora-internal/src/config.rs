use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, ErrorDetails};

/// Top-level gateway configuration, loaded from a TOML file.
///
/// Secrets (store URL, generator API key) are read from the environment, not
/// the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Per-endpoint fixed-window quota settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_generate_plan")]
    pub generate_plan: EndpointLimit,
    #[serde(default = "LimitsConfig::default_swap_meal")]
    pub swap_meal: EndpointLimit,
    #[serde(default = "LimitsConfig::default_substitute_ingredient")]
    pub substitute_ingredient: EndpointLimit,
}

impl LimitsConfig {
    fn default_generate_plan() -> EndpointLimit {
        EndpointLimit {
            limit: 10,
            window_seconds: 86_400,
        }
    }

    fn default_swap_meal() -> EndpointLimit {
        EndpointLimit {
            limit: 20,
            window_seconds: 3_600,
        }
    }

    fn default_substitute_ingredient() -> EndpointLimit {
        EndpointLimit {
            limit: 20,
            window_seconds: 3_600,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            generate_plan: Self::default_generate_plan(),
            swap_meal: Self::default_swap_meal(),
            substitute_ingredient: Self::default_substitute_ingredient(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointLimit {
    pub limit: u32,
    pub window_seconds: u64,
}

impl EndpointLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default = "GeneratorConfig::default_api_base")]
    pub api_base: String,
    /// Generation calls tolerate slow external producers; see
    /// `MealGeneratorProvider` for how the timeout is applied per request.
    #[serde(default = "GeneratorConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl GeneratorConfig {
    fn default_api_base() -> String {
        "http://localhost:8000".to_string()
    }

    fn default_timeout_seconds() -> u64 {
        300
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            timeout_seconds: Self::default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Environment the platform tokens must be issued for.
    #[serde(default = "SubscriptionConfig::default_environment")]
    pub environment: String,
    /// Hex SHA-256 fingerprints of trusted platform root certificates. The
    /// last certificate of every x5c chain must match one of these.
    #[serde(default)]
    pub root_fingerprints: Vec<String>,
}

impl SubscriptionConfig {
    fn default_environment() -> String {
        "Production".to_string()
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            environment: Self::default_environment(),
            root_fingerprints: Vec::new(),
        }
    }
}

impl Config {
    pub async fn load_and_verify_from_path(path: &Path) -> Result<Self, Error> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::new(ErrorDetails::FileRead {
                message: e.to_string(),
                file_path: path.to_string_lossy().to_string(),
            })
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!(
                    "Failed to parse config file {}: {e}",
                    path.to_string_lossy()
                ),
            })
        })?;
        config.verify()?;
        Ok(config)
    }

    fn verify(&self) -> Result<(), Error> {
        for (name, limit) in [
            ("generate_plan", &self.gateway.limits.generate_plan),
            ("swap_meal", &self.gateway.limits.swap_meal),
            (
                "substitute_ingredient",
                &self.gateway.limits.substitute_ingredient,
            ),
        ] {
            if limit.limit == 0 || limit.window_seconds == 0 {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!(
                        "`gateway.limits.{name}` must have a nonzero limit and window"
                    ),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway.limits.generate_plan.limit, 10);
        assert_eq!(config.gateway.limits.generate_plan.window_seconds, 86_400);
        assert_eq!(config.generator.timeout_seconds, 300);
        assert_eq!(config.subscription.environment, "Production");
    }

    #[test]
    fn test_parse_with_overrides() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            bind_address = "0.0.0.0:3000"
            debug = true

            [gateway.limits.generate_plan]
            limit = 3
            window_seconds = 60

            [generator]
            api_base = "https://generator.internal"
            timeout_seconds = 120

            [subscription]
            environment = "Sandbox"
            root_fingerprints = ["aa"]
            "#,
        )
        .unwrap();

        assert!(config.gateway.debug);
        assert_eq!(config.gateway.limits.generate_plan.limit, 3);
        // Untouched endpoints keep their defaults
        assert_eq!(config.gateway.limits.swap_meal.limit, 20);
        assert_eq!(config.generator.api_base, "https://generator.internal");
        assert_eq!(config.subscription.environment, "Sandbox");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config: Config = toml::from_str(
            r#"
            [gateway.limits.swap_meal]
            limit = 0
            window_seconds = 60
            "#,
        )
        .unwrap();
        assert!(config.verify().is_err());
    }
}
