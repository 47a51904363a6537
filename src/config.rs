use std::env;
use std::path::Path;

use rand::RngCore;
use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rabbitmq: RabbitMqConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RabbitMqConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebSocketConfig {
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub ride_service_port: u16,
    #[serde(default)]
    pub driver_location_service_port: u16,
    #[serde(default)]
    pub admin_service_port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret_key: String,
}

impl Config {
    /// Loads the config from `CONFIG_PATH` (default `config.yaml`), applies
    /// defaults and validates required keys.
    pub fn load() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            AppError::Internal(format!(
                "failed to read config file {}: {err}",
                path.as_ref().display()
            ))
        })?;

        let mut cfg: Config = serde_yaml::from_str(&raw)
            .map_err(|err| AppError::Internal(format!("failed to parse config file: {err}")))?;

        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.database.host.is_empty() {
            self.database.host = "localhost".to_string();
        }
        if self.database.port == 0 {
            self.database.port = 5432;
        }
        if self.rabbitmq.host.is_empty() {
            self.rabbitmq.host = "localhost".to_string();
        }
        if self.rabbitmq.port == 0 {
            self.rabbitmq.port = 5672;
        }
        if self.websocket.port == 0 {
            self.websocket.port = 8080;
        }
        if self.services.ride_service_port == 0 {
            self.services.ride_service_port = 3000;
        }
        if self.services.driver_location_service_port == 0 {
            self.services.driver_location_service_port = 3001;
        }
        if self.services.admin_service_port == 0 {
            self.services.admin_service_port = 3004;
        }
        if self.jwt.secret_key.is_empty() {
            self.jwt.secret_key = generated_secret();
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();

        if self.database.user.is_empty() {
            problems.push("database.user is required");
        }
        if self.database.password.is_empty() {
            problems.push("database.password is required");
        }
        if self.database.name.is_empty() {
            problems.push("database.name is required");
        }
        if self.rabbitmq.user.is_empty() {
            problems.push("rabbitmq.user is required");
        }
        if self.rabbitmq.password.is_empty() {
            problems.push("rabbitmq.password is required");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Internal(format!(
                "invalid config: {}",
                problems.join("; ")
            )))
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name
        )
    }

    pub fn amqp_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.rabbitmq.user, self.rabbitmq.password, self.rabbitmq.host, self.rabbitmq.port
        )
    }
}

// hex is fine here; the generated secret only has to be unguessable
fn generated_secret() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::Config;

    fn parse(yaml: &str) -> Config {
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.apply_defaults();
        cfg
    }

    #[test]
    fn defaults_are_applied_for_missing_optional_keys() {
        let cfg = parse(
            r#"
database:
  user: app
  password: secret
  name: ridehail
rabbitmq:
  user: guest
  password: guest
"#,
        );

        assert_eq!(cfg.database.host, "localhost");
        assert_eq!(cfg.database.port, 5432);
        assert_eq!(cfg.rabbitmq.port, 5672);
        assert_eq!(cfg.services.ride_service_port, 3000);
        assert_eq!(cfg.services.driver_location_service_port, 3001);
        assert_eq!(cfg.services.admin_service_port, 3004);
        assert!(!cfg.jwt.secret_key.is_empty());
    }

    #[test]
    fn missing_required_database_keys_fail_validation() {
        let cfg = parse("rabbitmq:\n  user: guest\n  password: guest\n");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn urls_are_assembled_from_sections() {
        let cfg = parse(
            r#"
database:
  host: db
  user: app
  password: secret
  name: ridehail
rabbitmq:
  host: mq
  user: guest
  password: guest
"#,
        );
        assert_eq!(cfg.database_url(), "postgres://app:secret@db:5432/ridehail");
        assert_eq!(cfg.amqp_url(), "amqp://guest:guest@mq:5672/%2f");
    }
}
