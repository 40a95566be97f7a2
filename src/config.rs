use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

fn default_body_limit_mb() -> usize {
    5
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Where to fetch the weights from when `path` does not exist yet.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_fallback_to_untrained")]
    pub fallback_to_untrained: bool,
    #[serde(default = "default_max_concurrent_inferences")]
    pub max_concurrent_inferences: usize,
}

fn default_fallback_to_untrained() -> bool {
    true
}

fn default_max_concurrent_inferences() -> usize {
    2
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_inferences == 0 {
            return Err("model.max_concurrent_inferences must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = settings.try_deserialize::<Config>()?;

    if let Err(e) = config.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let config = parse(
            "log_level: INFO\nserver:\n  host: 0.0.0.0\n  port: 8000\nmodel:\n  path: model.safetensors\n",
        );

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.get_address(), "0.0.0.0:8000");
        assert_eq!(config.server.body_limit_bytes(), 5 * 1024 * 1024);
        assert!(config.model.url.is_none());
        assert!(config.model.fallback_to_untrained);
        assert_eq!(config.model.max_concurrent_inferences, 2);
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let result: Result<LogLevel, _> = "trace".to_string().try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_names_are_case_insensitive() {
        let environment: Environment = "Production".to_string().try_into().unwrap();
        assert_eq!(environment.as_str(), "production");

        let result: Result<Environment, _> = "staging".to_string().try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_inference_slots_is_invalid() {
        let config = parse(
            "log_level: debug\nserver:\n  host: 127.0.0.1\n  port: 1\nmodel:\n  path: m.safetensors\n  max_concurrent_inferences: 0\n",
        );

        assert!(config.model.validate().is_err());
    }
}
