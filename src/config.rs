use std::{env, str::FromStr};

use thiserror::Error;

/// Image extensions accepted by the prediction endpoints.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Side length of the square image both classifiers expect.
pub const IMAGE_SIZE: u32 = 224;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_max_connections: u32,
    pub port: u16,
    pub body_limit_mb: usize,
    pub nutrient_model_path: String,
    pub nutrient_model_url: Option<String>,
    pub plant_model_path: String,
    pub plant_model_url: Option<String>,
    pub input_op: String,
    pub output_op: String,
    pub allowed_extensions: Vec<String>,
    pub image_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_host: "localhost".into(),
            db_port: 3306,
            db_user: "root".into(),
            db_password: "password".into(),
            db_name: "hidroqu".into(),
            db_max_connections: 5,
            port: 5000,
            body_limit_mb: 5,
            nutrient_model_path: "./model/nutrient.pb".into(),
            nutrient_model_url: None,
            plant_model_path: "./model/plant.pb".into(),
            plant_model_url: None,
            input_op: "x".into(),
            output_op: "Identity".into(),
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            image_size: IMAGE_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source, falling back to
    /// the defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let db_port = parse(&lookup, "MYSQL_DATABASE_PORT", defaults.db_port)?;
        let (db_host, db_port) =
            split_host_port(&string("MYSQL_DATABASE_HOST", defaults.db_host), db_port)?;

        Ok(Config {
            db_host,
            db_port,
            db_user: string("MYSQL_DATABASE_USER", defaults.db_user),
            db_password: string("MYSQL_DATABASE_PASSWORD", defaults.db_password),
            db_name: string("MYSQL_DATABASE_DB", defaults.db_name),
            db_max_connections: parse(
                &lookup,
                "MYSQL_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            port: parse(&lookup, "PORT", defaults.port)?,
            body_limit_mb: parse(&lookup, "BODY_LIMIT_MB", defaults.body_limit_mb)?,
            nutrient_model_path: string("NUTRIENT_MODEL_PATH", defaults.nutrient_model_path),
            nutrient_model_url: lookup("NUTRIENT_MODEL_URL"),
            plant_model_path: string("PLANT_MODEL_PATH", defaults.plant_model_path),
            plant_model_url: lookup("PLANT_MODEL_URL"),
            input_op: string("MODEL_INPUT_OP", defaults.input_op),
            output_op: string("MODEL_OUTPUT_OP", defaults.output_op),
            allowed_extensions: defaults.allowed_extensions,
            image_size: defaults.image_size,
        })
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }
}

/// `host:port` overrides the separately configured port. Hosts with more
/// than one colon are IPv6 literals and are left untouched.
fn split_host_port(host: &str, port: u16) -> Result<(String, u16), ConfigError> {
    match host.split_once(':') {
        Some((name, suffix)) if !suffix.contains(':') => {
            let port = suffix.parse().map_err(|_| ConfigError::Invalid {
                key: "MYSQL_DATABASE_HOST",
                value: host.to_string(),
            })?;
            Ok((name.to_string(), port))
        }
        _ => Ok((host.to_string(), port)),
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
