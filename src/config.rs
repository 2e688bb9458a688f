use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};

fn default_log_filename() -> String {
    "snmpflapd.log".to_string()
}
fn default_log_level() -> String {
    "warning".to_string()
}
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    162
}
fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_user() -> String {
    "root".to_string()
}
fn default_db_name() -> String {
    "snmpflapd".to_string()
}
fn default_db_password() -> String {
    String::new()
}
fn default_community() -> String {
    String::new()
}
fn default_cleanup_interval() -> u64 {
    60
}

/// Daemon configuration, resolved from the TOML file then overlaid with
/// environment variables (see `apply_env`). Field names match the keys
/// used by the configuration file verbatim.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "LogFilename")]
    pub log_filename: String,
    #[serde(rename = "LogLevel")]
    pub log_level: String,
    #[serde(rename = "ListenAddress")]
    pub listen_address: String,
    #[serde(rename = "ListenPort")]
    pub listen_port: u16,
    #[serde(rename = "DBHost")]
    pub db_host: String,
    #[serde(rename = "DBName")]
    pub db_name: String,
    #[serde(rename = "DBUser")]
    pub db_user: String,
    #[serde(rename = "DBPassword")]
    pub db_password: String,
    #[serde(rename = "Community")]
    pub community: String,
    #[serde(rename = "CleanUpInterval")]
    pub cleanup_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_filename: default_log_filename(),
            log_level: default_log_level(),
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            db_host: default_db_host(),
            db_name: default_db_name(),
            db_user: default_db_user(),
            db_password: default_db_password(),
            community: default_community(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Config {
    pub fn listen_socket_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    /// DSN for the `mysql` sqlx driver.
    pub fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_name
        )
    }

    /// Parses `log_level` into a `log::LevelFilter`. An unrecognized level
    /// is startup-fatal (spec's exit-code contract lists "unknown log
    /// level" alongside a bad `LISTEN_PORT`), so the caller propagates this
    /// error straight out of `main`.
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        parse_log_level(&self.log_level)
    }
}

/// `log::LevelFilter::from_str` only recognizes `"warn"`, not the
/// `"warning"` this daemon's own default config value spells out, so
/// `"warning"` is normalized before handing off to it.
fn parse_log_level(level: &str) -> Result<LevelFilter> {
    let canonical = if level.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        level
    };
    LevelFilter::from_str(canonical).with_context(|| format!("unknown log level {:?}", level))
}

/// Loads the configuration file (non-fatal if missing) then applies the
/// environment overlay on top of it.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).is_file() {
        debug!("config(file={}): loading", path);
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path))?;
        toml::from_str(&contents)
            .with_context(|| format!("unable to parse config file {}", path))?
    } else {
        debug!(
            "config(file={}): not found, falling back to defaults + environment",
            path
        );
        Config::default()
    };

    apply_env(&mut config)?;
    Ok(config)
}

/// Applies the environment-variable overlay on top of the file-loaded
/// config. `LISTEN_PORT` must parse as an integer or this returns an
/// error (the caller treats that as startup-fatal, exit code 1).
fn apply_env(config: &mut Config) -> Result<()> {
    if let Ok(v) = env::var("LOGFILE") {
        config.log_filename = v;
    }
    if let Ok(v) = env::var("LOGLEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = env::var("LISTEN_ADDRESS") {
        config.listen_address = v;
    }
    if let Ok(v) = env::var("LISTEN_PORT") {
        config.listen_port = v
            .parse()
            .with_context(|| format!("LISTEN_PORT={:?} is not a valid port number", v))?;
    }
    if let Ok(v) = env::var("DBHOST") {
        config.db_host = v;
    }
    if let Ok(v) = env::var("DBNAME") {
        config.db_name = v;
    }
    if let Ok(v) = env::var("DBUSER") {
        config.db_user = v;
    }
    if let Ok(v) = env::var("DBPASSWORD") {
        config.db_password = v;
    }
    if let Ok(v) = env::var("COMMUNITY") {
        config.community = v;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.listen_port, 162);
        assert_eq!(config.listen_address, "0.0.0.0");
        assert_eq!(config.cleanup_interval, 60);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load("/nonexistent/path/settings.conf").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml_text = r#"
            ListenPort = 1620
            Community = "public"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.listen_port, 1620);
        assert_eq!(config.community, "public");
        // untouched keys keep their defaults via #[serde(default)]
        assert_eq!(config.db_name, "snmpflapd");
    }

    #[test]
    fn bad_listen_port_env_is_rejected() {
        std::env::set_var("LISTEN_PORT", "not-a-number");
        let mut config = Config::default();
        let result = apply_env(&mut config);
        std::env::remove_var("LISTEN_PORT");
        assert!(result.is_err());
    }

    #[test]
    fn default_log_level_parses_as_warn() {
        let config = Config::default();
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Warn);
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let mut config = Config::default();
        config.log_level = "Debug".to_string();
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = Config::default();
        config.log_level = "verbose".to_string();
        assert!(config.log_level_filter().is_err());
    }
}
