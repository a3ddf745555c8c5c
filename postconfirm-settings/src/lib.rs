//! Read-only typed configuration surface (component H). Postconfirm
//! itself never parses a config file or argv — it only consumes
//! whatever already-loaded key/value view is handed to it — but every
//! key named in the external interface is read exactly once at startup
//! into this typed [`AppConfig`], so nothing re-reads [`Settings`]
//! per-message.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// A read-only key/value view over already-loaded configuration.
/// Implemented once over a `HashMap` for tests, and once over whatever
/// the external config-file loader hands the process at runtime.
pub trait Settings {
    fn get(&self, key: &str) -> Option<&str>;
}

impl Settings for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration key {0:?}")]
    MissingKey(&'static str),
    #[error("configuration key {key:?} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("could not read key file {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub milter_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub remail_sender: String,
    pub key_file: PathBuf,
    pub mail_template: PathBuf,
    pub admin_address: String,
    pub bulk_regex: String,
    pub auto_submitted_regex: String,
    pub resend_confirmation: bool,
    pub db: DbConfig,
}

fn required<'a>(settings: &'a dyn Settings, key: &'static str) -> Result<&'a str, ConfigError> {
    settings.get(key).ok_or(ConfigError::MissingKey(key))
}

fn parse_u16(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: "not a valid port number",
    })
}

fn parse_bool(key: &'static str, value: &str, default: bool) -> Result<bool, ConfigError> {
    match value.trim() {
        "" => Ok(default),
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "expected a boolean",
        }),
    }
}

impl AppConfig {
    /// Reads every key named in the external interface exactly once;
    /// `resend_confirmation` defaults to `true` when absent.
    pub fn load(settings: &dyn Settings) -> Result<AppConfig, ConfigError> {
        let key_file = PathBuf::from(required(settings, "key_file")?);
        let db = DbConfig {
            name: required(settings, "db.name")?.to_owned(),
            user: required(settings, "db.user")?.to_owned(),
            password: required(settings, "db.password")?.to_owned(),
            host: required(settings, "db.host")?.to_owned(),
            port: parse_u16("db.port", required(settings, "db.port")?)?,
        };

        Ok(AppConfig {
            milter_port: parse_u16("milter_port", settings.get("milter_port").unwrap_or("1999"))?,
            smtp_host: settings.get("smtp_host").unwrap_or("localhost").to_owned(),
            smtp_port: parse_u16("smtp_port", settings.get("smtp_port").unwrap_or("25"))?,
            remail_sender: settings.get("remail_sender").unwrap_or("<>").to_owned(),
            key_file,
            mail_template: PathBuf::from(required(settings, "mail_template")?),
            admin_address: required(settings, "admin_address")?.to_owned(),
            bulk_regex: required(settings, "bulk_regex")?.to_owned(),
            auto_submitted_regex: required(settings, "auto_submitted_regex")?.to_owned(),
            resend_confirmation: parse_bool(
                "resend_confirmation",
                settings.get("resend_confirmation").unwrap_or(""),
                true,
            )?,
            db,
        })
    }

    /// Loads the HMAC key bytes from `self.key_file`; a missing or
    /// unreadable key file is a fatal startup error (§7).
    pub fn read_key(&self) -> Result<Vec<u8>, ConfigError> {
        fs::read(&self.key_file).map_err(|source| ConfigError::KeyFile {
            path: self.key_file.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fills_in_defaults() {
        let s = settings(&[
            ("key_file", "/etc/postconfirm/key"),
            ("mail_template", "/etc/postconfirm/template.mustache"),
            ("admin_address", "admin@example.net"),
            ("bulk_regex", "bulk"),
            ("auto_submitted_regex", "auto-replied"),
            ("db.name", "postconfirm"),
            ("db.user", "postconfirm"),
            ("db.password", "hunter2"),
            ("db.host", "localhost"),
            ("db.port", "5432"),
        ]);
        let config = AppConfig::load(&s).unwrap();
        assert_eq!(config.milter_port, 1999);
        assert_eq!(config.smtp_host, "localhost");
        assert!(config.resend_confirmation);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let s = settings(&[]);
        assert!(AppConfig::load(&s).is_err());
    }
}
