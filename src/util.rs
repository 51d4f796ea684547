use std::env;
use std::path::PathBuf;

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use thiserror::Error;
use tokio::time::Duration;

pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

pub const VAR_TOPIC: &str = "TOPIC";
pub const VAR_TEAM_ID: &str = "TEAM_ID";
pub const VAR_TOKEN_KEY_PATH: &str = "TOKEN_KEY_PATH";
pub const VAR_AUTH_KEY_ID: &str = "AUTH_KEY_ID";
pub const VAR_APNS_HOST_NAME: &str = "APNS_HOST_NAME";
pub const VAR_APNS_PUSH_TYPE: &str = "APNS_PUSH_TYPE";
pub const VAR_PUSH_DELAY_MS: &str = "PUSH_DELAY_MS";
pub const VAR_PUSH_SEND_TIMEOUT_S: &str = "PUSH_SEND_TIMEOUT_S";
pub const VAR_DRY_RUN: &str = "DRY_RUN";

pub const REQUIRED_APNS_VARS: [&str; 5] = [
    VAR_TOPIC,
    VAR_TEAM_ID,
    VAR_TOKEN_KEY_PATH,
    VAR_AUTH_KEY_ID,
    VAR_APNS_HOST_NAME,
];

pub const LOG_CONFIG_PATH: &str = "log4rs.yaml";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "9898";
const DEFAULT_PUSH_TYPE: &str = "alert";
const DEFAULT_SEND_TIMEOUT_S: u64 = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for environment variable {var}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct ApnsSettings {
    pub topic: String,
    pub team_id: String,
    pub token_key_path: PathBuf,
    pub auth_key_id: String,
    pub host_name: String,
    pub push_type: String,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub host: String,
    pub port: String,
    pub push_delay: Duration,
    pub send_timeout: Duration,
    /// `None` when running with `DRY_RUN`.
    pub apns: Option<ApnsSettings>,
}

impl Settings {
    pub fn from_env() -> Result<Settings, SettingsError> {
        Settings::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Settings, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dry_run = lookup(VAR_DRY_RUN)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let apns = if dry_run {
            None
        } else {
            let required = |var: &'static str| lookup(var).ok_or(SettingsError::Missing(var));
            Some(ApnsSettings {
                topic: required(VAR_TOPIC)?,
                team_id: required(VAR_TEAM_ID)?,
                token_key_path: PathBuf::from(required(VAR_TOKEN_KEY_PATH)?),
                auth_key_id: required(VAR_AUTH_KEY_ID)?,
                host_name: required(VAR_APNS_HOST_NAME)?,
                push_type: lookup(VAR_APNS_PUSH_TYPE).unwrap_or_else(|| DEFAULT_PUSH_TYPE.to_string()),
            })
        };

        Ok(Settings {
            host: lookup(HOST).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: lookup(PORT).unwrap_or_else(|| DEFAULT_PORT.to_string()),
            push_delay: Duration::from_millis(parse_u64(&lookup, VAR_PUSH_DELAY_MS, 0)?),
            send_timeout: Duration::from_secs(parse_u64(&lookup, VAR_PUSH_SEND_TIMEOUT_S, DEFAULT_SEND_TIMEOUT_S)?),
            apns,
        })
    }
}

fn parse_u64<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// Initialize log4rs from `log4rs.yaml`, falling back to stdout logging.
pub fn init_logging() {
    if let Err(e) = log4rs::init_file(LOG_CONFIG_PATH, Default::default()) {
        eprintln!("Could not load {LOG_CONFIG_PATH} ({e}), logging to stdout");

        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));

        match config {
            Ok(config) => {
                log4rs::init_config(config).ok();
            }
            Err(e) => eprintln!("Invalid fallback logging config: {e}"),
        }
    }
}

/// Last few characters of a token, enough to tell devices apart in logs.
pub fn get_short_token(token: &str) -> String {
    let count = token.chars().count();
    token.chars().skip(count.saturating_sub(6)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn short_token_keeps_tail() {
        assert_eq!(get_short_token("0123456789abcdef"), "abcdef");
        assert_eq!(get_short_token("abc"), "abc");
        assert_eq!(get_short_token(""), "");
    }

    #[test]
    fn dry_run_needs_no_apns_vars() {
        let settings = Settings::from_lookup(lookup_from(&[(VAR_DRY_RUN, "true")])).unwrap();
        assert!(settings.apns.is_none());
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, "9898");
        assert_eq!(settings.push_delay, Duration::ZERO);
        assert_eq!(settings.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn missing_apns_var_is_reported() {
        let err = Settings::from_lookup(lookup_from(&[(VAR_TOPIC, "com.example.app")])).unwrap_err();
        assert_eq!(err, SettingsError::Missing(VAR_TEAM_ID));
    }

    #[test]
    fn full_apns_settings() {
        let settings = Settings::from_lookup(lookup_from(&[
            (VAR_TOPIC, "com.example.app"),
            (VAR_TEAM_ID, "TEAM123"),
            (VAR_TOKEN_KEY_PATH, "/keys/AuthKey.p8"),
            (VAR_AUTH_KEY_ID, "KEY123"),
            (VAR_APNS_HOST_NAME, "api.sandbox.push.apple.com"),
            (VAR_PUSH_DELAY_MS, "250"),
        ]))
        .unwrap();

        let apns = settings.apns.unwrap();
        assert_eq!(apns.push_type, "alert");
        assert_eq!(apns.host_name, "api.sandbox.push.apple.com");
        assert_eq!(settings.push_delay, Duration::from_millis(250));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            (VAR_DRY_RUN, "1"),
            (VAR_PUSH_SEND_TIMEOUT_S, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { var: VAR_PUSH_SEND_TIMEOUT_S, .. }));
    }
}
