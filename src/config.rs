//! Settings for the server, read from an optional `settings` file
//! (`settings.toml`, `settings.yaml`, ...) and then the environment, e.g.
//! `MONGODB_URI`, `AUTH_SECRET`, `STRICT_CUSTOM_SPLIT=true`.
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::auth::AuthSettings;
use crate::ledger::SplitPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub mongodb_uri: String,
    pub database: String,
    pub bind_address: String,
    pub port: u16,
    /// Shared with the authentication provider to verify identities.
    pub auth_secret: String,
    pub service_token: Option<String>,
    pub strict_custom_split: bool,
    /// Oldest signed identity accepted, in seconds. 0 accepts any age.
    pub identity_max_age_secs: i64,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_sources(Environment::default().try_parsing(true))
    }

    fn from_sources(environment: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("database", "GroupSplit")?
            .set_default("bind_address", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("strict_custom_split", false)?
            .set_default("identity_max_age_secs", 86_400)?
            .add_source(File::with_name("settings").required(false))
            .add_source(environment)
            .build()?;

        settings.try_deserialize()
    }

    pub fn identity_max_age(&self) -> Option<Duration> {
        (self.identity_max_age_secs > 0).then(|| Duration::seconds(self.identity_max_age_secs))
    }

    pub fn auth(&self) -> AuthSettings {
        AuthSettings {
            secret: self.auth_secret.clone(),
            service_token: self.service_token.clone(),
            max_age: self.identity_max_age(),
        }
    }

    pub fn split_policy(&self) -> SplitPolicy {
        if self.strict_custom_split {
            SplitPolicy::Strict
        } else {
            SplitPolicy::Lenient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().try_parsing(true).source(Some(source))
    }

    #[test]
    fn defaults_fill_in_optional_keys() {
        let settings = Settings::from_sources(environment(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("AUTH_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(settings.database, "GroupSplit");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.service_token, None);
        assert_eq!(settings.split_policy(), SplitPolicy::Lenient);
        assert_eq!(settings.identity_max_age(), Some(Duration::days(1)));
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = Settings::from_sources(environment(&[
            ("MONGODB_URI", "mongodb://db"),
            ("AUTH_SECRET", "s3cret"),
            ("PORT", "9000"),
            ("STRICT_CUSTOM_SPLIT", "true"),
            ("IDENTITY_MAX_AGE_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.split_policy(), SplitPolicy::Strict);
        assert_eq!(settings.auth().max_age, None);
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(Settings::from_sources(environment(&[("MONGODB_URI", "mongodb://db")])).is_err());
    }
}
