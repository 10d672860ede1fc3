//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional; with no file and no env vars everything falls back to the
//! primary domain and the platform data directory.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use garmin_auth::{ConsumerCredentials, DEFAULT_DOMAIN};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Domain family to authenticate against (`garmin.com` or `garmin.cn`)
    #[serde(default)]
    pub domain: Option<String>,
    /// Directory holding token and credential files
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Consumer key/secret; fetched from the bootstrap location when absent
    #[serde(default)]
    pub consumer: Option<ConsumerConfig>,
}

/// Configured OAuth consumer credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub key: String,
    pub secret: String,
}

impl Config {
    /// Load configuration, overlaying environment variables.
    ///
    /// An explicitly passed path must exist; the default path
    /// (`<config dir>/garmin-cli/config.toml`) is used only when present.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let mut config = match path {
            Some(path) => Self::parse_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::parse_file(&path)?,
                _ => Config::default(),
            },
        };

        if let Ok(domain) = std::env::var("GARMIN_DOMAIN") {
            config.domain = Some(domain);
        }
        if let Ok(dir) = std::env::var("GARMIN_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let (Ok(key), Ok(secret)) = (
            std::env::var("GARMIN_CONSUMER_KEY"),
            std::env::var("GARMIN_CONSUMER_SECRET"),
        ) {
            config.consumer = Some(ConsumerConfig { key, secret });
        }

        // The domain is a bare host suffix, never a URL
        if let Some(domain) = &config.domain {
            if domain.contains('/') || domain.starts_with("http") {
                return Err(common::Error::Config(format!(
                    "domain must be a bare domain like garmin.com, got: {domain}"
                )));
            }
        }

        Ok(config)
    }

    fn parse_file(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "garmin-cli")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// Directory for token and credential files.
    pub fn data_dir(&self) -> common::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "garmin-cli")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| common::Error::Config("cannot determine a data directory".into()))
    }

    pub fn consumer_credentials(&self) -> Option<ConsumerCredentials> {
        self.consumer.as_ref().map(|consumer| ConsumerCredentials {
            consumer_key: consumer.key.clone(),
            consumer_secret: consumer.secret.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
domain = "garmin.cn"
data_dir = "/tmp/garmin-test"

[consumer]
key = "ck"
secret = "cs"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.domain(), "garmin.cn");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/garmin-test"));
        let consumer = config.consumer_credentials().unwrap();
        assert_eq!(consumer.consumer_key, "ck");
        assert_eq!(consumer.consumer_secret, "cs");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.domain(), "garmin.com");
        assert!(config.consumer_credentials().is_none());
    }

    #[test]
    fn url_shaped_domain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, r#"domain = "https://sso.garmin.com""#).unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bare domain"), "got: {err}");
    }

    #[test]
    fn missing_explicit_config_file_errors() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
    }
}
