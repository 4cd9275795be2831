use crate::{
    cryptography::{SecretKey, SigningKeys},
    error::{ConfigError, Error, StdIoError, TomlDeError},
};
use chrono::Duration;
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;
use url::Url;

pub const DEFAULT_INVITE_LIFETIME_SECONDS: i64 = 60 * 60;
pub const DEFAULT_PORT: u16 = 8886;

fn default_invite_lifetime_seconds() -> i64 {
    DEFAULT_INVITE_LIFETIME_SECONDS
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// On-disk shape of the configuration file.
#[derive(Deserialize, Debug)]
pub struct ConfigModel {
    pub base_url: String,
    pub secret_key: Option<String>,
    #[serde(default)]
    pub previous_secret_keys: Vec<String>,
    pub secret_key_path: Option<String>,
    #[serde(default = "default_invite_lifetime_seconds")]
    pub invite_lifetime_seconds: i64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub log_directory: Option<String>,
}

impl ConfigModel {
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let toml_string = match fs::read_to_string(path) {
            Ok(toml_string) => toml_string,
            Err(err) => return Err(ConfigError::ReadConfigFile(StdIoError(err)).into()),
        };
        Self::from_toml(&toml_string)
    }

    pub fn from_toml(toml_string: &str) -> Result<Self, Error> {
        match toml::from_str::<ConfigModel>(toml_string) {
            Ok(model) => Ok(model),
            Err(err) => Err(ConfigError::ParseConfigFile(TomlDeError(err)).into()),
        }
    }
}

pub struct Config {
    base_url: Url,
    signing_keys: SigningKeys,
    invite_lifetime_seconds: i64,
    pub port: u16,
    allowed_origins: Vec<String>,
    log_directory: Option<String>,
}

impl Config {
    pub fn new(
        base_url: &str,
        signing_keys: SigningKeys,
        invite_lifetime_seconds: i64,
        port: u16,
        allowed_origins: Vec<String>,
        log_directory: Option<String>,
    ) -> Result<Self, Error> {
        let base_url = parse_base_url(base_url)?;
        if invite_lifetime_seconds <= 0 {
            return Err(ConfigError::InvalidLifetime(invite_lifetime_seconds).into());
        }
        Ok(Self {
            base_url,
            signing_keys,
            invite_lifetime_seconds,
            port,
            allowed_origins,
            log_directory,
        })
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        Self::from_model(ConfigModel::from_file(path)?)
    }

    pub fn from_toml(toml_string: &str) -> Result<Self, Error> {
        Self::from_model(ConfigModel::from_toml(toml_string)?)
    }

    pub fn from_model(model: ConfigModel) -> Result<Self, Error> {
        let signing_keys = resolve_signing_keys(
            model.secret_key.as_deref(),
            &model.previous_secret_keys,
            model.secret_key_path.as_deref(),
        )?;
        Self::new(
            &model.base_url,
            signing_keys,
            model.invite_lifetime_seconds,
            model.port,
            model.allowed_origins,
            model.log_directory,
        )
    }

    pub fn get_base_url(&self) -> &Url {
        &self.base_url
    }
    pub fn get_signing_keys(&self) -> &SigningKeys {
        &self.signing_keys
    }
    pub fn get_invite_lifetime(&self) -> Duration {
        Duration::seconds(self.invite_lifetime_seconds)
    }
    pub fn get_allowed_origins(&self) -> &Vec<String> {
        &self.allowed_origins
    }
    pub fn get_log_directory(&self) -> Option<&str> {
        self.log_directory.as_deref()
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, Error> {
    let url = match Url::parse(base_url) {
        Ok(url) => url,
        Err(err) => {
            return Err(ConfigError::InvalidBaseUrl(format!("{}: {}", base_url, err)).into())
        }
    };
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBaseUrl(format!("{} is not a base url", base_url)).into());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::InvalidBaseUrl(format!(
            "{} must not carry a query or fragment",
            base_url
        ))
        .into());
    }
    Ok(url)
}

/// Inline secret first, then the persistent key file, otherwise an ephemeral key.
fn resolve_signing_keys(
    secret_key: Option<&str>,
    previous_secret_keys: &[String],
    secret_key_path: Option<&str>,
) -> Result<SigningKeys, Error> {
    let mut previous: Vec<SecretKey> = Vec::with_capacity(previous_secret_keys.len());
    for value in previous_secret_keys.iter() {
        previous.push(SecretKey::from_config_value(value)?);
    }
    if let Some(secret_key) = secret_key {
        return Ok(SigningKeys::new(
            SecretKey::from_config_value(secret_key)?,
            previous,
        ));
    }
    let signing_keys = match secret_key_path {
        Some(path) => {
            if !Path::new(path).exists() {
                let signing_keys = SigningKeys::generate();
                signing_keys.save_to_file(path)?;
                info!("Generated a new signing key at {}", path);
                signing_keys
            } else {
                SigningKeys::from_file(path)?
            }
        }
        None => {
            info!("Running in ephemeral key mode, signed links will not survive a restart");
            SigningKeys::generate()
        }
    };
    if previous.is_empty() {
        return Ok(signing_keys);
    }
    let mut merged = signing_keys.get_previous().to_vec();
    merged.extend(previous);
    Ok(SigningKeys::new(signing_keys.get_current().to_owned(), merged))
}
