use std::fmt;
use thiserror::Error;

/// The verification and generation failures a caller can act on.
/// Each kind is distinct so an expired link can be told apart from a tampered one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignedLinkError {
    #[error("InvalidParameter({0})")]
    InvalidParameter(String),
    #[error("MalformedUrl({0})")]
    MalformedUrl(String),
    #[error("MissingExpiration")]
    MissingExpiration,
    #[error("InvalidSignature")]
    InvalidSignature,
    #[error("LinkExpired")]
    LinkExpired,
}

#[derive(Error, Debug)]
pub enum CryptographyError {
    #[error("InvalidKeyLength")]
    InvalidKeyLength,
    #[error("EmptySecretKey")]
    EmptySecretKey,
    #[error("SecretKeyBase64Decode({0})")]
    SecretKeyBase64Decode(Base64DecodeError),
    #[error("ConvertModelToTOML({0})")]
    ConvertModelToTOML(TomlSerError),
    #[error("ConvertTOMLToModel({0})")]
    ConvertTOMLToModel(TomlDeError),
    #[error("WriteTOMLToFile({0})")]
    WriteTOMLToFile(StdIoError),
    #[error("ReadTOMLFromFile({0})")]
    ReadTOMLFromFile(StdIoError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ReadConfigFile({0})")]
    ReadConfigFile(StdIoError),
    #[error("ParseConfigFile({0})")]
    ParseConfigFile(TomlDeError),
    #[error("InvalidBaseUrl({0})")]
    InvalidBaseUrl(String),
    #[error("InvalidLifetime({0})")]
    InvalidLifetime(i64),
    #[error("MissingProperties({0})")]
    MissingProperties(String),
    #[error("InvalidOrigin({0})")]
    InvalidOrigin(String),
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Dispatch({0})")]
    Dispatch(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bind({0})")]
    Bind(StdIoError),
    #[error("Serve({0})")]
    Serve(StdIoError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("SignedLink({0})")]
    SignedLink(#[from] SignedLinkError),
    #[error("Cryptography({0})")]
    Cryptography(#[from] CryptographyError),
    #[error("Config({0})")]
    Config(#[from] ConfigError),
    #[error("Notification({0})")]
    Notification(#[from] NotificationError),
    #[error("Server({0})")]
    Server(#[from] ServerError),
}

#[derive(Debug)]
pub struct StdIoError(pub std::io::Error);

impl fmt::Display for StdIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct TomlSerError(pub toml::ser::Error);

impl fmt::Display for TomlSerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct TomlDeError(pub toml::de::Error);

impl fmt::Display for TomlDeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Base64DecodeError(pub base64::DecodeError);

impl fmt::Display for Base64DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
