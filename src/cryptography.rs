use crate::error::{
    Base64DecodeError, CryptographyError, Error, StdIoError, TomlDeError, TomlSerError,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
};

type HmacSha256 = Hmac<Sha256>;

const BASE64_PREFIX: &str = "base64:";
/// Length of a hex encoded HMAC-SHA256 tag.
pub const SIGNATURE_HEX_LENGTH: usize = 64;

/// Shared secret used to sign links. Never printed.
#[derive(Clone)]
pub struct SecretKey(Vec<u8>);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(**redacted**)")
    }
}

impl SecretKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(CryptographyError::EmptySecretKey.into());
        }
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        Self(rand::thread_rng().gen::<[u8; 32]>().to_vec())
    }

    /// Accepts either a raw string or a `base64:` prefixed standard base64 value.
    pub fn from_config_value(value: &str) -> Result<Self, Error> {
        match value.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => match STANDARD.decode(encoded) {
                Ok(bytes) => Self::new(bytes),
                Err(err) => Err(CryptographyError::SecretKeyBase64Decode(Base64DecodeError(
                    err,
                ))
                .into()),
            },
            None => Self::new(value.as_bytes().to_vec()),
        }
    }

    pub fn to_config_value(&self) -> String {
        format!("{}{}", BASE64_PREFIX, STANDARD.encode(&self.0))
    }

    fn mac(&self, message: &[u8]) -> Result<HmacSha256, Error> {
        let mut mac = match HmacSha256::new_from_slice(&self.0) {
            Ok(mac) => mac,
            Err(_) => return Err(CryptographyError::InvalidKeyLength.into()),
        };
        mac.update(message);
        Ok(mac)
    }

    /// Lowercase hex HMAC-SHA256 of `message`.
    pub fn sign(&self, message: &[u8]) -> Result<String, Error> {
        Ok(hex::encode(self.mac(message)?.finalize().into_bytes()))
    }

    /// Constant time check of a lowercase hex signature.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, Error> {
        Ok(self.mac(message)?.verify_slice(signature).is_ok())
    }
}

/// Decodes a presented signature, refusing anything but the canonical lowercase form.
pub fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    if signature.len() != SIGNATURE_HEX_LENGTH
        || !signature
            .bytes()
            .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    hex::decode(signature).ok()
}

/// Key files are readable by the owner only.
fn write_secret_file(path: &str, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    let _ = options.write(true).create(true).truncate(true);
    let mut file = open_owner_only(&mut options, path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn open_owner_only(options: &mut OpenOptions, path: &str) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = options.mode(0o600).open(path)?;
    // mode() only applies when the file is created
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_owner_only(options: &mut OpenOptions, path: &str) -> std::io::Result<fs::File> {
    options.open(path)
}

#[derive(Serialize, Deserialize, Debug)]
struct SigningKeysModel {
    current: String,
    #[serde(default)]
    previous: Vec<String>,
}

/// The key links are signed with, plus retired keys that are still accepted.
#[derive(Clone, Debug)]
pub struct SigningKeys {
    current: SecretKey,
    previous: Vec<SecretKey>,
}

impl SigningKeys {
    pub fn new(current: SecretKey, previous: Vec<SecretKey>) -> Self {
        Self { current, previous }
    }

    pub fn generate() -> Self {
        Self::new(SecretKey::generate(), Vec::new())
    }

    fn from_model(model: SigningKeysModel) -> Result<Self, Error> {
        let current = SecretKey::from_config_value(&model.current)?;
        let mut previous = Vec::with_capacity(model.previous.len());
        for value in model.previous.iter() {
            previous.push(SecretKey::from_config_value(value)?);
        }
        Ok(Self::new(current, previous))
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Error> {
        let model = SigningKeysModel {
            current: self.current.to_config_value(),
            previous: self
                .previous
                .iter()
                .map(SecretKey::to_config_value)
                .collect::<Vec<String>>(),
        };
        let toml_string = match toml::to_string(&model) {
            Ok(toml_string) => toml_string,
            Err(err) => {
                return Err(CryptographyError::ConvertModelToTOML(TomlSerError(err)).into())
            }
        };
        if let Err(err) = write_secret_file(path, toml_string.as_bytes()) {
            return Err(CryptographyError::WriteTOMLToFile(StdIoError(err)).into());
        }
        Ok(())
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        let toml_string = match fs::read_to_string(path) {
            Ok(toml_string) => toml_string,
            Err(err) => return Err(CryptographyError::ReadTOMLFromFile(StdIoError(err)).into()),
        };
        let model = match toml::from_str::<SigningKeysModel>(&toml_string) {
            Ok(model) => model,
            Err(err) => {
                return Err(CryptographyError::ConvertTOMLToModel(TomlDeError(err)).into())
            }
        };
        Self::from_model(model)
    }

    pub fn sign(&self, message: &[u8]) -> Result<String, Error> {
        self.current.sign(message)
    }

    /// Every key is checked, so the time taken does not depend on which one matched.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, Error> {
        let mut verified = self.current.verify(message, signature)?;
        for key in self.previous.iter() {
            verified |= key.verify(message, signature)?;
        }
        Ok(verified)
    }

    pub fn get_current(&self) -> &SecretKey {
        &self.current
    }

    pub fn get_previous(&self) -> &[SecretKey] {
        &self.previous
    }
}
