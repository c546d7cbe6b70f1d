//! Randomness-derived values for every supported secret kind.

use std::fmt;
use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use thiserror::Error;

use crate::error::ProvisionError;
use crate::signing_key::SigningKeyValue;

pub const RAND32_LENGTH: usize = 32;
pub const RSA_KEY_BITS: usize = 4096;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("entropy source failure: {0}")]
    Entropy(#[from] rand_core::Error),
    #[error("{0} key format unsupported")]
    UnsupportedFormat(String),
    #[error("rsa key generation failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("pkcs#8 encoding failed: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("failed to encode expired key document: {0}")]
    Document(#[from] serde_yaml::Error),
    #[error("{0} values are derived from existing signing keys")]
    Derived(SecretKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KeyFormat {
    Pem,
    #[default]
    Der,
}

impl FromStr for KeyFormat {
    type Err = GenerationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pem" => Ok(KeyFormat::Pem),
            "der" => Ok(KeyFormat::Der),
            other => Err(GenerationError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretKind {
    Rand32,
    Hex32,
    SigningKey,
    /// Internal only: the tombstone document for signing keys due for rotation.
    ExpireKey,
    Rsa(KeyFormat),
    EcdsaP256,
    EcdsaSecp256k1,
    EcdsaSecp384r1,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Rand32 => "rand32",
            SecretKind::Hex32 => "hex32",
            SecretKind::SigningKey => "signingkey",
            SecretKind::ExpireKey => "expirekey",
            SecretKind::Rsa(_) => "rsa",
            SecretKind::EcdsaP256 => "ecdsaprime256v1",
            SecretKind::EcdsaSecp256k1 => "ecdsasecp256k1",
            SecretKind::EcdsaSecp384r1 => "ecdsasecp384r1",
        }
    }

    /// Parses a user-facing kind token and its optional argument. `expirekey`
    /// is not accepted here.
    pub fn from_token(token: &str, argument: Option<&str>) -> Result<Self, ProvisionError> {
        let kind = match token {
            "rand32" => SecretKind::Rand32,
            "hex32" => SecretKind::Hex32,
            "signingkey" => SecretKind::SigningKey,
            "rsa" => {
                let format = match argument {
                    Some(format) => format
                        .parse::<KeyFormat>()
                        .map_err(|err| ProvisionError::InvalidSpec(err.to_string()))?,
                    None => KeyFormat::default(),
                };
                return Ok(SecretKind::Rsa(format));
            }
            "ecdsaprime256v1" => SecretKind::EcdsaP256,
            "ecdsasecp256k1" => SecretKind::EcdsaSecp256k1,
            "ecdsasecp384r1" => SecretKind::EcdsaSecp384r1,
            other => return Err(ProvisionError::UnknownKind(other.to_string())),
        };
        if let Some(argument) = argument {
            return Err(ProvisionError::InvalidSpec(format!(
                "{token} does not take an argument (got `{argument}`)"
            )));
        }
        Ok(kind)
    }
}

impl FromStr for SecretKind {
    type Err = ProvisionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SecretKind::from_token(value, None)
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a fresh value for `kind`. `signing_key_id` is only read for
/// [`SecretKind::SigningKey`].
pub fn generate(kind: SecretKind, signing_key_id: u32) -> Result<Vec<u8>, GenerationError> {
    match kind {
        SecretKind::Rand32 => rand32().map(String::into_bytes),
        SecretKind::Hex32 => hex32().map(String::into_bytes),
        SecretKind::SigningKey => signing_key(signing_key_id).map(String::into_bytes),
        SecretKind::ExpireKey => Err(GenerationError::Derived(kind)),
        SecretKind::Rsa(format) => rsa_key(RSA_KEY_BITS, format),
        SecretKind::EcdsaP256 => Ok(p256::SecretKey::random(&mut OsRng)
            .to_pkcs8_der()?
            .as_bytes()
            .to_vec()),
        SecretKind::EcdsaSecp256k1 => Ok(k256::SecretKey::random(&mut OsRng)
            .to_pkcs8_der()?
            .as_bytes()
            .to_vec()),
        SecretKind::EcdsaSecp384r1 => Ok(p384::SecretKey::random(&mut OsRng)
            .to_pkcs8_der()?
            .as_bytes()
            .to_vec()),
    }
}

/// 32 characters drawn uniformly from `[A-Za-z0-9]`.
pub fn rand32() -> Result<String, GenerationError> {
    let rng = StdRng::from_rng(OsRng)?;
    Ok(rng
        .sample_iter(&Alphanumeric)
        .take(RAND32_LENGTH)
        .map(char::from)
        .collect())
}

pub fn hex32() -> Result<String, GenerationError> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

pub fn signing_key(key_id: u32) -> Result<String, GenerationError> {
    let key = ed25519_keypair()?;
    Ok(SigningKeyValue::new(key_id, key.to_bytes()).encode())
}

/// Public half of a keypair whose private half is dropped immediately.
pub fn throwaway_public_key() -> Result<[u8; 32], GenerationError> {
    Ok(ed25519_keypair()?.verifying_key().to_bytes())
}

fn ed25519_keypair() -> Result<ed25519_dalek::SigningKey, GenerationError> {
    let mut seed = [0u8; ed25519_dalek::SECRET_KEY_LENGTH];
    OsRng.try_fill_bytes(&mut seed)?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
}

fn rsa_key(bits: usize, format: KeyFormat) -> Result<Vec<u8>, GenerationError> {
    let key = RsaPrivateKey::new(&mut OsRng, bits)?;
    match format {
        KeyFormat::Pem => Ok(key.to_pkcs8_pem(LineEnding::LF)?.as_bytes().to_vec()),
        KeyFormat::Der => Ok(key.to_pkcs8_der()?.as_bytes().to_vec()),
    }
}
