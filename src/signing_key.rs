//! Ed25519 identity signing keys and the tombstones published when they rotate.

use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generators::{self, GenerationError, SecretKind};

pub const ALGORITHM: &str = "ed25519";
/// Identifier of keys generated before rotation existed. Never written.
pub const INSECURE_KEY_ID: u32 = 0;
/// Identifier given to freshly generated keys.
pub const CURRENT_KEY_ID: u32 = 1;
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Accepts both padded and unpadded input; output always goes through
/// `STANDARD_NO_PAD`.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningKeyParseError {
    #[error("expected `<algorithm> <key id> <base64 key>`")]
    Malformed,
    #[error("unsupported algorithm `{0}`")]
    Algorithm(String),
    #[error("key id `{0}` is not a non-negative integer")]
    KeyId(String),
    #[error("private key is not valid base64")]
    Encoding,
    #[error("private key is {0} bytes, expected 32")]
    Length(usize),
}

/// `ed25519 <keyId> <base64 private key>`.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKeyValue {
    key_id: u32,
    private_key: [u8; PRIVATE_KEY_LENGTH],
}

impl std::fmt::Debug for SigningKeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyValue")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SigningKeyValue {
    pub fn new(key_id: u32, private_key: [u8; PRIVATE_KEY_LENGTH]) -> Self {
        Self {
            key_id,
            private_key,
        }
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_LENGTH] {
        &self.private_key
    }

    pub fn encode(&self) -> String {
        format!(
            "{ALGORITHM} {} {}\n",
            self.key_id,
            STANDARD_NO_PAD.encode(self.private_key)
        )
    }

    pub fn parse(raw: &str) -> Result<Self, SigningKeyParseError> {
        let mut parts = raw.split_whitespace();
        let (Some(algorithm), Some(key_id), Some(encoded), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SigningKeyParseError::Malformed);
        };
        if algorithm != ALGORITHM {
            return Err(SigningKeyParseError::Algorithm(algorithm.to_string()));
        }
        let key_id = key_id
            .parse::<u32>()
            .map_err(|_| SigningKeyParseError::KeyId(key_id.to_string()))?;
        let decoded = LENIENT
            .decode(encoded)
            .map_err(|_| SigningKeyParseError::Encoding)?;
        let private_key: [u8; PRIVATE_KEY_LENGTH] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| SigningKeyParseError::Length(decoded.len()))?;
        Ok(Self::new(key_id, private_key))
    }
}

/// Splits a stored value into its algorithm and key id tokens.
fn identifier(existing: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(existing).ok()?;
    let mut parts = text.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

/// True when a stored value, once trimmed, starts with `ed25519 0`: the key
/// was generated under the insecure default identifier.
pub fn must_rotate(existing: Option<&[u8]>) -> bool {
    existing
        .and_then(|value| std::str::from_utf8(value).ok())
        .is_some_and(|text| {
            text.trim()
                .starts_with(&format!("{ALGORITHM} {INSECURE_KEY_ID}"))
        })
}

/// Identifier for a key replacing `existing`.
pub fn next_key_id(existing: Option<&[u8]>) -> u32 {
    existing
        .and_then(identifier)
        .and_then(|(_, key_id)| key_id.parse::<u32>().ok())
        .map(|key_id| key_id.saturating_add(1).max(CURRENT_KEY_ID))
        .unwrap_or(CURRENT_KEY_ID)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredKeyRecord {
    /// Unpadded base64 public key.
    pub key: String,
    pub expired_ts: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredKeysDocument {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub old_signing_keys: BTreeMap<String, ExpiredKeyRecord>,
}

impl ExpiredKeysDocument {
    pub fn is_empty(&self) -> bool {
        self.old_signing_keys.is_empty()
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>, GenerationError> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn from_yaml(raw: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(raw)
    }
}

/// Declared signing keys whose stored value is due for rotation, in key order.
pub fn keys_due_for_rotation(
    existing: &BTreeMap<String, Vec<u8>>,
    declared: &BTreeMap<String, SecretKind>,
) -> Vec<String> {
    declared
        .iter()
        .filter(|(_, kind)| **kind == SecretKind::SigningKey)
        .filter(|(key, _)| must_rotate(existing.get(key.as_str()).map(Vec::as_slice)))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Builds the tombstone document for every declared signing key due for
/// rotation. Each entry publishes a throwaway public key under the old
/// identifier so that signatures made with the old key stop verifying.
pub fn compute_expired_keys(
    existing: &BTreeMap<String, Vec<u8>>,
    declared: &BTreeMap<String, SecretKind>,
) -> Result<ExpiredKeysDocument, GenerationError> {
    let mut document = ExpiredKeysDocument::default();
    for key in keys_due_for_rotation(existing, declared) {
        let Some((algorithm, key_id)) = existing.get(&key).and_then(|value| identifier(value))
        else {
            continue;
        };
        let public_key = generators::throwaway_public_key()?;
        document.old_signing_keys.insert(
            format!("{algorithm}:{key_id}"),
            ExpiredKeyRecord {
                key: STANDARD_NO_PAD.encode(public_key),
                expired_ts: chrono::Utc::now().timestamp_millis(),
            },
        );
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSECURE: &str = "ed25519 0 Ozi/KgL1WiuGMmp/GUME26bMWtqH92jF036tK6SIks4";
    const ROTATED: &str = "ed25519 1 onKBAf8+AkpLkeqTeI7pdR6lKoAq4Hh9pV1AcDWTQvM";

    fn declared(key: &str) -> BTreeMap<String, SecretKind> {
        BTreeMap::from([(key.to_string(), SecretKind::SigningKey)])
    }

    #[test]
    fn rotation_trigger() {
        assert!(must_rotate(Some(INSECURE.as_bytes())));
        assert!(must_rotate(Some(format!("  {INSECURE}\n").as_bytes())));
        assert!(!must_rotate(Some(ROTATED.as_bytes())));
        assert!(!must_rotate(None));
        assert!(must_rotate(Some(b"ed25519 0")));
        assert!(must_rotate(Some(b"ed25519 01 abc")));
        assert!(!must_rotate(Some(b"ed25519\t0 abc")));
        assert!(!must_rotate(Some(b"ed25519  0 abc")));
        assert!(!must_rotate(Some(b"not a key")));
    }

    #[test]
    fn next_key_id_moves_past_the_insecure_id() {
        assert_eq!(next_key_id(None), CURRENT_KEY_ID);
        assert_eq!(next_key_id(Some(INSECURE.as_bytes())), 1);
        assert_eq!(next_key_id(Some(ROTATED.as_bytes())), 2);
        assert_eq!(next_key_id(Some(b"ed25519 asDv abc")), CURRENT_KEY_ID);
    }

    #[test]
    fn parse_accepts_both_paddings_and_writes_unpadded() {
        let padded = "ed25519 1 AZT9wvov/MBB0/8SBFtzyG5P+V/2YqXu6Cq99EotC3U=";
        let unpadded = padded.trim_end_matches('=');
        let from_padded = SigningKeyValue::parse(padded).expect("padded");
        let from_unpadded = SigningKeyValue::parse(unpadded).expect("unpadded");
        assert_eq!(from_padded, from_unpadded);
        assert_eq!(from_padded.encode(), format!("{unpadded}\n"));
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert_eq!(
            SigningKeyValue::parse("ed25519 1"),
            Err(SigningKeyParseError::Malformed)
        );
        assert_eq!(
            SigningKeyValue::parse("rsa 1 AAAA"),
            Err(SigningKeyParseError::Algorithm("rsa".into()))
        );
        assert_eq!(
            SigningKeyValue::parse("ed25519 a_4 AAAA"),
            Err(SigningKeyParseError::KeyId("a_4".into()))
        );
        assert_eq!(
            SigningKeyValue::parse("ed25519 1 AAAA"),
            Err(SigningKeyParseError::Length(3))
        );
    }

    #[test]
    fn expired_keys_for_insecure_key() {
        let before = chrono::Utc::now().timestamp_millis();
        let existing = BTreeMap::from([("SECRET_KEY".to_string(), INSECURE.as_bytes().to_vec())]);
        let document = compute_expired_keys(&existing, &declared("SECRET_KEY")).expect("document");
        let after = chrono::Utc::now().timestamp_millis();

        let yaml = document.to_yaml().expect("yaml");
        let parsed = ExpiredKeysDocument::from_yaml(&yaml).expect("parse yaml");
        assert_eq!(parsed.old_signing_keys.len(), 1);
        let record = &parsed.old_signing_keys["ed25519:0"];
        let public_key = STANDARD_NO_PAD.decode(&record.key).expect("base64");
        assert_eq!(public_key.len(), 32);
        assert!(before <= record.expired_ts && record.expired_ts <= after);
    }

    #[test]
    fn no_expired_keys_without_insecure_key() {
        let rotated = BTreeMap::from([("SECRET_KEY".to_string(), ROTATED.as_bytes().to_vec())]);
        let document = compute_expired_keys(&rotated, &declared("SECRET_KEY")).expect("document");
        assert!(document.is_empty());
        assert_eq!(document.to_yaml().expect("yaml"), b"{}\n".to_vec());

        let initial = compute_expired_keys(&BTreeMap::new(), &declared("SECRET_KEY")).expect("document");
        assert!(initial.is_empty());
    }

    #[test]
    fn only_signing_keys_are_considered() {
        let existing = BTreeMap::from([("OTHER".to_string(), INSECURE.as_bytes().to_vec())]);
        let declared = BTreeMap::from([("OTHER".to_string(), SecretKind::Rand32)]);
        assert!(keys_due_for_rotation(&existing, &declared).is_empty());
    }
}
