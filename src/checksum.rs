use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::ChecksumError;
use crate::{ComponentId, PropertyMap};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing key length in bytes.
pub const MIN_KEY_LEN: usize = 16;

/// Server-held secret the checksum is keyed with
#[derive(Clone)]
pub struct SigningKey(HmacSha256);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ChecksumError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LEN {
            return Err(ChecksumError::KeyTooShort {
                min: MIN_KEY_LEN,
                len: bytes.len(),
            });
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(&bytes)
            .map_err(|_| ChecksumError::InvalidKey)?;
        Ok(Self(mac))
    }

    fn mac(&self) -> HmacSha256 {
        self.0.clone()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&"<redacted>").finish()
    }
}

#[derive(Serialize)]
struct ChecksumBinding<'a> {
    id: &'a ComponentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    data: &'a PropertyMap,
}

impl ChecksumBinding<'_> {
    fn digest(&self, key: &SigningKey) -> Result<Vec<u8>, ChecksumError> {
        let mut mac = key.mac();
        mac.update(&serde_jcs::to_vec(self)?);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn matches(&self, digest: &str, key: &SigningKey) -> Result<bool, ChecksumError> {
        let Ok(expected) = hex::decode(digest) else {
            return Ok(false);
        };
        let actual = self.digest(key)?;
        if expected.len() != actual.len() {
            return Ok(false);
        }
        Ok(expected.ct_eq(actual.as_slice()).into())
    }
}

/// Compute the hex HMAC-SHA256 over the canonical `{id, data}` binding
pub fn compute(id: &ComponentId, data: &PropertyMap, key: &SigningKey) -> Result<String, ChecksumError> {
    let binding = ChecksumBinding { id, name: None, data };
    Ok(hex::encode(binding.digest(key)?))
}

/// Check `digest` against the given id and properties in constant time
///
/// A digest that is not valid hex never verifies.
pub fn verify(
    digest: &str,
    id: &ComponentId,
    data: &PropertyMap,
    key: &SigningKey,
) -> Result<bool, ChecksumError> {
    ChecksumBinding { id, name: None, data }.matches(digest, key)
}

/// Like [`compute`], also binding the component class name so a payload
/// signed for one class does not verify under another.
pub fn compute_for_class(
    id: &ComponentId,
    name: &str,
    data: &PropertyMap,
    key: &SigningKey,
) -> Result<String, ChecksumError> {
    let binding = ChecksumBinding {
        id,
        name: Some(name),
        data,
    };
    Ok(hex::encode(binding.digest(key)?))
}

pub fn verify_for_class(
    digest: &str,
    id: &ComponentId,
    name: &str,
    data: &PropertyMap,
    key: &SigningKey,
) -> Result<bool, ChecksumError> {
    ChecksumBinding {
        id,
        name: Some(name),
        data,
    }
    .matches(digest, key)
}
