//! Key and identity types for Lockbox.

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;
use std::fmt;
use std::sync::OnceLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{EmailError, KeyError};

/// Size of a key (and of a key hash) in bytes.
pub const KEY_LEN: usize = 32;

/// An unsigned 256-bit key.
///
/// Stored as 32 big-endian bytes, so every value of the type is in range by
/// construction. Fallible constructors reject values outside `0..2^256`.
/// Used both for secret auth keys and for users' public keys; memory is
/// zeroed on drop either way.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// The all-zero key.
    pub const ZERO: Self = Self([0u8; KEY_LEN]);

    /// Create a Key from exactly 32 big-endian bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a Key from a big-endian byte string of any length.
    ///
    /// Leading zero bytes are ignored; anything left over 32 bytes does not fit
    /// in 256 bits and is rejected.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[first..];
        if significant.len() > KEY_LEN {
            return Err(KeyError::OutOfRange {
                significant_bytes: significant.len(),
            });
        }

        let mut out = [0u8; KEY_LEN];
        out[KEY_LEN - significant.len()..].copy_from_slice(significant);
        Ok(Self(out))
    }

    /// Get the raw big-endian bytes of this Key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        u128::from(value).into()
    }
}

impl From<u128> for Key {
    fn from(value: u128) -> Self {
        let mut out = [0u8; KEY_LEN];
        out[KEY_LEN - 16..].copy_from_slice(&value.to_be_bytes());
        Self(out)
    }
}

impl TryFrom<i128> for Key {
    type Error = KeyError;

    fn try_from(value: i128) -> Result<Self, Self::Error> {
        u128::try_from(value)
            .map(Self::from)
            .map_err(|_| KeyError::Negative)
    }
}

impl TryFrom<&[u8]> for Key {
    type Error = KeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_be_slice(bytes)
    }
}

// On the wire a Key is a 32-byte big-endian binary string
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = ByteBuf::deserialize(deserializer)?.into_vec();
        let key = Key::from_be_slice(&bytes).map_err(D::Error::custom);
        bytes.zeroize();
        key
    }
}

// Don't leak key material in debug output
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([REDACTED])")
    }
}

/// A memory-hard one-way hash of a [`Key`].
///
/// Only produced by [`KeyHasher::hash`](crate::KeyHasher::hash) or read back
/// from storage; never built from client input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash([u8; KEY_LEN]);

impl KeyHash {
    /// Stand-in verifier for records that do not exist, so a lookup miss
    /// still costs one key derivation.
    pub const PLACEHOLDER: KeyHash = KeyHash([0u8; KEY_LEN]);

    pub(crate) fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Rebuild a KeyHash from bytes previously persisted with [`KeyHash::as_bytes`].
    pub fn from_stored(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({}..)", hex::encode(&self.0[..4]))
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-]+$").expect("static email pattern")
    })
}

/// A validated email address, the unique identity of a user.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Email(String);

impl Email {
    /// Validate and wrap an email address.
    pub fn parse(value: &str) -> Result<Self, EmailError> {
        if email_pattern().is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(EmailError::Invalid(value.to_string()))
        }
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Email({:?})", self.0)
    }
}

/// Server-allocated identifier of an item.
///
/// UUID v4, travels as 16 raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    /// Allocate a new random ItemId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create an ItemId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this ItemId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0.as_bytes())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = ByteBuf::deserialize(deserializer)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| D::Error::invalid_length(bytes.len(), &"16 bytes"))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_u64_is_big_endian() {
        let key = Key::from(42u64);
        assert_eq!(key.as_bytes()[31], 42);
        assert!(key.as_bytes()[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn key_from_slice_ignores_leading_zeros() {
        let mut long = vec![0u8; 40];
        long[39] = 7;
        let key = Key::from_be_slice(&long).unwrap();
        assert_eq!(key, Key::from(7u64));
    }

    #[test]
    fn key_max_value_fits() {
        let key = Key::from_be_slice(&[0xFF; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[0xFF; 32]);
    }

    #[test]
    fn key_over_256_bits_fails() {
        // 2^256 is a one followed by 32 zero bytes
        let mut too_big = vec![0u8; 33];
        too_big[0] = 1;
        assert_eq!(
            Key::from_be_slice(&too_big),
            Err(KeyError::OutOfRange {
                significant_bytes: 33
            })
        );
    }

    #[test]
    fn negative_key_fails() {
        assert_eq!(Key::try_from(-1i128), Err(KeyError::Negative));
        assert_eq!(Key::try_from(5i128).unwrap(), Key::from(5u64));
    }

    #[test]
    fn key_debug_is_redacted() {
        let debug = format!("{:?}", Key::from(0xABCDu64));
        assert_eq!(debug, "Key([REDACTED])");
    }

    #[test]
    fn key_hash_from_stored_requires_32_bytes() {
        assert!(KeyHash::from_stored(&[1u8; 32]).is_some());
        assert!(KeyHash::from_stored(&[1u8; 31]).is_none());
        assert!(KeyHash::from_stored(&[1u8; 33]).is_none());
    }

    #[test]
    fn valid_emails_parse() {
        for ok in ["yarden@cohen.com", "a@b.com", "first_last+tag@mail-host.io"] {
            assert_eq!(Email::parse(ok).unwrap().as_str(), ok);
        }
    }

    #[test]
    fn invalid_emails_rejected() {
        for bad in ["", "no-at-sign.com", "a@b", "a@b.c.d", "spaces in@b.com", "a@@b.com"] {
            assert!(Email::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn key_travels_as_binary() {
        let bytes = rmp_serde::to_vec(&Key::from(1u64)).unwrap();
        // bin8 marker, length, 32 bytes
        assert_eq!(bytes.len(), 34);
        assert_eq!(bytes[0], 0xC4);
        assert_eq!(rmp_serde::from_slice::<Key>(&bytes).unwrap(), Key::from(1u64));
    }

    #[test]
    fn oversized_key_rejected_on_decode() {
        let mut too_big = vec![0u8; 33];
        too_big[0] = 1;
        let bytes = rmp_serde::to_vec(&serde_bytes::Bytes::new(&too_big)).unwrap();
        assert!(rmp_serde::from_slice::<Key>(&bytes).is_err());
    }

    #[test]
    fn item_id_is_uuid_v4() {
        let id = ItemId::new();
        assert_eq!(id.as_bytes().len(), 16);
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn item_id_roundtrip() {
        let original = ItemId::new();
        let restored = ItemId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);
        assert!(ItemId::from_bytes(&[0u8; 3]).is_none());
    }
}
