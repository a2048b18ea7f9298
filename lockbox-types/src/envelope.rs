//! Envelope - the versioned wire wrapper for every frame payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::LockboxError;

/// Schema version spoken by this build.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wraps a [`Request`](crate::Request) or [`Response`](crate::Response) with
/// its schema version.
///
/// Encoded as a MessagePack map (`{"version": .., "body": ..}`), so the
/// version can be read before the body is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Schema version (currently 1)
    pub version: u8,
    /// The message itself
    pub body: T,
}

#[derive(Deserialize)]
struct Header {
    version: u8,
}

impl<T> Envelope<T> {
    /// Wrap a message at the current protocol version.
    pub fn new(body: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            body,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LockboxError> {
        rmp_serde::to_vec_named(self).map_err(LockboxError::Serialization)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Deserialize from MessagePack bytes.
    ///
    /// The version is checked first; a body is never decoded under a schema
    /// it was not written for.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LockboxError> {
        let header: Header = rmp_serde::from_slice(bytes).map_err(LockboxError::Deserialization)?;
        if header.version != PROTOCOL_VERSION {
            return Err(LockboxError::UnsupportedVersion(header.version));
        }
        rmp_serde::from_slice(bytes).map_err(LockboxError::Deserialization)
    }
}

/// Encode a message at the current protocol version.
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, LockboxError> {
    Envelope::new(body).to_bytes()
}

/// Decode a message, checking its protocol version.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LockboxError> {
    Envelope::from_bytes(bytes).map(|envelope| envelope.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Key, LoginRequest, Request, Response, SignupResponse};

    #[test]
    fn envelope_serialize_roundtrip() {
        let request = Request::Login(LoginRequest {
            email: "a@b.com".into(),
            auth_key: Key::from(42u64),
        });

        let bytes = encode(&request).unwrap();
        let restored: Request = decode(&bytes).unwrap();

        assert_eq!(restored, request);
    }

    #[test]
    fn envelope_msgpack_is_compact() {
        let bytes = encode(&Request::Fetch).unwrap();
        assert!(bytes.len() < 64);
    }

    #[test]
    fn wrong_version_rejected_before_body() {
        let envelope = Envelope {
            version: 2,
            body: Request::Fetch,
        };
        let bytes = envelope.to_bytes().unwrap();

        assert!(matches!(
            decode::<Request>(&bytes),
            Err(LockboxError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode::<Request>(&[0xC1, 0x00, 0xFF]),
            Err(LockboxError::Deserialization(_))
        ));
    }

    #[test]
    fn request_bytes_are_not_a_response() {
        let bytes = encode(&Request::Fetch).unwrap();
        assert!(decode::<Response>(&bytes).is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        #[derive(Serialize)]
        #[serde(tag = "type")]
        enum Bogus {
            Shell { cmd: String },
        }

        let bytes = encode(&Bogus::Shell { cmd: "rm".into() }).unwrap();
        assert!(decode::<Request>(&bytes).is_err());
    }

    #[test]
    fn response_roundtrip() {
        let response = Response::Signup(SignupResponse {
            success: false,
            email_taken: true,
        });
        let bytes = encode(&response).unwrap();
        assert_eq!(decode::<Response>(&bytes).unwrap(), response);
    }
}
