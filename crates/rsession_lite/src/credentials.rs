use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::CredentialError;

/// Well-known "simple" authentication type, with the well-known flag bit set.
pub const SIMPLE_AUTH_TYPE: u8 = 0x80;

/// A secret value that never shows up in `Debug` or `Display` output.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw secret. Keep the result out of logs.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Username/secret pair presented by the initiator at setup time.
#[derive(Debug)]
pub struct Credentials {
    username: String,
    secret: Secret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Encode as setup metadata.
    ///
    /// Layout: auth type (1 byte), username length (u16, big endian),
    /// username, then the secret until the end of the buffer.
    pub fn encode(&self) -> Result<Bytes, CredentialError> {
        let username = self.username.as_bytes();
        let len = u16::try_from(username.len())
            .map_err(|_| CredentialError::UsernameTooLong(username.len()))?;

        let secret = self.secret.expose_secret().as_bytes();
        let mut buf = BytesMut::with_capacity(3 + username.len() + secret.len());
        buf.put_u8(SIMPLE_AUTH_TYPE);
        buf.put_u16(len);
        buf.put_slice(username);
        buf.put_slice(secret);
        Ok(buf.freeze())
    }

    /// Decode setup metadata produced by [`Credentials::encode`].
    pub fn decode(mut metadata: Bytes) -> Result<Self, CredentialError> {
        if !metadata.has_remaining() {
            return Err(CredentialError::Empty);
        }

        let auth_type = metadata.get_u8();
        if auth_type != SIMPLE_AUTH_TYPE {
            return Err(CredentialError::UnsupportedAuthType(auth_type));
        }

        if metadata.remaining() < 2 {
            return Err(CredentialError::Truncated);
        }
        let len = usize::from(metadata.get_u16());
        if metadata.remaining() < len {
            return Err(CredentialError::Truncated);
        }

        let username = metadata.split_to(len);
        let username = std::str::from_utf8(&username)?.to_owned();
        let secret = std::str::from_utf8(&metadata)?.to_owned();

        Ok(Self {
            username,
            secret: Secret::new(secret),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = Credentials::new("memphis", "pwd").encode().unwrap();
        assert_eq!(encoded[0], SIMPLE_AUTH_TYPE);
        assert_eq!(&encoded[1..3], &[0, 7]);
        assert_eq!(&encoded[3..10], b"memphis");
        assert_eq!(&encoded[10..], b"pwd");
    }

    #[test]
    fn test_decode_recovers_pair() {
        let encoded = Credentials::new("memphis", "pwd").encode().unwrap();
        let decoded = Credentials::decode(encoded).unwrap();
        assert_eq!(decoded.username(), "memphis");
        assert_eq!(decoded.secret().expose_secret(), "pwd");
    }

    #[test]
    fn test_empty_secret_is_allowed() {
        let encoded = Credentials::new("memphis", "").encode().unwrap();
        let decoded = Credentials::decode(encoded).unwrap();
        assert_eq!(decoded.secret().expose_secret(), "");
    }

    #[test]
    fn test_decode_empty_metadata() {
        let result = Credentials::decode(Bytes::new());
        assert!(matches!(result, Err(CredentialError::Empty)));
    }

    #[test]
    fn test_decode_wrong_auth_type() {
        let result = Credentials::decode(Bytes::from_static(&[0x01, 0, 0]));
        assert!(matches!(
            result,
            Err(CredentialError::UnsupportedAuthType(0x01))
        ));
    }

    #[test]
    fn test_decode_truncated_username() {
        let result = Credentials::decode(Bytes::from_static(&[SIMPLE_AUTH_TYPE, 0, 9, b'm']));
        assert!(matches!(result, Err(CredentialError::Truncated)));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let result = Credentials::decode(Bytes::from_static(&[SIMPLE_AUTH_TYPE, 0, 1, 0xff]));
        assert!(matches!(result, Err(CredentialError::InvalidUtf8(_))));
    }

    #[test]
    fn test_secret_is_redacted() {
        let creds = Credentials::new("memphis", "pwd");
        let debug = format!("{creds:?}");
        assert!(debug.contains("memphis"));
        assert!(!debug.contains("pwd"));
        assert_eq!(creds.secret().to_string(), "[REDACTED]");
    }
}
