//! Proxy secrets as handed out by the billing panel.
//!
//! A secret travels as text in one of several encodings: lower or upper case
//! hex, URL-safe base64 or standard base64, with or without padding. All of
//! them name the same bytes, and a client may present any of them.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use std::fmt;
use thiserror::Error;

/// First byte of a fake-TLS secret.
pub const FAKE_TLS_PREFIX: u8 = 0xee;

/// Length of the obfuscation key that follows the prefix byte.
pub const KEY_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret is empty")]
    Empty,

    #[error("secret is neither hex nor base64")]
    Encoding,

    #[error("fake-TLS host is not valid UTF-8")]
    InvalidHost,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Parse a secret from text. Hex is tried before base64.
    pub fn parse(text: &str) -> Result<Self, SecretError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SecretError::Empty);
        }

        let bytes = match hex::decode(text) {
            Ok(bytes) => bytes,
            Err(_) => [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD]
                .into_iter()
                .find_map(|engine| engine.decode(text).ok())
                .ok_or(SecretError::Encoding)?,
        };
        if bytes.is_empty() {
            return Err(SecretError::Empty);
        }

        let secret = Self { bytes };
        if secret.is_fake_tls() && secret.host().is_none() {
            return Err(SecretError::InvalidHost);
        }
        Ok(secret)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Canonical form, used as the fallback lookup key.
    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    /// Every textual form under which a client may present this secret.
    pub fn encodings(&self) -> Vec<String> {
        let mut encodings = vec![
            self.hex(),
            self.base64(),
            URL_SAFE.encode(&self.bytes),
            STANDARD.encode(&self.bytes),
            STANDARD_NO_PAD.encode(&self.bytes),
        ];
        encodings.sort_unstable();
        encodings.dedup();
        encodings
    }

    pub fn is_fake_tls(&self) -> bool {
        self.bytes.len() > KEY_LEN + 1 && self.bytes[0] == FAKE_TLS_PREFIX
    }

    /// SNI host embedded in a fake-TLS secret.
    pub fn host(&self) -> Option<&str> {
        if !self.is_fake_tls() {
            return None;
        }
        std::str::from_utf8(self.bytes.get(KEY_LEN + 1..)?).ok()
    }
}

// Keep key material out of logs.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.bytes.len())
            .field("host", &self.host())
            .finish()
    }
}
