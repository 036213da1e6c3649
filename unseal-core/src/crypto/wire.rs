use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::errors::{Error, Result};

/// Prefix written in front of every ciphertext this crate produces.
pub const CIPHERTEXT_PREFIX: &str = "vault";

/// Parsed form of `"<prefix>:v<version>:<base64 payload>"`.
#[derive(Clone, PartialEq, Eq)]
pub struct WireCiphertext {
    pub prefix: String,
    pub version: u32,
    pub payload: Vec<u8>,
}

impl WireCiphertext {
    pub fn new(version: u32, payload: Vec<u8>) -> Self {
        Self {
            prefix: CIPHERTEXT_PREFIX.to_string(),
            version,
            payload,
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::validation("invalid ciphertext: empty"));
        }

        let fields: Vec<&str> = token.split(':').collect();
        let [prefix, version, payload] = fields.as_slice() else {
            return Err(Error::validation(
                "invalid ciphertext: expected <prefix>:v<version>:<payload>",
            ));
        };

        if prefix.is_empty() {
            return Err(Error::validation("invalid ciphertext: missing prefix"));
        }

        let version = version
            .strip_prefix('v')
            .ok_or_else(|| Error::validation("invalid ciphertext: missing version marker"))?
            .parse::<u32>()
            .map_err(|_| Error::validation("invalid ciphertext: version is not a number"))?;
        if version == 0 {
            return Err(Error::validation("invalid ciphertext: version must be positive"));
        }

        if payload.is_empty() {
            return Err(Error::validation("invalid ciphertext: empty payload"));
        }
        let payload = STANDARD
            .decode(payload)
            .map_err(|_| Error::validation("invalid ciphertext: payload is not base64"))?;

        Ok(Self {
            prefix: (*prefix).to_string(),
            version,
            payload,
        })
    }
}

impl fmt::Display for WireCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:v{}:{}",
            self.prefix,
            self.version,
            STANDARD.encode(&self.payload)
        )
    }
}

impl fmt::Debug for WireCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireCiphertext")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl FromStr for WireCiphertext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
