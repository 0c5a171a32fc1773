use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Strongly typed request fingerprint: lower-case hex SHA-256 of `METHOD:path`.
///
/// The same method and path always map to the same fingerprint, which is how
/// a registered mock is matched against incoming requests.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(method: &str, path: &str) -> Self {
        Self(hex_sha256(format!("{}:{}", method, path).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_sha256(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter() {
        hex.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
        hex.push(char::from(HEX_DIGITS[usize::from(byte & 0x0f)]));
    }
    hex
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rejected fingerprint text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// Not exactly 64 characters long
    InvalidLength(usize),
    /// Contains something other than lower-case hex digits
    InvalidCharacter(char),
}

impl Display for FingerprintError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintError::InvalidLength(len) => write!(
                f,
                "fingerprint must be {} hex characters, got {}",
                FINGERPRINT_LEN, len
            ),
            FingerprintError::InvalidCharacter(c) => {
                write!(f, "invalid character {:?} in fingerprint", c)
            }
        }
    }
}

impl std::error::Error for FingerprintError {}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != FINGERPRINT_LEN {
            return Err(FingerprintError::InvalidLength(s.len()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(FingerprintError::InvalidCharacter(c));
        }
        Ok(Fingerprint(s.to_string()))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Fingerprint>().map_err(serde::de::Error::custom)
    }
}
