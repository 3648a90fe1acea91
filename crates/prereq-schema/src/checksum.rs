use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Both supported algorithms produce 256-bit digests.
const DIGEST_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected digest of a downloaded archive, written `<algorithm>:<hex>`.
///
/// A bare hex string is read as sha256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: &str) -> Result<Self, SchemaError> {
        let digest = digest.trim().to_ascii_lowercase();
        let invalid = |reason: String| SchemaError::InvalidChecksum {
            value: format!("{algorithm}:{digest}"),
            reason,
        };
        if digest.len() != DIGEST_HEX_LEN {
            return Err(invalid(format!(
                "expected {DIGEST_HEX_LEN} hex characters, got {}",
                digest.len()
            )));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("digest is not hexadecimal".to_owned()));
        }
        Ok(Self { algorithm, digest })
    }

    #[inline]
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.digest.eq_ignore_ascii_case(actual_hex.trim())
    }
}

impl FromStr for Checksum {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("sha256", hex)) => Self::new(ChecksumAlgorithm::Sha256, hex),
            Some(("blake3", hex)) => Self::new(ChecksumAlgorithm::Blake3, hex),
            Some((other, _)) => Err(SchemaError::InvalidChecksum {
                value: s.to_owned(),
                reason: format!("unsupported algorithm '{other}'"),
            }),
            None => Self::new(ChecksumAlgorithm::Sha256, s),
        }
    }
}

impl TryFrom<String> for Checksum {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn bare_hex_defaults_to_sha256() {
        let c: Checksum = HEX.parse().unwrap();
        assert_eq!(c.algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(c.digest(), HEX);
    }

    #[test]
    fn prefixed_blake3_parses() {
        let c: Checksum = format!("blake3:{HEX}").parse().unwrap();
        assert_eq!(c.algorithm(), ChecksumAlgorithm::Blake3);
        assert_eq!(c.to_string(), format!("blake3:{HEX}"));
    }

    #[test]
    fn uppercase_digest_is_normalized() {
        let c: Checksum = format!("sha256:{}", HEX.to_uppercase()).parse().unwrap();
        assert_eq!(c.digest(), HEX);
        assert!(c.matches(&HEX.to_uppercase()));
    }

    #[test]
    fn wrong_length_rejected() {
        assert!("sha256:abcd".parse::<Checksum>().is_err());
    }

    #[test]
    fn non_hex_rejected() {
        let bad = "z".repeat(64);
        assert!(bad.parse::<Checksum>().is_err());
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let err = format!("md5:{HEX}").parse::<Checksum>().unwrap_err();
        assert!(err.to_string().contains("unsupported algorithm 'md5'"));
    }
}
