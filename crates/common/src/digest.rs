//! Content digests in OCI `algorithm:encoded` form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};

/// Number of encoded characters used when a short digest fragment is needed.
pub const SHORT_LEN: usize = 12;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest is missing an algorithm prefix: {0}")]
    MissingAlgorithm(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid encoded digest for {algorithm}: {encoded}")]
    InvalidEncoding { algorithm: String, encoded: String },
}

/// A validated content digest, e.g. `sha256:2c26b4...`.
///
/// Digests are the identity of every node in a collection: two nodes with
/// the same digest have the same content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingAlgorithm(s.to_string()))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        };

        let valid = encoded.len() == expected_len
            && encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(DigestError::InvalidEncoding {
                algorithm: algorithm.to_string(),
                encoded: encoded.to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Compute the sha256 digest of some content
    pub fn sha256(data: &[u8]) -> Self {
        Self(format!("sha256:{}", hex::encode(Sha256::digest(data))))
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    /// Short fragment of the encoded digest, used to disambiguate names
    pub fn short(&self) -> &str {
        let encoded = self.encoded();
        &encoded[..SHORT_LEN.min(encoded.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that `data` hashes to this digest
    pub fn verify(&self, data: &[u8]) -> bool {
        let actual = match self.algorithm() {
            "sha256" => hex::encode(Sha256::digest(data)),
            "sha512" => hex::encode(Sha512::digest(data)),
            _ => return false,
        };
        actual == self.encoded()
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256() {
        let digest = Digest::sha256(b"hello");
        assert_eq!(digest.as_str(), HELLO);
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.short(), "2cf24dba5fb0");
        assert!(digest.verify(b"hello"));
        assert!(!digest.verify(b"hello!"));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Digest::parse(HELLO).unwrap(), Digest::sha256(b"hello"));
        assert!(matches!(
            Digest::parse("2cf24dba"),
            Err(DigestError::MissingAlgorithm(_))
        ));
        assert!(matches!(
            Digest::parse("md5:abcd"),
            Err(DigestError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            Digest::parse("sha256:XYZ"),
            Err(DigestError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_serde() {
        let digest = Digest::sha256(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:nope\"").is_err());
    }
}
