use std::fmt;
use std::str::FromStr;

use common::{Digest, RegistryError};

pub const DEFAULT_TAG: &str = "latest";

/// A parsed `host[:port]/repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl Reference {
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidReference(format!("{s}: {reason}"));

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => (
                rest,
                Some(Digest::parse(digest).map_err(|e| invalid(&e.to_string()))?),
            ),
            None => (s, None),
        };

        let (registry, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing registry host"))?;
        if registry.is_empty() {
            return Err(invalid("missing registry host"));
        }

        // A colon after the last slash separates the tag
        let (repository, tag) = match path.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
            _ => (path, None),
        };

        let valid_repo = !repository.is_empty()
            && repository.split('/').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
            });
        if !valid_repo {
            return Err(invalid("invalid repository name"));
        }
        if let Some(tag) = &tag {
            let valid_tag = !tag.is_empty()
                && tag.len() <= 128
                && tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c));
            if !valid_tag {
                return Err(invalid("invalid tag"));
            }
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// The manifest selector: digest if pinned, else tag, else `latest`
    pub fn selector(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// Same registry and repository
    pub fn same_repository(&self, other: &Reference) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }
}

impl FromStr for Reference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged() {
        let r = Reference::parse("localhost:5001/test:latest").unwrap();
        assert_eq!(r.registry, "localhost:5001");
        assert_eq!(r.repository, "test");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.selector(), "latest");
        assert_eq!(r.to_string(), "localhost:5001/test:latest");
    }

    #[test]
    fn test_parse_nested_untagged() {
        let r = Reference::parse("ghcr.io/org/team/collection").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/team/collection");
        assert_eq!(r.tag, None);
        assert_eq!(r.selector(), DEFAULT_TAG);
    }

    #[test]
    fn test_parse_digest() {
        let digest = Digest::sha256(b"manifest");
        let r: Reference = format!("registry.example.com/repo:v1@{}", digest)
            .parse()
            .unwrap();
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.digest.as_ref(), Some(&digest));
        assert_eq!(r.selector(), digest.to_string());
    }

    #[test]
    fn test_parse_invalid() {
        for bad in [
            "no-registry",
            "/repo:tag",
            "host/Upper",
            "host/repo:",
            "host/repo@sha256:abc",
            "host//repo",
        ] {
            assert!(
                matches!(Reference::parse(bad), Err(RegistryError::InvalidReference(_))),
                "{bad} should be rejected"
            );
        }
    }
}
