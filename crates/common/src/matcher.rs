//! Attribute matching for collection nodes.
//!
//! A [`Matcher`] decides which nodes of a collection participate in a mount.
//! The attribute query document read from disk compiles into a
//! [`JsonSubsetMatcher`].

use std::fmt::Debug;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::Attributes;

/// Document kind expected in attribute query files
pub const ATTRIBUTE_QUERY_KIND: &str = "AttributeQuery";

/// Pure, total predicate over a node's attributes
pub trait Matcher: Debug + Send + Sync {
    fn accepts(&self, attributes: &Attributes) -> bool;
}

/// Accepts attribute sets that contain every key of the query with an equal
/// value. Nested objects are compared as subsets; arrays and scalars must be
/// equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonSubsetMatcher {
    query: Attributes,
}

impl JsonSubsetMatcher {
    pub fn new(query: Attributes) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &Attributes {
        &self.query
    }
}

impl Matcher for JsonSubsetMatcher {
    fn accepts(&self, attributes: &Attributes) -> bool {
        is_subset(&self.query, attributes)
    }
}

fn is_subset(query: &Attributes, attributes: &Attributes) -> bool {
    query.iter().all(|(key, wanted)| match attributes.get(key) {
        Some(actual) => value_matches(wanted, actual),
        None => false,
    })
}

fn value_matches(wanted: &Value, actual: &Value) -> bool {
    match (wanted, actual) {
        (Value::Object(w), Value::Object(a)) => is_subset(w, a),
        _ => wanted == actual,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("failed to read attribute query {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse attribute query: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("unexpected document kind {0}, expected AttributeQuery")]
    Kind(String),
}

/// Attribute query document.
///
/// ```yaml
/// kind: AttributeQuery
/// apiVersion: client.emporous.io/v1alpha1
/// attributes:
///   size: small
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeQuery {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl AttributeQuery {
    /// Parse a YAML or JSON attribute query document
    pub fn parse(document: &str) -> Result<Self, QueryError> {
        let query: AttributeQuery = serde_yaml_ng::from_str(document)?;
        match query.kind.as_deref() {
            None | Some(ATTRIBUTE_QUERY_KIND) => Ok(query),
            Some(other) => Err(QueryError::Kind(other.to_string())),
        }
    }

    pub fn read(path: &Path) -> Result<Self, QueryError> {
        let document = std::fs::read_to_string(path).map_err(|source| QueryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&document)
    }

    pub fn matcher(&self) -> JsonSubsetMatcher {
        JsonSubsetMatcher::new(self.attributes.clone())
    }
}
