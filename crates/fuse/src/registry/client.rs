//! OCI distribution client.
//!
//! Resolves a reference to its manifest, lists manifest descriptors as
//! child nodes and reads blobs by range. Descriptor annotations become node
//! attributes; a JSON object stored under `uor.attributes` is merged in.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use common::registry::clamp_range;
use common::{Attributes, Collection, Digest, Node, RegistryClient, RegistryError};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RANGE, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::auth::{AuthConfigs, AuthError};
use super::reference::Reference;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Annotation holding a JSON object of structured attributes
pub const ATTRIBUTES_ANNOTATION: &str = "uor.attributes";

const MANIFEST_TYPES: [&str; 5] = [
    OCI_MANIFEST,
    OCI_INDEX,
    OCI_ARTIFACT_MANIFEST,
    DOCKER_MANIFEST,
    DOCKER_MANIFEST_LIST,
];

pub fn is_manifest_media_type(media_type: &str) -> bool {
    MANIFEST_TYPES.contains(&media_type)
}

/// Connection options for a registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Use http instead of https
    pub plain_http: bool,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Docker-style auth config files
    pub auth_configs: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid registry url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn to_node(&self) -> Node {
        let node = if is_manifest_media_type(&self.media_type) {
            Node::manifest(self.digest.clone(), self.size, &self.media_type)
        } else {
            Node::blob(self.digest.clone(), self.size, &self.media_type)
        };
        node.with_attributes(attributes_from(&self.annotations))
    }
}

/// Image manifest, artifact manifest or index
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub blobs: Vec<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Child descriptors in declared order
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.manifests
            .iter()
            .chain(self.blobs.iter())
            .chain(self.layers.iter())
    }
}

/// Convert annotations to attributes.
///
/// Plain annotations win over keys of the same name inside the
/// `uor.attributes` object.
pub fn attributes_from(annotations: &BTreeMap<String, String>) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(raw) = annotations.get(ATTRIBUTES_ANNOTATION) {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => attributes.extend(map),
            _ => {
                attributes.insert(ATTRIBUTES_ANNOTATION.to_string(), Value::String(raw.clone()));
            }
        }
    }
    for (key, value) in annotations {
        if key != ATTRIBUTES_ANNOTATION {
            attributes.insert(key.clone(), Value::String(value.clone()));
        }
    }
    attributes
}

/// `Range` header for `[offset, offset + length)`, `None` for the whole blob
pub fn range_header(offset: u64, length: u64) -> Option<String> {
    if offset == 0 && length == u64::MAX {
        return None;
    }
    let end = offset.saturating_add(length).saturating_sub(1);
    Some(format!("bytes={}-{}", offset, end))
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut values = HashMap::new();
        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after) = rest.split_once('=')?;
            let after = after.trim_start();
            let (value, remaining) = match after.strip_prefix('"') {
                Some(quoted) => {
                    let end = quoted.find('"')?;
                    (&quoted[..end], &quoted[end + 1..])
                }
                None => after.split_once(',').unwrap_or((after, "")),
            };
            values.insert(key.trim().to_ascii_lowercase(), value.to_string());
            rest = remaining.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        }

        Some(Self {
            realm: values.remove("realm")?,
            service: values.remove("service"),
            scope: values.remove("scope"),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Registry client bound to one repository
pub struct OciClient {
    http: Client,
    reference: Reference,
    base: Url,
    auth: AuthConfigs,
    token: Mutex<Option<String>>,
    manifests: Mutex<HashMap<Digest, Bytes>>,
}

impl std::fmt::Debug for OciClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciClient")
            .field("reference", &self.reference)
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl OciClient {
    pub fn new(reference: Reference, options: &ClientOptions) -> Result<Self, ClientError> {
        let scheme = if options.plain_http { "http" } else { "https" };
        let base = Url::parse(&format!("{}://{}/", scheme, reference.registry))?;
        let http = Client::builder()
            .danger_accept_invalid_certs(options.insecure)
            .build()?;
        let auth = AuthConfigs::load_or_default(&options.auth_configs)?;

        info!(
            registry = %reference.registry,
            repository = %reference.repository,
            plain_http = options.plain_http,
            insecure = options.insecure,
            credentials = auth.get(&reference.registry).is_some(),
            "registry client configured"
        );

        Ok(Self {
            http,
            reference,
            base,
            auth,
            token: Mutex::new(None),
            manifests: Mutex::new(HashMap::new()),
        })
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn url(&self, kind: &str, selector: &str) -> Result<Url, String> {
        self.base
            .join(&format!("v2/{}/{}/{}", self.reference.repository, kind, selector))
            .map_err(|e| e.to_string())
    }

    fn request(&self, url: &Url, accept: Option<&str>, range: Option<&str>) -> RequestBuilder {
        let mut request = self.http.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let token = self.token.lock().clone();
        match (token, self.auth.get(&self.reference.registry)) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some(credentials)) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            (None, None) => request,
        }
    }

    /// GET with one retry after answering a bearer challenge
    async fn get(&self, url: &Url, accept: Option<&str>, range: Option<&str>) -> Result<Response, String> {
        let response = self
            .request(url, accept, range)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
            .ok_or_else(|| format!("unauthorized: {}", url))?;
        self.authenticate(&challenge).await?;

        self.request(url, accept, range)
            .send()
            .await
            .map_err(|e| e.to_string())
    }

    async fn authenticate(&self, challenge: &BearerChallenge) -> Result<(), String> {
        let mut url = Url::parse(&challenge.realm).map_err(|e| e.to_string())?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        let mut request = self.http.get(url);
        if let Some(credentials) = self.auth.get(&self.reference.registry) {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("token request failed: {}", response.status()));
        }
        let body: TokenResponse = response.json().await.map_err(|e| e.to_string())?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| "token response without token".to_string())?;

        debug!(realm = %challenge.realm, "obtained registry token");
        *self.token.lock() = Some(token);
        Ok(())
    }

    /// Fetch a manifest body by tag or digest
    async fn manifest(&self, selector: &str) -> Result<(Bytes, Option<String>, Option<String>), String> {
        let url = self.url("manifests", selector)?;
        let response = self.get(&url, Some(&MANIFEST_TYPES.join(", ")), None).await?;
        if !response.status().is_success() {
            return Err(format!("GET {} returned {}", url, response.status()));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let digest = header("docker-content-digest");
        let content_type = header(CONTENT_TYPE.as_str());
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok((body, digest, content_type))
    }

    async fn manifest_by_digest(&self, digest: &Digest) -> Result<Manifest, RegistryError> {
        let cached = self.manifests.lock().get(digest).cloned();
        let body = match cached {
            Some(body) => body,
            None => {
                let (body, _, _) = self
                    .manifest(digest.as_str())
                    .await
                    .map_err(|e| RegistryError::traversal(digest, e))?;
                if !digest.verify(&body) {
                    return Err(RegistryError::traversal(digest, "manifest digest mismatch"));
                }
                self.manifests.lock().insert(digest.clone(), body.clone());
                body
            }
        };
        serde_json::from_slice(&body).map_err(|e| RegistryError::traversal(digest, e))
    }
}

#[async_trait]
impl RegistryClient for OciClient {
    async fn resolve(&self, reference: &str) -> Result<Collection, RegistryError> {
        let parsed = Reference::parse(reference)?;
        if !parsed.same_repository(&self.reference) {
            return Err(RegistryError::InvalidReference(format!(
                "{} is not in repository {}",
                reference, self.reference
            )));
        }

        let (body, header_digest, content_type) = self
            .manifest(&parsed.selector())
            .await
            .map_err(|e| RegistryError::resolution(reference, e))?;

        let digest = match header_digest.as_deref().map(Digest::parse) {
            Some(Ok(digest)) => digest,
            _ => Digest::sha256(&body),
        };
        if !digest.verify(&body) {
            return Err(RegistryError::resolution(reference, "manifest digest mismatch"));
        }
        if let Some(pinned) = &parsed.digest {
            if pinned != &digest {
                return Err(RegistryError::resolution(
                    reference,
                    format!("resolved {} but reference pins {}", digest, pinned),
                ));
            }
        }

        let manifest: Manifest =
            serde_json::from_slice(&body).map_err(|e| RegistryError::resolution(reference, e))?;
        let media_type = manifest
            .media_type
            .clone()
            .or(content_type)
            .unwrap_or_else(|| OCI_MANIFEST.to_string());

        let root = Node::manifest(digest.clone(), body.len() as u64, media_type)
            .with_attributes(attributes_from(&manifest.annotations));
        self.manifests.lock().insert(digest.clone(), body);

        info!(reference, digest = %digest, "resolved collection");
        Ok(Collection::new(reference, vec![root]))
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>, RegistryError> {
        if !node.is_manifest() {
            return Ok(Vec::new());
        }
        let manifest = self.manifest_by_digest(&node.digest).await?;
        Ok(manifest.descriptors().map(Descriptor::to_node).collect())
    }

    async fn fetch(&self, digest: &Digest, offset: u64, length: u64) -> Result<Bytes, RegistryError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let url = self
            .url("blobs", digest.as_str())
            .map_err(|e| RegistryError::fetch(digest, e))?;
        let range = range_header(offset, length);

        let response = self
            .get(&url, None, range.as_deref())
            .await
            .map_err(|e| RegistryError::fetch(digest, e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .bytes()
                .await
                .map_err(|e| RegistryError::fetch(digest, e)),
            StatusCode::OK => {
                // Range ignored by the server
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| RegistryError::fetch(digest, e))?;
                Ok(body.slice(clamp_range(body.len(), offset, length)))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            status => Err(RegistryError::fetch(
                digest,
                format!("GET {} returned {}", url, status),
            )),
        }
    }
}
