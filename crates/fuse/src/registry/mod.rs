//! Registry access: reference parsing, credentials, the OCI client and the
//! cache-first wrapper used by mounts.

mod auth;
mod caching;
mod client;
mod reference;

pub use auth::{AuthConfigs, AuthError, Credentials};
pub use caching::CachingClient;
pub use client::{
    attributes_from, is_manifest_media_type, BearerChallenge, ClientError, ClientOptions,
    Descriptor, Manifest, OciClient, ATTRIBUTES_ANNOTATION,
};
pub use reference::Reference;
