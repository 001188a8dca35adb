use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blob_cache::{BlobCache, BlobCacheError};
use clap::Args;
use common::{RegistryClient, RegistryError};
use tokio::runtime::Handle;
use tracing::{info, warn};

use emporous_fuse::config::{ConfigError, FsOptions, MountConfig};
use emporous_fuse::fuse::{wait_for_signal, LiveMount};
use emporous_fuse::lifecycle::{MountError, Mounter};
use emporous_fuse::registry::{CachingClient, ClientError, ClientOptions, OciClient, Reference};
use emporous_fuse::vfs::ContentCacheConfig;

use crate::cli::op::{Op, OpContext};

/// Mount a collection read-only at an existing directory
#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Collection reference, e.g. localhost:5001/test:latest
    pub source: String,

    /// Directory to mount the collection at
    pub mount_point: PathBuf,

    /// Auth config paths when contacting registries
    #[arg(short = 'c', long = "configs")]
    pub configs: Vec<PathBuf>,

    /// Allow connections to registries without valid TLS certificates
    #[arg(short = 'i', long)]
    pub insecure: bool,

    /// Use plain http instead of https
    #[arg(long)]
    pub plain_http: bool,

    /// Attribute query config path selecting which files appear
    #[arg(long = "attributes")]
    pub attributes: Option<PathBuf>,

    /// Skip collection signature verification
    #[arg(long)]
    pub no_verify: bool,

    /// In-memory content cache size
    #[arg(long, default_value_t = 256)]
    pub cache_size_mb: u64,

    /// Kernel attribute cache timeout
    #[arg(long, default_value_t = 60)]
    pub attr_ttl_secs: u64,
}

impl Mount {
    pub fn config(&self) -> MountConfig {
        MountConfig {
            source: self.source.clone(),
            mount_point: self.mount_point.clone(),
            client: ClientOptions {
                plain_http: self.plain_http,
                insecure: self.insecure,
                auth_configs: self.configs.clone(),
            },
            attribute_query: self.attributes.clone(),
            verify: !self.no_verify,
            fs: FsOptions {
                attr_ttl: Duration::from_secs(self.attr_ttl_secs),
                cache: ContentCacheConfig {
                    max_size_mb: self.cache_size_mb,
                    ..Default::default()
                },
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountOpError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("error configuring client: {0}")]
    Client(#[from] ClientError),
    #[error("cache error: {0}")]
    Cache(#[from] BlobCacheError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl Op for Mount {
    type Error = MountOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let config = self.config();
        config.validate()?;
        let matcher = config.matcher()?;

        info!(reference = %config.source, "resolving artifacts");
        if config.verify {
            // Signature checks happen before mounting, outside this tool
            warn!(
                reference = %config.source,
                "signature verification is not performed; pass --no-verify to silence"
            );
        }

        let reference = Reference::parse(&config.source)?;
        let remote = OciClient::new(reference, &config.client)?;
        let cache_dir = ctx.config.ensure_cache_dir()?;
        let cache = BlobCache::new_local(cache_dir).await?;
        let client: Arc<dyn RegistryClient> = Arc::new(CachingClient::new(remote, cache));

        let mounter = Mounter::new(client, config.fs.clone());
        let fs = Arc::new(mounter.prepare(&config.source, matcher).await?);

        info!(mount_point = %config.mount_point.display(), "mounting collection");
        let live = LiveMount::mount(fs, &config.mount_point, &config.fs, Handle::current())?;

        tokio::select! {
            result = wait_for_signal() => result?,
            _ = live.shutdown_handle().cancelled() => info!("filesystem unmounted externally"),
        }
        live.unmount();

        Ok(format!("unmounted {}", config.mount_point.display()))
    }
}
