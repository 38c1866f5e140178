use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bucketfs_daemon::cli::{Cli, Provider};
use bucketfs_daemon::fuse::NegativeCacheConfig;
use bucketfs_daemon::mount::{mount, MountConfig};
use bucketfs_store::{ObjectStore, S3Config, S3ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = connect_provider(&cli)
        .await
        .context("failed to connect to storage provider")?;
    info!(bucket = %cli.bucket, "connected to target provider");

    std::fs::create_dir_all(&cli.mountdir)
        .with_context(|| format!("cannot create mount point {}", cli.mountdir.display()))?;

    let config = MountConfig {
        mountpoint: cli.mountdir.clone(),
        call_timeout: Duration::from_secs(cli.call_timeout_secs),
        negative_cache: NegativeCacheConfig {
            ttl_secs: cli.negative_ttl_secs,
            capacity: cli.negative_capacity,
        },
    };
    let session = mount(store.clone(), config).context("failed to mount filesystem")?;
    info!(mountpoint = %cli.mountdir.display(), "mounted to target directory");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    session.unmount();
    store.close().await;
    Ok(())
}

async fn connect_provider(cli: &Cli) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match cli.provider {
        Provider::Aws => {
            let config = if cli.env == "local" {
                S3Config::localstack(cli.bucket.clone())
            } else {
                S3Config::new(cli.bucket.clone())
            };
            let store = S3ObjectStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}
