//! Directory server
//!
//! Configuration comes from `ROSTER_CONFIG` (TOML) plus `ROSTER_*`
//! environment overrides; see `roster::config`.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use roster::observability::init_tracing;
use roster::{DirectoryConfig, DirectoryServer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = DirectoryConfig::load()?;
    init_tracing(&config.logging).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        region = %config.region,
        http = %config.http.listen_addr,
        required_fields = ?config.write_path.required_fields,
        "starting directory server"
    );

    DirectoryServer::new(config).run().await?;
    Ok(())
}
