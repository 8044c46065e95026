use super::gossip_manager::GossipManager;
use super::http;
use crate::config::DirectoryConfig;
use crate::replication::{ReplicationCoordinator, ReplicationLog};
use crate::service::DirectoryService;
use crate::store::InMemoryRecordStore;
use crate::write_path::WritePathController;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("http server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// One region of the directory: HTTP front end plus, when replication is
/// enabled, the gossip listener and push loop
pub struct DirectoryServer {
    config: DirectoryConfig,
    service: Arc<DirectoryService<InMemoryRecordStore>>,
    gossip: Option<Arc<GossipManager<InMemoryRecordStore>>>,
}

impl DirectoryServer {
    pub fn new(config: DirectoryConfig) -> Self {
        let mut store = InMemoryRecordStore::new(config.region_id())
            .with_max_page_size(config.pagination.max_page_size);
        let outbox = config.replication.enabled.then(|| Arc::new(ReplicationLog::new()));
        if let Some(outbox) = &outbox {
            store = store.with_change_log(outbox.clone());
        }
        let store = Arc::new(store);
        let writer = WritePathController::new(
            store.clone(),
            config.validator(),
            config.retry.policy(),
        );

        let gossip = if let Some(outbox) = outbox {
            let coordinator = Arc::new(ReplicationCoordinator::new(store, config.retry.policy()));
            Some(Arc::new(GossipManager::new(
                config.replication.clone(),
                outbox,
                coordinator,
            )))
        } else {
            None
        };

        let service = Arc::new(DirectoryService::new(
            writer,
            config.pagination.page_size_hint,
        ));
        DirectoryServer {
            config,
            service,
            gossip,
        }
    }

    pub fn service(&self) -> &Arc<DirectoryService<InMemoryRecordStore>> {
        &self.service
    }

    pub fn gossip(&self) -> Option<&Arc<GossipManager<InMemoryRecordStore>>> {
        self.gossip.as_ref()
    }

    async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = Self::bind(&self.config.http.listen_addr).await?;
        let http_addr: Option<SocketAddr> = listener.local_addr().ok();

        if let Some(gossip) = &self.gossip {
            let gossip_listener = Self::bind(&self.config.replication.listen_addr).await?;
            let server = gossip.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(gossip_listener).await {
                    error!(error = %e, "gossip listener stopped");
                }
            });
            tokio::spawn(gossip.clone().run());
        }

        info!(
            region = %self.config.region,
            addr = ?http_addr,
            replication = self.config.replication.enabled,
            "directory server listening"
        );

        axum::serve(listener, http::router(self.service.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(ServerError::Serve)?;

        info!("directory server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStore;

    #[test]
    fn test_single_region_has_no_gossip() {
        let server = DirectoryServer::new(DirectoryConfig::test());
        assert!(server.gossip().is_none());
        assert!(server.service().store().change_log().is_none());
        assert_eq!(server.service().store().region().as_str(), "test-region");
    }

    #[test]
    fn test_replicated_region_wires_gossip() {
        let mut config = DirectoryConfig::test();
        config.replication.enabled = true;
        config.replication.peers = vec!["127.0.0.1:7001".into()];
        let server = DirectoryServer::new(config);
        assert!(server.gossip().is_some());
        assert!(server.service().store().change_log().is_some());
    }
}
