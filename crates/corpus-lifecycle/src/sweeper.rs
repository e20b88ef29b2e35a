//! Scheduled purge sweeper
//!
//! Runs on its own interval, independent of request handling. Each tick
//! purges expired trash entries and finishes any purge a crashed cleanup
//! job left half-done. All coordination goes through the document index.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::trash::TrashManager;

pub struct PurgeSweeper {
    manager: TrashManager,
    interval: Duration,
    batch_size: usize,
}

impl PurgeSweeper {
    pub fn new(manager: TrashManager, interval: Duration, batch_size: usize) -> Self {
        Self {
            manager,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    /// One pass: expired entries first, then interrupted purges. Returns the
    /// number of documents fully purged.
    pub async fn sweep_once(&self) -> usize {
        let mut total = 0;

        match self.manager.sweep_expired(self.batch_size).await {
            Ok(purged) => total += purged,
            Err(e) => warn!(error = %e, "Trash sweep failed"),
        }

        match self.manager.finish_interrupted_purges().await {
            Ok(finished) => total += finished,
            Err(e) => warn!(error = %e, "Interrupted-purge repair failed"),
        }

        if total > 0 {
            info!(purged = total, "Sweep pass complete");
        } else {
            debug!("Sweep pass found nothing to purge");
        }
        total
    }

    /// Run until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Purge sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Purge sweeper stopped");
                    break;
                }
            }
        }
    }

    /// Detach the sweeper onto the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_core::{
        DependencySettings, DocumentIdentifier, DocumentIndexProvider, DocumentRecord,
        DocumentStatus, Namespace,
    };
    use corpus_infra::DependencyGuard;
    use corpus_providers::{InMemoryDocumentIndex, InMemoryVectorStore};
    use std::sync::Arc;

    fn manager(retention: chrono::Duration) -> (TrashManager, Arc<InMemoryDocumentIndex>) {
        let index = Arc::new(InMemoryDocumentIndex::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let guard = DependencyGuard::new(
            "vector_store",
            &DependencySettings {
                failure_threshold: 5,
                open_timeout_secs: 30,
                half_open_max_calls: 2,
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 5,
                call_timeout_secs: 5,
            },
        );
        (
            TrashManager::new(index.clone(), vectors, guard, retention),
            index,
        )
    }

    #[tokio::test]
    async fn test_sweep_once_purges_expired() {
        let (manager, index) = manager(chrono::Duration::milliseconds(-1));
        let ns = Namespace::new("docs");

        let record = DocumentRecord::new(ns.clone(), "a.txt", "h1").with_source_path("/a.txt");
        let doc_id = record.doc_id;
        let identifier = DocumentIdentifier::SourcePath {
            namespace: ns.clone(),
            path: "/a.txt".to_string(),
        };
        index.create_document(record, &identifier).await.unwrap();
        manager.soft_delete(doc_id, &ns).await.unwrap();

        let sweeper = PurgeSweeper::new(manager, Duration::from_secs(3600), 10);
        let purged = sweeper.sweep_once().await;

        assert_eq!(purged, 1);
        let doc = index.get_document(doc_id, &ns).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Purged);
        assert!(index.list_trash(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (manager, _) = manager(chrono::Duration::days(30));
        let sweeper = PurgeSweeper::new(manager, Duration::from_millis(10), 10);

        let shutdown = CancellationToken::new();
        let handle = sweeper.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
    }
}
