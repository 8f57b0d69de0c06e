//! Reconciliation engine: drives every record toward "not stale".
//!
//! Each attempt re-queries staleness from the store, dispatches one
//! embedding request per stale record on a bounded worker set, waits out
//! the poll interval, and re-queries. Staleness is always recomputed from
//! current state rather than from a dispatch list, so a record mutated
//! between dispatch and poll is simply re-selected on the next attempt.
//!
//! Failure semantics: a single embedding failure never aborts the batch —
//! it is logged with the record id and the record stays stale for the next
//! attempt or the next invocation. Running out of attempts is reported as a
//! partial failure, not a crash.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ReconcileConfig;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::store::EmbeddingRepository;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Scope the stale query to one partition (space key), if set.
    pub partition: Option<String>,
    pub retry_limit: u32,
    pub poll_interval: Duration,
    /// Pause between outbound dispatches. A throttle on request rate, not
    /// a correctness mechanism.
    pub dispatch_delay: Duration,
    pub max_in_flight: usize,
}

impl ReconcileOptions {
    pub fn from_config(config: &ReconcileConfig, partition: Option<String>) -> Self {
        Self {
            partition,
            retry_limit: config.retry_limit,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            dispatch_delay: Duration::from_millis(config.dispatch_delay_ms),
            max_in_flight: config.max_in_flight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOutcome {
    /// Attempts actually used (1-based).
    pub attempts: u32,
    /// Successful embedding write-backs across all attempts.
    pub embedded: usize,
    /// Failed dispatches across all attempts.
    pub failed: usize,
    /// Records still stale when the engine stopped. Zero means convergence.
    pub remaining_stale: usize,
    /// True when the engine stopped because cancellation was requested.
    pub cancelled: bool,
}

impl ReconcileOutcome {
    pub fn converged(&self) -> bool {
        self.remaining_stale == 0 && !self.cancelled
    }
}

/// Embed a single record and write the vector back to the store.
///
/// Used for each per-record dispatch and by the single-record trigger on
/// the HTTP front door.
pub async fn embed_one(
    repo: &dyn EmbeddingRepository,
    embedder: &dyn Embedder,
    id: &str,
) -> Result<(), CoreError> {
    let Some(text) = repo.canonical_text(id).await? else {
        return Err(CoreError::Integrity(format!(
            "{} {} no longer exists",
            repo.kind(),
            id
        )));
    };

    let vector = embedder.embed(&text).await?;
    if vector.is_empty() {
        return Err(CoreError::Transient(format!(
            "model returned empty embedding for {} {}",
            repo.kind(),
            id
        )));
    }

    repo.write_embedding(id, &vector).await
}

/// Run reconciliation until the stale set is empty, the attempt budget is
/// exhausted, or cancellation is requested.
///
/// Cancellation is cooperative: `shutdown` is checked between attempts and
/// interrupts the inter-attempt wait; in-flight dispatches of the current
/// attempt are allowed to finish.
pub async fn reconcile(
    repo: Arc<dyn EmbeddingRepository>,
    embedder: Arc<dyn Embedder>,
    opts: &ReconcileOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ReconcileOutcome, CoreError> {
    let semaphore = Arc::new(Semaphore::new(opts.max_in_flight));
    let mut embedded = 0usize;
    let mut failed = 0usize;
    let mut attempts = 0u32;
    let mut cancelled = false;

    while attempts < opts.retry_limit {
        let stale = repo.stale_ids(opts.partition.as_deref()).await?;
        if stale.is_empty() {
            info!(kind = repo.kind(), "no stale records; reconciliation complete");
            return Ok(ReconcileOutcome {
                attempts,
                embedded,
                failed,
                remaining_stale: 0,
                cancelled: false,
            });
        }

        attempts += 1;
        info!(
            kind = repo.kind(),
            attempt = attempts,
            retry_limit = opts.retry_limit,
            stale = stale.len(),
            "dispatching embedding requests"
        );

        let mut tasks = JoinSet::new();
        for id in stale {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Transient("worker pool closed".to_string()))?;
            let repo = repo.clone();
            let embedder = embedder.clone();
            tasks.spawn(async move {
                let result = embed_one(repo.as_ref(), embedder.as_ref(), &id).await;
                drop(permit);
                (id, result)
            });

            if !opts.dispatch_delay.is_zero() {
                tokio::time::sleep(opts.dispatch_delay).await;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => embedded += 1,
                Ok((id, Err(e))) => {
                    failed += 1;
                    warn!(kind = repo.kind(), id = %id, "embedding failed: {}", e);
                }
                Err(e) => {
                    failed += 1;
                    warn!(kind = repo.kind(), "embedding task aborted: {}", e);
                }
            }
        }

        if *shutdown.borrow() {
            cancelled = true;
            break;
        }

        if attempts < opts.retry_limit {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        cancelled = true;
                        break;
                    }
                    // Cancellation side gone; fall back to plain polling.
                    tokio::time::sleep(opts.poll_interval).await;
                }
                _ = tokio::time::sleep(opts.poll_interval) => {}
            }
        }
    }

    let remaining_stale = repo.stale_ids(opts.partition.as_deref()).await?.len();
    if remaining_stale > 0 && !cancelled {
        // Reported, not fatal: the leftover records retry on the next run.
        error!(
            kind = repo.kind(),
            "{}",
            CoreError::ExhaustedRetry {
                attempts,
                remaining: remaining_stale
            }
        );
    }

    Ok(ReconcileOutcome {
        attempts,
        embedded,
        failed,
        remaining_stale,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{raw_page, test_store};
    use crate::store::PageRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: fails its first `fail_first` calls, then
    /// returns a fixed vector.
    struct FakeEmbedder {
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn reliable() -> Self {
            Self {
                fail_first: 0,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(fail_first: usize) -> Self {
            Self {
                fail_first,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_id(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(CoreError::Transient("model unavailable".to_string()))
            } else {
                Ok(vec![0.1, 0.2, 0.3])
            }
        }
    }

    fn fast_opts(retry_limit: u32) -> ReconcileOptions {
        ReconcileOptions {
            partition: None,
            retry_limit,
            poll_interval: Duration::from_millis(1),
            dispatch_delay: Duration::ZERO,
            max_in_flight: 2,
        }
    }

    fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_convergence_in_one_attempt() {
        let (_dir, store) = test_store().await;
        for id in ["p1", "p2", "p3"] {
            store.upsert_page("ENG", &raw_page(id, 1_700_000_100)).await.unwrap();
        }
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::reliable());

        let outcome = reconcile(repo.clone(), embedder, &fast_opts(3), no_shutdown().1)
            .await
            .unwrap();

        assert!(outcome.converged());
        assert_eq!(outcome.embedded, 3);
        assert_eq!(outcome.remaining_stale, 0);
        assert!(store.list_stale_page_ids(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_selects_nothing() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store));
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::reliable());

        let first = reconcile(repo.clone(), embedder.clone(), &fast_opts(3), no_shutdown().1)
            .await
            .unwrap();
        assert_eq!(first.embedded, 1);

        let second = reconcile(repo, embedder, &fast_opts(3), no_shutdown().1)
            .await
            .unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.attempts, 0);
        assert!(second.converged());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_to_convergence() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("ENG", &raw_page("p2", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store));
        // First two calls fail, so attempt one embeds nothing.
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::failing(2));

        let outcome = reconcile(repo, embedder, &fast_opts(3), no_shutdown().1)
            .await
            .unwrap();

        assert!(outcome.converged());
        assert_eq!(outcome.embedded, 2);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.attempts >= 2);
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_abort_batch() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("ENG", &raw_page("p2", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store));
        // Exactly one failure somewhere in the first attempt.
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::failing(1));

        let outcome = reconcile(repo, embedder, &fast_opts(3), no_shutdown().1)
            .await
            .unwrap();

        assert!(outcome.converged());
        assert_eq!(outcome.embedded, 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_reports_remaining() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("ENG", &raw_page("p2", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store));
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::failing(usize::MAX));

        let outcome = reconcile(repo, embedder, &fast_opts(2), no_shutdown().1)
            .await
            .unwrap();

        assert!(!outcome.converged());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.embedded, 0);
        assert_eq!(outcome.remaining_stale, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_attempts() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store));
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::failing(usize::MAX));

        let (tx, rx) = watch::channel(true);
        let opts = ReconcileOptions {
            poll_interval: Duration::from_secs(3600),
            ..fast_opts(5)
        };
        let outcome = reconcile(repo, embedder, &opts, rx).await.unwrap();
        drop(tx);

        assert!(outcome.cancelled);
        assert_eq!(outcome.attempts, 1, "stops after the in-flight attempt");
    }

    #[tokio::test]
    async fn test_reconcile_scoped_to_partition() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("OPS", &raw_page("p2", 1_700_000_100)).await.unwrap();
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(PageRepository::new(store.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::reliable());

        let opts = ReconcileOptions {
            partition: Some("ENG".to_string()),
            ..fast_opts(3)
        };
        let outcome = reconcile(repo, embedder, &opts, no_shutdown().1).await.unwrap();

        assert_eq!(outcome.embedded, 1);
        let still_stale = store.list_stale_page_ids(None).await.unwrap();
        assert_eq!(still_stale, vec!["p2".to_string()]);
    }

    #[tokio::test]
    async fn test_embed_one_updates_stale_record() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        let repo = PageRepository::new(store.clone());
        let embedder = FakeEmbedder::reliable();

        embed_one(&repo, &embedder, "p1").await.unwrap();

        let page = store.find_page("p1").await.unwrap().unwrap();
        assert!(page.embedding.is_some());
        assert!(page.embedded_at.unwrap() >= page.updated_at);
    }

    #[tokio::test]
    async fn test_embed_one_missing_record_is_integrity_error() {
        let (_dir, store) = test_store().await;
        let repo = PageRepository::new(store);
        let embedder = FakeEmbedder::reliable();

        let err = embed_one(&repo, &embedder, "ghost").await.unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
    }
}
