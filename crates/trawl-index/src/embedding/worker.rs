//! Embedding worker task.
//!
//! Callers never await the embedder directly. Requests go through an mpsc
//! queue to a dedicated tokio task and answers come back on a oneshot
//! channel. Every request carries a monotonically increasing id. A caller
//! that times out or is superseded just drops its receiver; the worker
//! notices the closed channel and discards the late answer.
//!
//! ```text
//! caller ──embed()──▶ cache ──misses──▶ mpsc ──▶ worker task ──▶ Embedder
//!    ▲                                                 │
//!    └──────────────── oneshot (request id) ◀──────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trawl_core::{EmbeddingConfig, TrawlError};

use super::{check_batch, EmbedKind, Embedder, EmbeddingCache};

const QUEUE_DEPTH: usize = 64;

type Reply = Result<Vec<Vec<f32>>, TrawlError>;

struct EmbedJob {
    request_id: u64,
    texts: Vec<String>,
    kind: EmbedKind,
    reply: oneshot::Sender<Reply>,
}

/// Handle to the embedding task.
///
/// Must be created inside a tokio runtime.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use trawl_core::EmbeddingConfig;
/// use trawl_index::embedding::{EmbedKind, EmbeddingWorker, HashEmbedder};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let worker = EmbeddingWorker::spawn(Arc::new(HashEmbedder::new(16)), &EmbeddingConfig::default());
/// let texts = vec!["fn open()".to_string(), "fn close()".to_string()];
/// let vectors = worker.embed(&texts, EmbedKind::Document).await.unwrap();
/// assert_eq!(vectors.len(), 2);
/// worker.shutdown().await;
/// # }
/// ```
pub struct EmbeddingWorker {
    tx: mpsc::Sender<EmbedJob>,
    handle: JoinHandle<()>,
    next_request: AtomicU64,
    cache: EmbeddingCache,
    timeout: Duration,
    batch_size: usize,
    model: String,
}

impl EmbeddingWorker {
    /// Start the worker task in front of `embedder`.
    pub fn spawn(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let model = embedder.model().to_string();
        let handle = tokio::spawn(run(embedder, rx));
        Self {
            tx,
            handle,
            next_request: AtomicU64::new(1),
            cache: EmbeddingCache::new(config.cache_capacity),
            timeout: Duration::from_secs(config.timeout_secs),
            batch_size: config.batch_size.max(1),
            model,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Model served by the underlying embedder.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The worker's cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed `texts`, serving repeats from the cache.
    ///
    /// Only cache misses reach the embedder, each distinct text once. The
    /// whole call is bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// [`TrawlError::EmbedderTimeout`] when the bound expires,
    /// [`TrawlError::EmbedderUnavailable`] when the embedder fails, answers
    /// with the wrong number of vectors, or the worker has stopped.
    pub async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>, TrawlError> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<String> = Vec::new();
        let mut pending: HashMap<&str, Vec<usize>> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(vector) = self.cache.get(kind, text) {
                out.push(Some(vector));
                continue;
            }
            out.push(None);
            let slots = pending.entry(text.as_str()).or_default();
            if slots.is_empty() {
                misses.push(text.clone());
            }
            slots.push(i);
        }

        if !misses.is_empty() {
            debug!(
                hits = texts.len() - pending.values().map(Vec::len).sum::<usize>(),
                misses = misses.len(),
                "embedding cache lookup"
            );
            let computed = tokio::time::timeout(self.timeout, self.fetch(&misses, kind))
                .await
                .map_err(|_| TrawlError::EmbedderTimeout {
                    secs: self.timeout.as_secs(),
                })??;
            for (text, vector) in misses.iter().zip(computed) {
                self.cache.insert(kind, text, vector.clone());
                for &i in pending.get(text.as_str()).into_iter().flatten() {
                    out[i] = Some(vector.clone());
                }
            }
        }

        out.into_iter()
            .map(|v| {
                v.ok_or_else(|| TrawlError::EmbedderUnavailable("missing embedding".into()))
            })
            .collect()
    }

    /// Embed a single query string.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingWorker::embed`].
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, TrawlError> {
        self.embed(&[query.to_string()], EmbedKind::Query)
            .await?
            .pop()
            .ok_or_else(|| TrawlError::EmbedderUnavailable("empty response".into()))
    }

    async fn fetch(&self, texts: &[String], kind: EmbedKind) -> Reply {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.submit(batch.to_vec(), kind).await?);
        }
        Ok(all)
    }

    async fn submit(&self, texts: Vec<String>, kind: EmbedKind) -> Reply {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EmbedJob {
                request_id,
                texts,
                kind,
                reply,
            })
            .await
            .map_err(|_| TrawlError::EmbedderUnavailable("embedding worker stopped".into()))?;
        rx.await.map_err(|_| {
            TrawlError::EmbedderUnavailable(format!("request {request_id} was dropped"))
        })?
    }

    /// Close the queue and wait for the task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "embedding worker ended abnormally");
        }
    }
}

async fn run(embedder: Arc<dyn Embedder>, mut rx: mpsc::Receiver<EmbedJob>) {
    let mut inflight = tokio::task::JoinSet::new();
    while let Some(job) = rx.recv().await {
        if job.reply.is_closed() {
            debug!(request_id = job.request_id, "skipping abandoned embedding request");
            continue;
        }
        let embedder = Arc::clone(&embedder);
        inflight.spawn(async move {
            let expected = job.texts.len();
            let result = embedder
                .embed(&job.texts, job.kind)
                .await
                .and_then(|vectors| check_batch(vectors, expected));
            if job.reply.send(result).is_err() {
                debug!(request_id = job.request_id, "dropping late embedding response");
            }
        });
        while inflight.try_join_next().is_some() {}
    }
    while inflight.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        texts: AtomicUsize,
        delay: Duration,
        short_by_one: bool,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                texts: AtomicUsize::new(0),
                delay: Duration::ZERO,
                short_by_one: false,
            }
        }
    }

    #[async_trait]
    impl Embedder for Counting {
        async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut out: Vec<Vec<f32>> = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.short_by_one {
                out.pop();
            }
            Ok(out)
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn repeated_text_is_served_from_cache() {
        let embedder = Arc::new(Counting::new());
        let worker = EmbeddingWorker::spawn(embedder.clone(), &config());
        let texts = vec!["a".to_string(), "bb".to_string(), "a".to_string()];

        let first = worker.embed(&texts, EmbedKind::Document).await.unwrap();
        assert_eq!(first[0], first[2]);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 2);

        let second = worker.embed(&texts, EmbedKind::Document).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 2);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn misses_are_batched() {
        let embedder = Arc::new(Counting::new());
        let worker = EmbeddingWorker::spawn(embedder.clone(), &config());
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        worker.embed(&texts, EmbedKind::Document).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn slow_embedder_times_out() {
        let embedder = Arc::new(Counting {
            delay: Duration::from_secs(5),
            ..Counting::new()
        });
        let worker = EmbeddingWorker::spawn(embedder, &config())
            .with_timeout(Duration::from_millis(50));
        let err = worker
            .embed(&["x".to_string()], EmbedKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, TrawlError::EmbedderTimeout { .. }));
        assert!(worker.cache().get(EmbedKind::Document, "x").is_none());
    }

    #[tokio::test]
    async fn wrong_vector_count_is_unavailable() {
        let embedder = Arc::new(Counting {
            short_by_one: true,
            ..Counting::new()
        });
        let worker = EmbeddingWorker::spawn(embedder, &config());
        let err = worker
            .embed(&["x".to_string(), "y".to_string()], EmbedKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, TrawlError::EmbedderUnavailable(_)));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn empty_input_skips_the_embedder() {
        let embedder = Arc::new(Counting::new());
        let worker = EmbeddingWorker::spawn(embedder.clone(), &config());
        assert!(worker.embed(&[], EmbedKind::Query).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        worker.shutdown().await;
    }
}
