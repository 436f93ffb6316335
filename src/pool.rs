use std::{str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
};

/// What a full queue does to new submissions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for a free slot.
    #[default]
    Block,
    /// Fail immediately with [`Error::PoolSaturated`].
    Reject,
}

impl FromStr for Backpressure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => Err(Error::Config(format!(
                "unknown backpressure policy '{other}'"
            ))),
        }
    }
}

enum Input {
    Documents(Vec<String>),
    Query(String),
}

struct Job {
    input: Input,
    reply: oneshot::Sender<Result<Vec<Vec<f32>>>>,
}

/// A fixed set of workers turning text into vectors off the async runtime.
///
/// Jobs go through a bounded queue of `queue_depth` entries; each worker
/// runs the shared embedder on the blocking thread pool so model work never
/// stalls the tasks driving indexing or queries.
pub struct EmbeddingPool {
    embedder: Arc<dyn Embedder>,
    sender: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    backpressure: Backpressure,
}

impl EmbeddingPool {
    /// Start `workers` workers. Must be called from within a tokio runtime.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        workers: usize,
        queue_depth: usize,
        backpressure: Backpressure,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let embedder = Arc::clone(&embedder);
                tokio::spawn(worker_loop(worker, receiver, embedder))
            })
            .collect();

        debug!(workers, queue_depth, ?backpressure, "embedding pool started");

        Self {
            embedder,
            sender: std::sync::Mutex::new(Some(sender)),
            workers: std::sync::Mutex::new(handles),
            backpressure,
        }
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        match self.sender.lock() {
            Ok(guard) => guard
                .as_ref()
                .map_or(0, |s| s.max_capacity() - s.capacity()),
            Err(_) => 0,
        }
    }

    /// Embed document texts, one vector per text.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.submit(Input::Documents(texts)).await
    }

    /// Embed a search query.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.submit(Input::Query(query.to_string()))
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingModel("model returned no vector".into()))
    }

    async fn submit(&self, input: Input) -> Result<Vec<Vec<f32>>> {
        let sender = self.sender.lock()?.clone().ok_or(Error::PoolClosed)?;
        let (reply, response) = oneshot::channel();
        let job = Job { input, reply };

        match self.backpressure {
            Backpressure::Block => {
                sender.send(job).await.map_err(|_| Error::PoolClosed)?;
            }
            Backpressure::Reject => {
                sender.try_send(job).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => Error::PoolSaturated,
                    mpsc::error::TrySendError::Closed(_) => Error::PoolClosed,
                })?;
            }
        }

        response.await.map_err(|_| Error::PoolClosed)?
    }

    /// Stop accepting jobs and wait for the workers to drain the queue.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().ok().and_then(|mut s| s.take()));
        let handles: Vec<_> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "embedding worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    embedder: Arc<dyn Embedder>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(Job { input, reply }) = job else {
            break;
        };

        let embedder = Arc::clone(&embedder);
        let result = tokio::task::spawn_blocking(move || match input {
            Input::Documents(texts) => {
                let vectors = embedder.embed(&texts)?;
                if vectors.len() != texts.len() {
                    return Err(Error::EmbeddingModel(format!(
                        "model returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    )));
                }
                Ok(vectors)
            }
            Input::Query(query) => Ok(vec![embedder.embed_query(&query)?]),
        })
        .await
        .unwrap_or_else(|e| {
            Err(Error::EmbeddingModel(format!("embedding task failed: {e}")))
        });

        // The caller may have given up waiting.
        let _ = reply.send(result);
    }
    debug!(worker, "embedding worker stopped");
}

impl std::fmt::Debug for EmbeddingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingPool")
            .field("model_id", &self.embedder.model_id())
            .field("backpressure", &self.backpressure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::embedding::FeatureHashEmbedder;

    struct SlowEmbedder;

    impl Embedder for SlowEmbedder {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn embeds_documents_and_queries() {
        let pool = EmbeddingPool::new(
            Arc::new(FeatureHashEmbedder::new(16)),
            2,
            4,
            Backpressure::Block,
        );
        let vectors = pool
            .embed(vec!["a b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 16);

        let query = pool.embed_query("a b").await.unwrap();
        assert_eq!(query, vectors[0]);
        assert!(pool.embed(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reject_policy_reports_saturation() {
        let pool = Arc::new(EmbeddingPool::new(
            Arc::new(SlowEmbedder),
            1,
            1,
            Backpressure::Reject,
        ));

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.embed(vec![format!("t{i}")]).await })
            })
            .collect();

        let mut saturated = 0;
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::PoolSaturated) => saturated += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saturated >= 1);
        assert!(ok >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn block_policy_completes_every_job() {
        let pool = Arc::new(EmbeddingPool::new(
            Arc::new(FeatureHashEmbedder::new(8)),
            1,
            1,
            Backpressure::Block,
        ));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.embed(vec![format!("t{i}")]).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn wrong_vector_count_is_model_error() {
        let pool =
            EmbeddingPool::new(Arc::new(BrokenEmbedder), 1, 1, Backpressure::Block);
        let err = pool.embed(vec!["x".to_string()]).await.unwrap_err();
        assert!(err.is_model_error());
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = EmbeddingPool::new(
            Arc::new(FeatureHashEmbedder::new(8)),
            2,
            2,
            Backpressure::Block,
        );
        pool.shutdown().await;
        let err = pool.embed(vec!["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::PoolClosed));
    }

    #[test]
    fn backpressure_parses() {
        assert_eq!("Block".parse::<Backpressure>().unwrap(), Backpressure::Block);
        assert_eq!(
            "reject".parse::<Backpressure>().unwrap(),
            Backpressure::Reject
        );
        assert!("drop".parse::<Backpressure>().is_err());
    }
}
