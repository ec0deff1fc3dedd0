//! The rate-limited fetch pipeline.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use airtime_core::config::{FetchConfig, UpstreamConfig};
use airtime_core::EntityId;

use crate::cache::TtlCache;
use crate::error::FetchError;
use crate::wire::{ErrorBody, UpstreamEntity};

const QUEUE_DEPTH: usize = 256;

/// Where entity payloads come from. Production uses [`HttpEntitySource`];
/// tests drive the queue with fakes.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn fetch(&self, id: EntityId) -> Result<UpstreamEntity, FetchError>;
}

/// `GET {base}/entity/{id}` against the upstream info API.
pub struct HttpEntitySource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEntitySource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl EntitySource for HttpEntitySource {
    async fn fetch(&self, id: EntityId) -> Result<UpstreamEntity, FetchError> {
        let url = format!("{}/entity/{}", self.base_url.trim_end_matches('/'), id);
        let response = self.http.get(&url).send().await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => parsed.message,
                Err(_) => body,
            };
            return Err(FetchError::Api { status, message });
        }

        Ok(response.json::<UpstreamEntity>().await?)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Minimum spacing between successive dispatch starts.
    pub min_interval: Duration,
    pub cache_ttl: Duration,
}

impl From<&FetchConfig> for FetchOptions {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            cache_ttl: Duration::from_secs(cfg.cache_ttl_secs),
        }
    }
}

struct FetchJob {
    id: EntityId,
    reply: oneshot::Sender<Result<UpstreamEntity, FetchError>>,
}

/// Single entry point for upstream lookups.
///
/// A cache hit returns without touching the queue. A miss is enqueued and
/// served by the one worker task, which enforces the dispatch spacing; the
/// worker exits when the last client handle is dropped.
pub struct FetchClient {
    jobs: mpsc::Sender<FetchJob>,
    cache: Arc<Mutex<TtlCache>>,
}

impl FetchClient {
    pub fn new(source: Arc<dyn EntitySource>, options: FetchOptions) -> Self {
        let cache = Arc::new(Mutex::new(TtlCache::new(options.cache_ttl)));
        let (jobs, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_worker(rx, source, cache.clone(), options.min_interval));
        Self { jobs, cache }
    }

    /// Wire up an HTTP-backed client from config.
    pub fn over_http(upstream: &UpstreamConfig, options: FetchOptions) -> Result<Self, FetchError> {
        let source = HttpEntitySource::new(
            upstream.base_url.clone(),
            Duration::from_secs(upstream.request_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(source), options))
    }

    pub async fn fetch_one(&self, id: EntityId) -> Result<UpstreamEntity, FetchError> {
        if let Some(hit) = lock_cache(&self.cache).get(id) {
            return Ok(hit);
        }

        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(FetchJob { id, reply })
            .await
            .map_err(|_| FetchError::QueueClosed)?;
        rx.await.unwrap_or(Err(FetchError::QueueClosed))
    }

    /// Fetch a batch; outcomes come back in input order, and one id's failure
    /// does not discard its siblings.
    pub async fn fetch_many(
        &self,
        ids: &[EntityId],
    ) -> Vec<(EntityId, Result<UpstreamEntity, FetchError>)> {
        enum Pending {
            Done(Result<UpstreamEntity, FetchError>),
            Waiting(oneshot::Receiver<Result<UpstreamEntity, FetchError>>),
        }

        let mut pending = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(hit) = lock_cache(&self.cache).get(id) {
                pending.push((id, Pending::Done(Ok(hit))));
                continue;
            }
            let (reply, rx) = oneshot::channel();
            match self.jobs.send(FetchJob { id, reply }).await {
                Ok(()) => pending.push((id, Pending::Waiting(rx))),
                Err(_) => pending.push((id, Pending::Done(Err(FetchError::QueueClosed)))),
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for (id, state) in pending {
            let outcome = match state {
                Pending::Done(result) => result,
                Pending::Waiting(rx) => rx.await.unwrap_or(Err(FetchError::QueueClosed)),
            };
            results.push((id, outcome));
        }
        results
    }
}

fn lock_cache(cache: &Mutex<TtlCache>) -> MutexGuard<'_, TtlCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_worker(
    mut jobs: mpsc::Receiver<FetchJob>,
    source: Arc<dyn EntitySource>,
    cache: Arc<Mutex<TtlCache>>,
    min_interval: Duration,
) {
    let mut last_dispatch: Option<Instant> = None;

    while let Some(job) = jobs.recv().await {
        // The payload may have landed while this request sat in the queue.
        if let Some(hit) = lock_cache(&cache).get(job.id) {
            let _ = job.reply.send(Ok(hit));
            continue;
        }

        if let Some(last) = last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        last_dispatch = Some(Instant::now());

        let result = source.fetch(job.id).await;
        match &result {
            Ok(payload) => {
                debug!(entity_id = job.id, title = %payload.title, "upstream fetch ok");
                lock_cache(&cache).put(job.id, payload.clone());
            }
            Err(err) => warn!(entity_id = job.id, error = %err, "upstream fetch failed"),
        }
        let _ = job.reply.send(result);
    }
}
