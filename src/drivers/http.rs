//! Periodic HTTP polling: one GET per cycle becomes one raw object and one
//! `ingest.http` event.

use super::put_raw;
use crate::addressing::partitioned_raw_keys;
use crate::bus::{self, EventPublisher};
use crate::config::{HttpSettings, RunMode};
use crate::constants::HTTP_SOURCE;
use crate::envelope::{build_http_event, EventStamp, HttpFacts, IngestEvent};
use crate::error::Result;
use crate::http_client::HttpClientPort;
use crate::schema::SchemaRegistry;
use crate::store::RawStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

const HTTP_METHOD: &str = "GET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Idle,
    Fetching,
    Validated,
    RawStored,
    Published,
    Errored,
}

impl fmt::Display for HttpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpState::Idle => "idle",
            HttpState::Fetching => "fetching",
            HttpState::Validated => "validated",
            HttpState::RawStored => "raw_stored",
            HttpState::Published => "published",
            HttpState::Errored => "errored",
        };
        f.write_str(s)
    }
}

pub struct HttpPollDriver {
    settings: HttpSettings,
    registry: Arc<SchemaRegistry>,
    http: Arc<dyn HttpClientPort>,
    store: Arc<dyn RawStore>,
    publisher: Arc<dyn EventPublisher>,
    state: HttpState,
    bucket_ready: bool,
    last_success: Option<DateTime<Utc>>,
}

impl HttpPollDriver {
    pub fn new(
        settings: HttpSettings,
        registry: Arc<SchemaRegistry>,
        http: Arc<dyn HttpClientPort>,
        store: Arc<dyn RawStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            settings,
            registry,
            http,
            store,
            publisher,
            state: HttpState::Idle,
            bucket_ready: false,
            last_success: None,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// One fetch, store and publish cycle. Leaves the driver `Idle` on
    /// success and `Errored` on failure.
    pub async fn run_once(&mut self) -> Result<IngestEvent> {
        match self.cycle().await {
            Ok(event) => {
                self.state = HttpState::Idle;
                Ok(event)
            }
            Err(e) => {
                warn!(failed_in = %self.state, error = %e, "HTTP cycle failed");
                self.state = HttpState::Errored;
                Err(e)
            }
        }
    }

    /// Runs according to the configured mode. In `loop` mode a failed cycle
    /// is logged and the next one runs after the interval; fatal failures
    /// and `shutdown` end the loop.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            run_mode = ?self.settings.run_mode,
            dataset = %self.settings.dataset,
            http_url = %self.settings.url,
            "HTTP poller starting"
        );
        if self.settings.run_mode == RunMode::Once {
            return self.run_once().await.map(|_| ());
        }

        tokio::pin!(shutdown);
        loop {
            if let Err(e) = self.run_once().await {
                if e.is_fatal() {
                    error!(error = %e, "Fatal error, stopping HTTP poller");
                    return Err(e);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, HTTP poller stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn cycle(&mut self) -> Result<IngestEvent> {
        self.state = HttpState::Fetching;
        let stamp = EventStamp::now();
        let response = match self.http.get(&self.settings.url).await {
            Ok(response) => {
                crate::metrics::http::fetch_success(response.duration_ms);
                response
            }
            Err(e) => {
                crate::metrics::http::fetch_error();
                return Err(e);
            }
        };

        let bucket = self.settings.bucket.clone();
        let key = partitioned_raw_keys(&self.settings.dataset, HTTP_SOURCE, &stamp.event_id, stamp.ingest_time).payload;
        let event = build_http_event(
            &stamp,
            HttpFacts {
                source: HTTP_SOURCE.to_string(),
                dataset: self.settings.dataset.clone(),
                endpoint: self.settings.url.clone(),
                http_method: HTTP_METHOD.to_string(),
                http_status: response.status,
                raw_uri: self.store.uri(&bucket, &key),
                duration_ms: response.duration_ms,
                rate_limit_remaining: response.rate_limit_remaining,
                cursor: self.settings.cursor.clone(),
                window_start: self.last_success,
                window_end: Some(stamp.ingest_time),
                event_time: None,
                tags: self.settings.tags.clone(),
            },
        );

        self.registry.validate(&event)?;
        self.state = HttpState::Validated;

        if !self.bucket_ready {
            self.store.ensure_bucket(&bucket).await?;
            self.bucket_ready = true;
        }
        let raw_uri = put_raw(self.store.as_ref(), &bucket, &key, &response.bytes, &response.content_type).await?;
        self.state = HttpState::RawStored;

        bus::publish_event(self.publisher.as_ref(), &self.settings.topic, &event).await?;
        self.state = HttpState::Published;
        self.last_success = Some(stamp.ingest_time);

        info!(
            dataset = %self.settings.dataset,
            http_status = response.status,
            duration_ms = response.duration_ms,
            raw_uri = %raw_uri,
            topic = %self.settings.topic,
            "ingest.http done"
        );
        Ok(event)
    }
}
