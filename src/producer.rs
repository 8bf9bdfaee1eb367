//! Synthetic `source.posts.v1` traffic for exercising the stream relay locally.

use crate::bus::EventPublisher;
use crate::config::ProducerSettings;
use crate::error::Result;
use chrono::{SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const TEXTS: [&str; 4] = [
    "Small traffic incident reported near the city center.",
    "Roadworks causing slow traffic on the main avenue.",
    "Minor incident resolved, traffic back to normal.",
    "Heavy congestion reported near the roundabout.",
];
const SEVERITIES: [&str; 3] = ["low", "medium", "high"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A source-side post. Deliberately not an ingest envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticPost {
    pub dataset: String,
    pub source_event_id: String,
    pub event_time: String,
    pub text: String,
    pub author: String,
    pub location: GeoPoint,
    pub severity: String,
}

pub fn build_post<R: Rng + ?Sized>(dataset: &str, rng: &mut R) -> SyntheticPost {
    SyntheticPost {
        dataset: dataset.to_string(),
        source_event_id: Uuid::new_v4().to_string(),
        event_time: Utc::now().trunc_subsecs(0).format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        text: TEXTS.choose(rng).copied().unwrap_or(TEXTS[0]).to_string(),
        author: "simulator".to_string(),
        location: GeoPoint { lat: 41.6523, lon: -4.7245 },
        severity: SEVERITIES.choose(rng).copied().unwrap_or(SEVERITIES[0]).to_string(),
    }
}

/// Sends posts keyed by `source_event_id` at the configured rate until
/// `total` is reached (0 means unbounded) or `shutdown` resolves. Returns the
/// number of posts the broker acknowledged.
pub async fn run<P, F>(publisher: &P, settings: &ProducerSettings, shutdown: F) -> Result<u64>
where
    P: EventPublisher + ?Sized,
    F: Future<Output = ()>,
{
    let pause = Duration::from_secs_f64(1.0 / settings.posts_per_sec);
    let mut rng = StdRng::from_entropy();
    let mut sent = 0u64;
    tokio::pin!(shutdown);

    info!(topic = %settings.topic, posts_per_sec = settings.posts_per_sec, total = settings.total, "Producer starting");
    loop {
        let post = build_post(&settings.dataset, &mut rng);
        let body = serde_json::to_vec(&post)?;
        let receipt = publisher.publish(&settings.topic, &post.source_event_id, &body).await?;
        crate::metrics::producer::post_sent();
        debug!(partition = receipt.partition, offset = receipt.offset, "Post delivered");

        sent += 1;
        if settings.total > 0 && sent >= settings.total {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = &mut shutdown => break,
        }
    }
    info!(topic = %settings.topic, sent, "Producer done");
    Ok(sent)
}
