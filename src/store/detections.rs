use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::RwLock;

use super::{read_guard, write_guard};

/// Normalized camera detection kept for deterministic rule evaluation; no
/// network calls happen while rules run.
#[derive(Debug, Clone)]
pub struct Detection {
    pub provider: String,
    pub event_id: String,
    pub label: String,
    pub camera: String,
    pub zones: Vec<String>,
    pub confidence_pct: f64,
    pub observed_at: DateTime<Utc>,
    pub source_topic: String,
    pub raw: JsonValue,
}

pub struct DetectionStore {
    inner: RwLock<Vec<Detection>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Upserts a detection. `(provider, event_id)` is unique when `event_id`
    /// is non-empty; duplicate arrivals keep the highest confidence seen for
    /// the event and refresh the rest of the record.
    pub fn upsert(&self, detection: Detection) {
        let mut inner = write_guard(&self.inner);
        if !detection.event_id.is_empty() {
            if let Some(existing) = inner.iter_mut().find(|row| {
                row.provider == detection.provider && row.event_id == detection.event_id
            }) {
                let confidence_pct = existing.confidence_pct.max(detection.confidence_pct);
                *existing = Detection {
                    confidence_pct,
                    ..detection
                };
                return;
            }
        }
        inner.push(detection);
    }

    /// Recent detections matching the optional camera/zone filters, observed
    /// at or after `since`. A zone filter requires overlap with the
    /// detection's zone list.
    pub fn recent(
        &self,
        label: &str,
        cameras: Option<&[String]>,
        zones: Option<&[String]>,
        since: DateTime<Utc>,
    ) -> Vec<Detection> {
        read_guard(&self.inner)
            .iter()
            .filter(|row| row.label == label)
            .filter(|row| row.observed_at >= since)
            .filter(|row| match cameras {
                Some(cameras) if !cameras.is_empty() => cameras.iter().any(|c| c == &row.camera),
                _ => true,
            })
            .filter(|row| match zones {
                Some(zones) if !zones.is_empty() => {
                    zones.iter().any(|zone| row.zones.iter().any(|z| z == zone))
                }
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn prune_observed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = write_guard(&self.inner);
        let before = inner.len();
        inner.retain(|row| row.observed_at >= cutoff);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        read_guard(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new()
    }
}
