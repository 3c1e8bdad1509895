use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod config;
pub mod index;
pub mod rate_limiter;
pub mod stats;

use crate::rules::engine::{RulesEngine, RunRulesResult};
use crate::rules::eval::ROOT_NODE_ID;
use crate::rules::failure::{is_rule_allowed, RuleGate};
use crate::store::rules::Rule;
use crate::store::{mutex_guard, Stores};
use crate::time::Clock;
use config::DispatcherConfig;
use index::EntityRuleIndex;
use rate_limiter::TokenBucket;
use stats::DispatcherStats;

const BATCH_LOCK_TTL: StdDuration = StdDuration::from_secs(30);
const RATE_LIMIT_RETRY_DELAY: StdDuration = StdDuration::from_millis(50);
const WORKER_IDLE_POLL: StdDuration = StdDuration::from_millis(25);

/// Transient unit of dispatch: a coalesced set of entity ids plus the
/// earliest `changed_at` observed among the contributing submits.
#[derive(Debug, Clone)]
pub struct EntityChangeBatch {
    pub source: String,
    pub entity_ids: HashSet<String>,
    pub changed_at: Option<DateTime<Utc>>,
    pub batch_id: String,
}

struct PendingBatch {
    entity_ids: HashSet<String>,
    changed_at: Option<DateTime<Utc>>,
    first_pending_at: Instant,
}

/// Cache-style add-if-absent lock with TTL, providing mutual exclusion for
/// workers processing the same logical batch.
struct BatchLockCache {
    ttl: StdDuration,
    inner: Mutex<HashMap<String, Instant>>,
}

impl BatchLockCache {
    fn new(ttl: StdDuration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn add(&self, key: &str) -> bool {
        let mut inner = mutex_guard(&self.inner);
        let now = Instant::now();
        inner.retain(|_, acquired_at| now.duration_since(*acquired_at) < self.ttl);
        if inner.contains_key(key) {
            return false;
        }
        inner.insert(key.to_string(), now);
        true
    }

    fn remove(&self, key: &str) {
        mutex_guard(&self.inner).remove(key);
    }
}

/// Debounces entity-change submits into per-source batches, bounds them in a
/// drop-oldest FIFO queue, and drains them through a token-gated worker
/// pool into the rules engine. One dispatcher exists per process.
pub struct RuleDispatcher {
    config: DispatcherConfig,
    clock: Clock,
    stores: Stores,
    engine: Arc<RulesEngine>,
    index: EntityRuleIndex,
    pending: Mutex<HashMap<String, PendingBatch>>,
    queue: Mutex<VecDeque<EntityChangeBatch>>,
    queue_notify: Notify,
    global_bucket: TokenBucket,
    source_buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
    batch_locks: BatchLockCache,
    stats: Mutex<DispatcherStats>,
    started: AtomicBool,
}

impl RuleDispatcher {
    pub fn new(
        config: DispatcherConfig,
        clock: Clock,
        stores: Stores,
        engine: Arc<RulesEngine>,
    ) -> Self {
        let global_bucket = make_bucket(config.rate_limit_per_sec, config.rate_limit_burst);
        Self {
            config,
            clock,
            stores,
            engine,
            index: EntityRuleIndex::new(),
            pending: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            global_bucket,
            source_buckets: Mutex::new(HashMap::new()),
            batch_locks: BatchLockCache::new(BATCH_LOCK_TTL),
            stats: Mutex::new(DispatcherStats::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Non-blocking ingestion entry point. Folds the entity ids into the
    /// source's pending batch; the earliest `changed_at` wins so `for:`
    /// timing stays faithful to event time.
    pub fn submit(&self, source: &str, entity_ids: Vec<String>, changed_at: Option<DateTime<Utc>>) {
        let source = source.trim();
        if source.is_empty() {
            return;
        }

        let (added, duplicates, folded) = {
            let mut pending = mutex_guard(&self.pending);
            let entry = pending
                .entry(source.to_string())
                .or_insert_with(|| PendingBatch {
                    entity_ids: HashSet::new(),
                    changed_at: None,
                    first_pending_at: Instant::now(),
                });
            let folded = !entry.entity_ids.is_empty();

            let mut added = 0u64;
            let mut duplicates = 0u64;
            for entity_id in entity_ids {
                let entity_id = entity_id.trim().to_string();
                if entity_id.is_empty() {
                    continue;
                }
                if entry.entity_ids.insert(entity_id) {
                    added += 1;
                } else {
                    duplicates += 1;
                }
            }
            entry.changed_at = match (entry.changed_at, changed_at) {
                (Some(existing), Some(incoming)) => Some(existing.min(incoming)),
                (None, incoming) => incoming,
                (existing, None) => existing,
            };
            (added, duplicates, folded)
        };

        if added == 0 && duplicates == 0 {
            return;
        }
        let mut stats = mutex_guard(&self.stats);
        if duplicates > 0 {
            stats.record_dedupe(duplicates);
        }
        if folded && added > 0 {
            stats.record_debounce(source, added);
        }
    }

    /// Emits due pending batches, splitting above `batch_size_limit`; each
    /// split preserves the coalesced `changed_at`.
    fn take_due_batches(&self, force: bool) -> Vec<EntityChangeBatch> {
        let debounce = StdDuration::from_millis(self.config.debounce_ms);
        let mut pending = mutex_guard(&self.pending);
        let now = Instant::now();
        let due_sources: Vec<String> = pending
            .iter()
            .filter(|(_, batch)| force || now.duration_since(batch.first_pending_at) >= debounce)
            .map(|(source, _)| source.clone())
            .collect();

        let mut batches = Vec::new();
        for source in due_sources {
            let Some(batch) = pending.remove(&source) else {
                continue;
            };
            let mut entity_ids: Vec<String> = batch.entity_ids.into_iter().collect();
            entity_ids.sort();
            for chunk in entity_ids.chunks(self.config.batch_size_limit.max(1)) {
                batches.push(EntityChangeBatch {
                    source: source.clone(),
                    entity_ids: chunk.iter().cloned().collect(),
                    changed_at: batch.changed_at,
                    batch_id: Uuid::new_v4().to_string(),
                });
            }
        }
        batches
    }

    /// Bounded FIFO enqueue. When full, the oldest batch is dropped so the
    /// newest observations stay live under overload.
    fn enqueue_batches(&self, batches: Vec<EntityChangeBatch>) {
        if batches.is_empty() {
            return;
        }
        let capacity = self.config.queue_max_depth.max(1);
        let mut dropped = 0u64;
        {
            let mut queue = mutex_guard(&self.queue);
            for batch in batches {
                while queue.len() >= capacity {
                    queue.pop_front();
                    dropped += 1;
                }
                queue.push_back(batch);
            }
        }
        if dropped > 0 {
            let mut stats = mutex_guard(&self.stats);
            for _ in 0..dropped {
                stats.record_dropped_batch();
            }
        }
        self.queue_notify.notify_waiters();
    }

    /// Forces every pending batch out to the queue, debounce regardless.
    pub fn flush_pending(&self) -> usize {
        let batches = self.take_due_batches(true);
        let count = batches.len();
        self.enqueue_batches(batches);
        count
    }

    fn pop_batch(&self) -> Option<EntityChangeBatch> {
        mutex_guard(&self.queue).pop_front()
    }

    fn acquire_tokens(&self, source: &str) -> bool {
        if !self.global_bucket.acquire(1.0) {
            return false;
        }
        let bucket = {
            let mut buckets = mutex_guard(&self.source_buckets);
            buckets
                .entry(source.to_string())
                .or_insert_with(|| {
                    Arc::new(make_bucket(
                        self.config.rate_limit_per_sec,
                        self.config.rate_limit_burst,
                    ))
                })
                .clone()
        };
        bucket.acquire(1.0)
    }

    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let dispatcher = self.clone();
        let flush_cancel = cancel.clone();
        tokio::spawn(async move {
            let tick = StdDuration::from_millis((dispatcher.config.debounce_ms / 4).max(10));
            loop {
                tokio::select! {
                    _ = flush_cancel.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {
                        let batches = dispatcher.take_due_batches(false);
                        dispatcher.enqueue_batches(batches);
                    }
                }
            }
        });

        for worker_id in 0..self.config.worker_concurrency {
            let dispatcher = self.clone();
            let worker_cancel = cancel.clone();
            tokio::spawn(async move {
                dispatcher.worker_loop(worker_id, worker_cancel).await;
            });
        }
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(batch) = self.pop_batch() else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.queue_notify.notified() => {}
                    _ = tokio::time::sleep(WORKER_IDLE_POLL) => {}
                }
                continue;
            };

            if !self.acquire_tokens(&batch.source) {
                mutex_guard(&self.stats).record_rate_limit(1);
                tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                self.enqueue_batches(vec![batch]);
                continue;
            }

            // A failing batch must not take the worker down with it.
            let batch_id = batch.batch_id.clone();
            if let Err(err) = self.dispatch_batch(batch).await {
                tracing::warn!(worker_id, batch_id = %batch_id, error = %err, "batch dispatch failed");
            }
        }
    }

    /// Processes one batch: idempotency lock, impacted-rule resolution,
    /// targeted entity read, engine run at the batch's event time.
    pub async fn dispatch_batch(&self, batch: EntityChangeBatch) -> anyhow::Result<()> {
        if !self.batch_locks.add(&batch.batch_id) {
            return Ok(());
        }
        let outcome = self.dispatch_locked(&batch).await;
        // Held until results are recorded.
        self.batch_locks.remove(&batch.batch_id);
        outcome
    }

    async fn dispatch_locked(&self, batch: &EntityChangeBatch) -> anyhow::Result<()> {
        let now = batch.changed_at.unwrap_or_else(|| self.clock.now());

        let impacted_ids = self
            .index
            .lookup(&batch.entity_ids, &self.stores.rules, self.clock.now());
        let impacted: Vec<Rule> = self
            .stores
            .rules
            .enabled_rules()
            .into_iter()
            .filter(|rule| impacted_ids.contains(&rule.id))
            .collect();

        let mut result = RunRulesResult::default();
        let mut allowed: Vec<Rule> = Vec::with_capacity(impacted.len());
        for rule in impacted {
            let runtime = self.stores.runtime.get_or_create(rule.id, ROOT_NODE_ID);
            match is_rule_allowed(&runtime, now) {
                gate if gate.is_allowed() => allowed.push(rule),
                RuleGate::Suspended => result.skipped_suspended += 1,
                RuleGate::Backoff => result.skipped_cooldown += 1,
                _ => {}
            }
        }

        if !allowed.is_empty() {
            let mut wanted: BTreeSet<String> = BTreeSet::new();
            for rule in &allowed {
                wanted.extend(self.engine.referenced_entity_ids(rule));
            }
            let entity_states = self.stores.entities.read_states(&wanted);
            let run = self.engine.run_rules(&allowed, &entity_states, now).await;
            result.merge(run);
        }

        let mut stats = mutex_guard(&self.stats);
        stats.record_trigger(&batch.source, batch.entity_ids.len() as u64, self.clock.now());
        stats.record_rules_result(result.evaluated, result.fired, result.scheduled, result.errors);
        Ok(())
    }

    pub fn invalidate_entity_rule_index(&self) {
        self.index.invalidate();
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    pub fn queue_depth(&self) -> usize {
        mutex_guard(&self.queue).len()
    }

    pub fn stats_snapshot(&self) -> DispatcherStats {
        mutex_guard(&self.stats).clone()
    }

    pub fn reset_stats(&self) {
        mutex_guard(&self.stats).reset();
    }

    pub fn status(&self) -> JsonValue {
        let (pending_entities, pending_batches) = {
            let pending = mutex_guard(&self.pending);
            (
                pending.values().map(|batch| batch.entity_ids.len()).sum::<usize>(),
                pending.len(),
            )
        };
        json!({
            "enabled": self.config.worker_concurrency > 0,
            "pending_entities": pending_entities,
            "pending_batches": pending_batches,
            "queue_depth": self.queue_depth(),
            "workers": self.config.worker_concurrency,
            "stats": self.stats_snapshot().as_json(),
        })
    }

    /// Suspended runtime rows joined with rule metadata.
    pub fn suspended_rules(&self) -> Vec<JsonValue> {
        self.stores
            .runtime
            .list_suspended()
            .into_iter()
            .map(|state| {
                let rule_name = self
                    .stores
                    .rules
                    .get(state.rule_id)
                    .map(|rule| rule.name)
                    .unwrap_or_default();
                json!({
                    "rule_id": state.rule_id,
                    "rule_name": rule_name,
                    "node_id": state.node_id,
                    "consecutive_failures": state.consecutive_failures,
                    "last_error": state.last_error,
                    "last_failure_at": state.last_failure_at.map(|v| v.to_rfc3339()),
                    "next_allowed_at": state.next_allowed_at.map(|v| v.to_rfc3339()),
                })
            })
            .collect()
    }

    pub fn clear_suspended_rule(&self, rule_id: i64) -> usize {
        self.stores.runtime.clear_suspension(rule_id)
    }
}

fn make_bucket(rate_per_sec: u64, burst: u64) -> TokenBucket {
    match TokenBucket::new(rate_per_sec.max(1) as f64, burst.max(1) as f64) {
        Ok(bucket) => bucket,
        Err(_) => unreachable!("rate and burst are clamped positive"),
    }
}
