use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::engine::Engine;
use crate::probe::ProbeKind;

use super::metrics::TableMetrics;

/// Reads closer together than this are rated as if one second apart.
const MIN_RATE_WINDOW: Duration = Duration::from_millis(100);

/// Growth of one key between two reads.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDelta {
    pub key: String,
    pub total: u64,
    pub delta: u64,
    pub rate: f64,
}

/// Result of reading one accumulation table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRead {
    pub probe: ProbeKind,
    pub entries: usize,
    pub capacity: usize,
    pub total: u64,
    pub delta: u64,
    pub rate: f64,
    /// Keys with the largest delta, at most `top_n`.
    pub top: Vec<KeyDelta>,
}

struct ReadState {
    last: Instant,
    previous: HashMap<ProbeKind, HashMap<String, u64>>,
}

/// Periodically snapshots every enabled table, turns cumulative tallies into
/// per-key deltas and rates, and publishes them as metrics and logs.
pub struct Reader {
    engine: Arc<Engine>,
    metrics: Arc<TableMetrics>,
    interval: Duration,
    top_n: usize,
    state: Mutex<ReadState>,
    shutdown: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reader {
    pub fn new(engine: Arc<Engine>, metrics: Arc<TableMetrics>, cfg: &ReaderConfig) -> Self {
        Self {
            engine,
            metrics,
            interval: cfg.interval,
            top_n: cfg.top_n,
            state: Mutex::new(ReadState {
                last: Instant::now(),
                previous: HashMap::new(),
            }),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Starts the periodic read task.
    pub fn start(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        let reader = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reader.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        reader.read_once();
                    }
                }
            }

            debug!("table reader stopped");
        });

        *self.task.lock() = Some(handle);

        info!(
            interval = ?self.interval,
            top_n = self.top_n,
            "table reader started",
        );
    }

    /// Stops the periodic read task and waits for it to exit.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.await.context("joining table reader task")?;
        }

        Ok(())
    }

    /// Read every enabled table once, update metrics and log the busiest
    /// keys.
    pub fn read_once(&self) -> Vec<TableRead> {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last);
        state.last = now;
        let window = if elapsed < MIN_RATE_WINDOW {
            1.0
        } else {
            elapsed.as_secs_f64()
        };

        let mut reads = Vec::new();
        for (probe, table) in self.engine.tables() {
            // Occupancy as read, before a drain empties the table.
            let entries = table.len();
            let (tallies, previous) = if probe.clears_on_read() {
                (table.drain_tallies(), HashMap::new())
            } else {
                (
                    table.tallies(),
                    state.previous.remove(&probe).unwrap_or_default(),
                )
            };

            let read = self.compare(
                probe,
                entries,
                table.capacity(),
                &tallies,
                &previous,
                window,
            );

            if !probe.clears_on_read() {
                state.previous.insert(probe, tallies.into_iter().collect());
            }

            self.publish(&read);
            reads.push(read);
        }
        drop(state);

        for (probe, pending) in self.engine.pending_tables() {
            self.metrics
                .pending_entries
                .with_label_values(&[probe.as_str()])
                .set(pending.len() as f64);
            self.metrics
                .pending_capacity
                .with_label_values(&[probe.as_str()])
                .set(pending.capacity() as f64);
        }

        let stats = self.engine.stats().snapshot();
        self.metrics.observe_stats(&stats);
        self.metrics.reads.inc();

        debug!(
            tables = reads.len(),
            events = stats.received.iter().map(|(_, n)| n).sum::<u64>(),
            malformed = stats.malformed,
            elapsed = ?elapsed,
            "tables read",
        );

        reads
    }

    fn compare(
        &self,
        probe: ProbeKind,
        entries: usize,
        capacity: usize,
        tallies: &[(String, u64)],
        previous: &HashMap<String, u64>,
        window: f64,
    ) -> TableRead {
        let mut total = 0u64;
        let mut delta = 0u64;
        let mut rows: Vec<KeyDelta> = tallies
            .iter()
            .map(|(key, current)| {
                let d = key_delta(previous.get(key).copied(), *current);
                total = total.wrapping_add(*current);
                delta = delta.wrapping_add(d);
                KeyDelta {
                    key: key.clone(),
                    total: *current,
                    delta: d,
                    rate: d as f64 / window,
                }
            })
            .filter(|row| row.delta > 0)
            .collect();

        rows.sort_by(|a, b| b.delta.cmp(&a.delta).then_with(|| a.key.cmp(&b.key)));
        rows.truncate(self.top_n);

        TableRead {
            probe,
            entries,
            capacity,
            total,
            delta,
            rate: delta as f64 / window,
            top: rows,
        }
    }

    fn publish(&self, read: &TableRead) {
        let name = read.probe.as_str();
        self.metrics
            .table_entries
            .with_label_values(&[name])
            .set(read.entries as f64);
        self.metrics
            .table_capacity
            .with_label_values(&[name])
            .set(read.capacity as f64);
        self.metrics
            .probe_total
            .with_label_values(&[name])
            .set(read.total as f64);
        self.metrics
            .probe_rate
            .with_label_values(&[name])
            .set(read.rate);

        debug!(
            probe = name,
            entries = read.entries,
            capacity = read.capacity,
            delta = read.delta,
            rate = read.rate,
            "table read",
        );

        for row in &read.top {
            info!(
                probe = name,
                key = %row.key,
                delta = row.delta,
                rate = %format_args!("{:.1}", row.rate),
                total = row.total,
                "top talker",
            );
        }
    }
}

/// Growth since the previous read. A tally that shrank belongs to a record
/// that was reset in between, so all of it is new.
fn key_delta(previous: Option<u64>, current: u64) -> u64 {
    match previous {
        Some(prev) if current >= prev => current - prev,
        _ => current,
    }
}
