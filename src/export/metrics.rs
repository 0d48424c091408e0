use anyhow::{Context, Result};
use prometheus::{Counter, CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::probe::stats::StatsSnapshot;

/// Prometheus metrics describing table occupancy and event flow.
pub struct TableMetrics {
    registry: Registry,

    /// Entries per accumulation table.
    pub table_entries: GaugeVec,
    /// Capacity per accumulation table.
    pub table_capacity: GaugeVec,
    /// Begin timestamps awaiting their end event, per pairing table.
    pub pending_entries: GaugeVec,
    /// Capacity per pairing table.
    pub pending_capacity: GaugeVec,
    /// Sum of per-key tallies per probe at the last read.
    pub probe_total: GaugeVec,
    /// Tally growth per second between the last two reads.
    pub probe_rate: GaugeVec,
    /// Events received by event class.
    pub events_received: CounterVec,
    /// Handler outcomes.
    pub event_outcomes: CounterVec,
    /// Records that failed to decode.
    pub events_malformed: Counter,
    /// Completed table reads.
    pub reads: Counter,
}

impl TableMetrics {
    /// Creates the metrics under `namespace` and registers them.
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let table_entries = GaugeVec::new(
            Opts::new("table_entries", "Entries per accumulation table.").namespace(namespace),
            &["table"],
        )?;
        let table_capacity = GaugeVec::new(
            Opts::new("table_capacity", "Capacity per accumulation table.").namespace(namespace),
            &["table"],
        )?;
        let pending_entries = GaugeVec::new(
            Opts::new(
                "pending_entries",
                "Begin timestamps awaiting their end event, per pairing table.",
            )
            .namespace(namespace),
            &["table"],
        )?;
        let pending_capacity = GaugeVec::new(
            Opts::new("pending_capacity", "Capacity per pairing table.").namespace(namespace),
            &["table"],
        )?;
        let probe_total = GaugeVec::new(
            Opts::new(
                "probe_total",
                "Sum of per-key tallies per probe at the last read.",
            )
            .namespace(namespace),
            &["probe"],
        )?;
        let probe_rate = GaugeVec::new(
            Opts::new(
                "probe_rate",
                "Tally growth per second between the last two reads.",
            )
            .namespace(namespace),
            &["probe"],
        )?;
        let events_received = CounterVec::new(
            Opts::new("events_received_total", "Events received by event class.")
                .namespace(namespace),
            &["event"],
        )?;
        let event_outcomes = CounterVec::new(
            Opts::new("event_outcomes_total", "Handler outcomes by outcome.").namespace(namespace),
            &["outcome"],
        )?;
        let events_malformed = Counter::with_opts(
            Opts::new(
                "events_malformed_total",
                "Event records that failed to decode.",
            )
            .namespace(namespace),
        )?;
        let reads = Counter::with_opts(
            Opts::new("reads_total", "Completed periodic table reads.").namespace(namespace),
        )?;

        registry.register(Box::new(table_entries.clone()))?;
        registry.register(Box::new(table_capacity.clone()))?;
        registry.register(Box::new(pending_entries.clone()))?;
        registry.register(Box::new(pending_capacity.clone()))?;
        registry.register(Box::new(probe_total.clone()))?;
        registry.register(Box::new(probe_rate.clone()))?;
        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(event_outcomes.clone()))?;
        registry.register(Box::new(events_malformed.clone()))?;
        registry.register(Box::new(reads.clone()))?;

        Ok(Self {
            registry,
            table_entries,
            table_capacity,
            pending_entries,
            pending_capacity,
            probe_total,
            probe_rate,
            events_received,
            event_outcomes,
            events_malformed,
            reads,
        })
    }

    /// Add the counters accumulated since the previous stats snapshot.
    pub fn observe_stats(&self, snap: &StatsSnapshot) {
        for (kind, n) in &snap.received {
            self.events_received
                .with_label_values(&[kind.as_str()])
                .inc_by(*n as f64);
        }
        for (outcome, n) in &snap.outcomes {
            self.event_outcomes
                .with_label_values(&[outcome.as_str()])
                .inc_by(*n as f64);
        }
        if snap.malformed > 0 {
            self.events_malformed.inc_by(snap.malformed as f64);
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }
}
