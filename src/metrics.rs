#![forbid(unsafe_code)]

// Per-virtual-user metrics and the aggregated run summary

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::protocol::EventKind;

/// Sent/received frame counts for one event name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub sent: u64,
    pub received: u64,
}

/// Latency statistics for a single event name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub count: usize,
    pub sum_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyStats {
    /// `None` for an empty sample set. Sorts in place.
    pub fn from_samples(samples: &mut [u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let count = samples.len();
        let sum_ms: u64 = samples.iter().sum();
        Some(Self {
            count,
            sum_ms,
            min_ms: samples[0],
            max_ms: samples[count - 1],
            avg_ms: sum_ms / count as u64,
            p50_ms: percentile(samples, 0.50),
            p95_ms: percentile(samples, 0.95),
            p99_ms: percentile(samples, 0.99),
        })
    }
}

/// Final report of one virtual user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetrics {
    pub client_id: String,
    pub connection_successful: bool,
    pub connection_time_ms: u64,
    pub ready: bool,
    pub time_to_ready_ms: Option<u64>,
    pub total_frames_sent: u64,
    pub total_events_received: u64,
    pub events: BTreeMap<String, EventCounts>,
    pub delivery_delays: BTreeMap<String, LatencyStats>,
    pub malformed_frames: u64,
    pub unknown_events: u64,
    pub bookkeeping_failures: u64,
    pub transport_errors: u64,
    pub errors: Vec<String>,
    pub stop_reason: Option<String>,
    pub session_duration_ms: u64,
}

/// Real-time metrics collector (thread-safe)
pub struct MetricsCollector {
    client_id: String,
    start_time: Instant,
    connection_successful: AtomicBool,
    connection_time_ms: AtomicU64,
    ready_at: AtomicU64, // 0 = not ready
    frames_sent: AtomicU64,
    events_received: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_events: AtomicU64,
    bookkeeping_failures: AtomicU64,
    transport_errors: AtomicU64,
    events: Mutex<HashMap<EventKind, EventCounts>>,
    delays: Mutex<HashMap<EventKind, Vec<u64>>>,
    errors: Mutex<Vec<String>>,
    stop_reason: Mutex<Option<String>>,
}

impl MetricsCollector {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            start_time: Instant::now(),
            connection_successful: AtomicBool::new(false),
            connection_time_ms: AtomicU64::new(0),
            ready_at: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            unknown_events: AtomicU64::new(0),
            bookkeeping_failures: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            events: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
            stop_reason: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn mark_connection_successful(&self) {
        self.connection_successful.store(true, Ordering::SeqCst);
        self.connection_time_ms.store(self.elapsed_ms(), Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        // Never store 0, which means unset
        let elapsed = self.elapsed_ms().max(1);
        let _ = self
            .ready_at
            .compare_exchange(0, elapsed, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Counts a control frame (connect, disconnect, pong)
    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_sent(&self, kind: EventKind) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut events) = self.events.lock() {
            events.entry(kind).or_default().sent += 1;
        }
    }

    pub fn record_event_received(&self, kind: EventKind) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut events) = self.events.lock() {
            events.entry(kind).or_default().received += 1;
        }
    }

    /// Delivery delay between the original sender and this client
    pub fn record_delivery_delay(&self, kind: EventKind, ms: u64) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.entry(kind).or_default().push(ms);
        }
    }

    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_event(&self) {
        self.unknown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bookkeeping_failure(&self, error: String) {
        self.bookkeeping_failures.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    pub fn record_transport_error(&self, error: String) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    pub fn record_error(&self, error: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    pub fn set_stop_reason(&self, reason: &str) {
        if let Ok(mut stop_reason) = self.stop_reason.lock() {
            *stop_reason = Some(reason.to_string());
        }
    }

    /// Generate final metrics report (sync, safe to call from any thread)
    pub fn generate_report(&self) -> ClientMetrics {
        let ready_at = self.ready_at.load(Ordering::SeqCst);
        let events = self
            .events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .map(|(kind, counts)| (kind.wire_name().to_string(), *counts))
                    .collect()
            })
            .unwrap_or_default();

        ClientMetrics {
            client_id: self.client_id.clone(),
            connection_successful: self.connection_successful.load(Ordering::SeqCst),
            connection_time_ms: self.connection_time_ms.load(Ordering::SeqCst),
            ready: ready_at > 0,
            time_to_ready_ms: (ready_at > 0).then_some(ready_at),
            total_frames_sent: self.frames_sent.load(Ordering::Relaxed),
            total_events_received: self.events_received.load(Ordering::Relaxed),
            events,
            delivery_delays: self.compute_delay_report(),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            bookkeeping_failures: self.bookkeeping_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            errors: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
            stop_reason: self.stop_reason.lock().map(|r| r.clone()).unwrap_or_default(),
            session_duration_ms: self.elapsed_ms(),
        }
    }

    fn compute_delay_report(&self) -> BTreeMap<String, LatencyStats> {
        let delays = self.delays.lock().map(|d| d.clone()).unwrap_or_default();
        delays
            .into_iter()
            .filter_map(|(kind, mut samples)| {
                LatencyStats::from_samples(&mut samples)
                    .map(|stats| (kind.wire_name().to_string(), stats))
            })
            .collect()
    }
}

/// Per-event totals across all clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub sent: u64,
    pub received: u64,
    pub delay: Option<LatencyStats>,
}

/// Aggregates metrics from multiple clients
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub total_clients: usize,
    pub successful_connections: usize,
    pub failed_connections: usize,
    pub ready_clients: usize,
    pub average_connection_time_ms: u64,
    pub average_time_to_ready_ms: u64,
    pub total_frames_sent: u64,
    pub total_events_received: u64,
    pub send_rate_per_sec: f64,
    pub receive_rate_per_sec: f64,
    pub average_delivery_delay_ms: u64,
    pub events: BTreeMap<String, EventSummary>,
    pub malformed_frames: u64,
    pub unknown_events: u64,
    pub bookkeeping_failures: u64,
    pub transport_errors: u64,
    pub total_errors: usize,
    pub average_session_duration_ms: u64,
    pub stop_reasons: BTreeMap<String, usize>,
}

impl TestSummary {
    pub fn from_metrics(metrics: &[ClientMetrics]) -> Self {
        if metrics.is_empty() {
            return Self::default();
        }

        let total_clients = metrics.len();
        let successful_connections = metrics.iter().filter(|m| m.connection_successful).count();
        let ready_clients = metrics.iter().filter(|m| m.ready).count();

        let connection_times: Vec<u64> = metrics
            .iter()
            .filter(|m| m.connection_successful)
            .map(|m| m.connection_time_ms)
            .collect();
        let ready_times: Vec<u64> = metrics.iter().filter_map(|m| m.time_to_ready_ms).collect();

        let total_frames_sent: u64 = metrics.iter().map(|m| m.total_frames_sent).sum();
        let total_events_received: u64 = metrics.iter().map(|m| m.total_events_received).sum();
        let total_duration_ms: u64 = metrics.iter().map(|m| m.session_duration_ms).sum();
        // Rates are per virtual-user second
        let duration_secs = total_duration_ms as f64 / 1000.0;
        let rate = |count: u64| {
            if duration_secs > 0.0 {
                count as f64 / duration_secs
            } else {
                0.0
            }
        };

        let events = Self::aggregate_events(metrics);
        let (delay_sum, delay_count) = events
            .values()
            .filter_map(|e| e.delay.as_ref())
            .fold((0u64, 0u64), |(sum, n), d| (sum + d.sum_ms, n + d.count as u64));

        let mut stop_reasons = BTreeMap::new();
        for m in metrics {
            let reason = m.stop_reason.clone().unwrap_or_else(|| "unknown".to_string());
            *stop_reasons.entry(reason).or_insert(0) += 1;
        }

        Self {
            total_clients,
            successful_connections,
            failed_connections: total_clients - successful_connections,
            ready_clients,
            average_connection_time_ms: average(&connection_times),
            average_time_to_ready_ms: average(&ready_times),
            total_frames_sent,
            total_events_received,
            send_rate_per_sec: rate(total_frames_sent),
            receive_rate_per_sec: rate(total_events_received),
            average_delivery_delay_ms: if delay_count > 0 { delay_sum / delay_count } else { 0 },
            events,
            malformed_frames: metrics.iter().map(|m| m.malformed_frames).sum(),
            unknown_events: metrics.iter().map(|m| m.unknown_events).sum(),
            bookkeeping_failures: metrics.iter().map(|m| m.bookkeeping_failures).sum(),
            transport_errors: metrics.iter().map(|m| m.transport_errors).sum(),
            total_errors: metrics.iter().map(|m| m.errors.len()).sum(),
            average_session_duration_ms: total_duration_ms / total_clients as u64,
            stop_reasons,
        }
    }

    fn aggregate_events(metrics: &[ClientMetrics]) -> BTreeMap<String, EventSummary> {
        let mut events: BTreeMap<String, EventSummary> = BTreeMap::new();
        let mut delays: HashMap<String, Vec<&LatencyStats>> = HashMap::new();
        for m in metrics {
            for (name, counts) in &m.events {
                let entry = events.entry(name.clone()).or_default();
                entry.sent += counts.sent;
                entry.received += counts.received;
            }
            for (name, stats) in &m.delivery_delays {
                delays.entry(name.clone()).or_default().push(stats);
            }
        }

        for (name, per_client) in delays {
            events.entry(name).or_default().delay = merge_latency(&per_client);
        }
        events
    }

    pub fn print_summary(&self) {
        println!("\n=== Load Test Summary ===");
        println!("Total Clients: {}", self.total_clients);
        println!("Successful Connections: {}", self.successful_connections);
        println!("Failed Connections: {}", self.failed_connections);
        println!("Ready Clients: {}", self.ready_clients);
        println!("\nTiming:");
        println!("  Average Connection Time: {} ms", self.average_connection_time_ms);
        println!("  Average Time To Ready: {} ms", self.average_time_to_ready_ms);
        println!("  Average Delivery Delay: {} ms", self.average_delivery_delay_ms);
        println!("\nTraffic:");
        println!("  Frames Sent: {} ({:.2}/s)", self.total_frames_sent, self.send_rate_per_sec);
        println!("  Events Received: {} ({:.2}/s)", self.total_events_received, self.receive_rate_per_sec);

        if !self.events.is_empty() {
            println!("\nPer Event:");
            for (name, event) in &self.events {
                match &event.delay {
                    Some(d) => println!(
                        "  {}: sent={} recv={} delay avg={}ms p50={}ms p95={}ms p99={}ms (n={})",
                        name, event.sent, event.received, d.avg_ms, d.p50_ms, d.p95_ms, d.p99_ms, d.count
                    ),
                    None => println!("  {}: sent={} recv={}", name, event.sent, event.received),
                }
            }
        }

        println!("\nErrors:");
        println!("  Malformed Frames: {}", self.malformed_frames);
        println!("  Unknown Events: {}", self.unknown_events);
        println!("  Bookkeeping Failures: {}", self.bookkeeping_failures);
        println!("  Transport Errors: {}", self.transport_errors);
        println!("  Total Errors: {}", self.total_errors);

        println!("\nSession:");
        println!(
            "  Average Duration: {} ms ({:.2} s)",
            self.average_session_duration_ms,
            self.average_session_duration_ms as f64 / 1000.0
        );
        for (reason, count) in &self.stop_reasons {
            println!("  Stopped ({}): {}", reason, count);
        }
        println!("========================\n");
    }
}

/// Combines per-client stats. Count, sum, min, max and average come from the
/// raw sample sums; the percentiles are count-weighted means of the
/// per-client percentiles.
fn merge_latency(per_client: &[&LatencyStats]) -> Option<LatencyStats> {
    let count: usize = per_client.iter().map(|s| s.count).sum();
    if count == 0 {
        return None;
    }
    let weighted = |field: fn(&LatencyStats) -> u64| {
        per_client
            .iter()
            .map(|s| field(s) * s.count as u64)
            .sum::<u64>()
            / count as u64
    };
    let sum_ms: u64 = per_client.iter().map(|s| s.sum_ms).sum();
    Some(LatencyStats {
        count,
        sum_ms,
        min_ms: per_client.iter().map(|s| s.min_ms).min().unwrap_or_default(),
        max_ms: per_client.iter().map(|s| s.max_ms).max().unwrap_or_default(),
        avg_ms: sum_ms / count as u64,
        p50_ms: weighted(|s| s.p50_ms),
        p95_ms: weighted(|s| s.p95_ms),
        p99_ms: weighted(|s| s.p99_ms),
    })
}

fn average(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

fn percentile(sorted_data: &[u64], p: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let idx = (p * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[idx.min(sorted_data.len() - 1)]
}
