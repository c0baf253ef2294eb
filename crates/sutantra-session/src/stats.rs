//! Stats aggregation for the active stream.
//!
//! Two sources feed one displayable [`StatsSummary`]:
//! - counters sampled from the media transport on a fixed tick while
//!   publishing; throughput is the byte delta over the sample interval
//! - `stream-stats` pushes from the node, whose fields replace ours outright

use std::time::{Duration, Instant};

use serde::Serialize;
use sutantra_common::models::RemoteStats;

/// One reading of the media transport's outbound counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSample {
    pub bytes_sent: u64,
    pub round_trip_time: Option<Duration>,
    pub at: Instant,
}

impl TransportSample {
    pub fn new(bytes_sent: u64, round_trip_time: Option<Duration>) -> Self {
        Self {
            bytes_sent,
            round_trip_time,
            at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub packet_loss_percent: f64,
    pub jitter_ms: f64,
    pub viewer_count: u32,
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    last: Option<TransportSample>,
    summary: StatsSummary,
    smoothing: Option<f64>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl StatsAggregator {
    pub fn new(smoothing: Option<f64>) -> Self {
        Self {
            smoothing,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> &StatsSummary {
        &self.summary
    }

    /// Fold in a local sample. The first sample only sets the baseline.
    pub fn record_sample(&mut self, sample: TransportSample) {
        if let Some(rtt) = sample.round_trip_time {
            self.summary.latency_ms = (rtt.as_secs_f64() * 1000.0).round();
        }

        if let Some(prev) = self.last {
            let elapsed = sample.at.saturating_duration_since(prev.at).as_secs_f64();
            if elapsed > 0.0 && sample.bytes_sent >= prev.bytes_sent {
                let bits = (sample.bytes_sent - prev.bytes_sent) as f64 * 8.0;
                let mbps = bits / elapsed / 1_000_000.0;
                let value = match self.smoothing {
                    Some(alpha) => alpha * mbps + (1.0 - alpha) * self.summary.upload_mbps,
                    None => mbps,
                };
                self.summary.upload_mbps = round2(value);
            } else if sample.bytes_sent < prev.bytes_sent {
                tracing::debug!(
                    prev = prev.bytes_sent,
                    now = sample.bytes_sent,
                    "bytes_sent went backwards, rebasing"
                );
            }
        }
        self.last = Some(sample);
    }

    /// Apply a node-pushed report. Present fields win over local ones.
    pub fn apply_remote(&mut self, remote: &RemoteStats) {
        if let Some(v) = remote.viewer_count {
            self.summary.viewer_count = v;
        }
        if let Some(v) = remote.upload_speed {
            self.summary.upload_mbps = v;
        }
        if let Some(v) = remote.latency {
            self.summary.latency_ms = v;
        }
        if let Some(v) = remote.packet_loss {
            self.summary.packet_loss_percent = v;
        }
        if let Some(v) = remote.jitter {
            self.summary.jitter_ms = v;
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.summary = StatsSummary::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bytes: u64, at: Instant) -> TransportSample {
        TransportSample {
            bytes_sent: bytes,
            round_trip_time: None,
            at,
        }
    }

    #[test]
    fn throughput_is_delta_over_interval() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::new(None);
        agg.record_sample(sample(0, t0));
        assert_eq!(agg.summary().upload_mbps, 0.0);

        // 312_500 bytes in 1s = 2.5 Mbps
        agg.record_sample(sample(312_500, t0 + Duration::from_secs(1)));
        assert_eq!(agg.summary().upload_mbps, 2.5);

        // same rate over 2s
        agg.record_sample(sample(937_500, t0 + Duration::from_secs(3)));
        assert_eq!(agg.summary().upload_mbps, 2.5);
    }

    #[test]
    fn rtt_becomes_latency_ms() {
        let mut agg = StatsAggregator::new(None);
        agg.record_sample(TransportSample {
            bytes_sent: 0,
            round_trip_time: Some(Duration::from_micros(42_400)),
            at: Instant::now(),
        });
        assert_eq!(agg.summary().latency_ms, 42.0);
    }

    #[test]
    fn counter_reset_rebases() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::new(None);
        agg.record_sample(sample(1_000_000, t0));
        agg.record_sample(sample(125_000, t0 + Duration::from_secs(1)));
        agg.record_sample(sample(250_000, t0 + Duration::from_secs(2)));
        assert_eq!(agg.summary().upload_mbps, 1.0);
    }

    #[test]
    fn smoothing_blends_samples() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::new(Some(0.5));
        agg.record_sample(sample(0, t0));
        agg.record_sample(sample(250_000, t0 + Duration::from_secs(1)));
        assert_eq!(agg.summary().upload_mbps, 1.0);
        agg.record_sample(sample(750_000, t0 + Duration::from_secs(2)));
        assert_eq!(agg.summary().upload_mbps, 2.5);
    }

    #[test]
    fn remote_fields_replace_local() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::new(None);
        agg.record_sample(sample(0, t0));
        agg.record_sample(sample(125_000, t0 + Duration::from_secs(1)));
        agg.apply_remote(&RemoteStats {
            viewer_count: Some(12),
            packet_loss: Some(0.4),
            ..Default::default()
        });
        let s = agg.summary();
        assert_eq!(s.viewer_count, 12);
        assert_eq!(s.packet_loss_percent, 0.4);
        assert_eq!(s.upload_mbps, 1.0);

        agg.reset();
        assert_eq!(*agg.summary(), StatsSummary::default());
    }
}
