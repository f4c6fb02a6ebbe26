//! Per-vehicle uplink bandwidth estimation.
//!
//! The framer reports `(vehicle, transfer key, received-so-far, declared size)`
//! every time it looks at a point-cloud message. The first report for a key
//! opens a transfer, the report where `received == declared` closes it and
//! yields one throughput sample in kbps (bits per millisecond).
//!
//! Two estimates are exposed:
//! - naive: the raw sample of the most recent completed transfer
//! - EWMA: time-decayed average over the last `window_len` samples, with
//!   `alpha = min(1, 0.75 + 0.25 * dt / max_window_ms)`

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use contracts::{BandwidthConfig, BandwidthEstimate, VehicleId};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use tracing::{debug, trace};

/// Completed transfers kept around to ignore repeated "done" reports
const TRANSFER_RETENTION: u64 = 64;

#[derive(Debug, Clone, Copy)]
struct Transfer {
    started_at: Instant,
    start_bytes: u64,
    finished: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    kbps: f64,
    at: Instant,
}

struct VehicleSamples {
    transfers: BTreeMap<u64, Transfer>,
    last_key: Option<u64>,
    last_measured: Option<(u64, f64)>,
    window: HeapRb<Sample>,
    ewma: Option<f64>,
}

impl VehicleSamples {
    fn new(window_len: usize) -> Self {
        Self {
            transfers: BTreeMap::new(),
            last_key: None,
            last_measured: None,
            window: HeapRb::new(window_len),
            ewma: None,
        }
    }

    fn naive(&self) -> Option<f64> {
        match (self.last_key, self.last_measured) {
            (Some(last), Some((key, kbps))) if key == last => Some(kbps),
            _ => None,
        }
    }

    fn prune(&mut self) {
        if let Some(last) = self.last_key {
            let floor = last.saturating_sub(TRANSFER_RETENTION);
            self.transfers.retain(|key, _| *key >= floor);
        }
    }
}

/// Point-in-time view of one vehicle's estimates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandwidthSnapshot {
    pub naive_kbps: Option<f64>,
    pub ewma_kbps: Option<f64>,
    pub samples: usize,
}

pub struct BandwidthEstimator {
    config: BandwidthConfig,
    vehicles: Mutex<HashMap<VehicleId, VehicleSamples>>,
}

impl BandwidthEstimator {
    pub fn new(config: BandwidthConfig) -> Self {
        Self {
            config,
            vehicles: Mutex::new(HashMap::new()),
        }
    }

    /// Report transfer progress observed now
    pub fn on_receive(&self, vehicle_id: VehicleId, key: u64, received: u64, expected: u64) {
        self.on_receive_at(vehicle_id, key, received, expected, Instant::now());
    }

    /// Report transfer progress observed at `at`
    pub fn on_receive_at(
        &self,
        vehicle_id: VehicleId,
        key: u64,
        received: u64,
        expected: u64,
        at: Instant,
    ) {
        if expected == 0 || received > expected {
            debug!(vehicle_id, key, received, expected, "Discarding malformed bandwidth sample");
            return;
        }

        let mut vehicles = self.vehicles.lock();
        let samples = vehicles
            .entry(vehicle_id)
            .or_insert_with(|| VehicleSamples::new(self.config.window_len.max(1)));

        let transfer = samples.transfers.entry(key).or_insert(Transfer {
            started_at: at,
            start_bytes: received,
            finished: false,
        });
        if transfer.finished || received < expected {
            return;
        }
        transfer.finished = true;

        let elapsed_ms = at.saturating_duration_since(transfer.started_at).as_millis();
        let bytes = expected - transfer.start_bytes;
        samples.last_key = Some(samples.last_key.map_or(key, |last| last.max(key)));

        if elapsed_ms == 0 {
            trace!(vehicle_id, key, "Zero-duration transfer, no sample");
            samples.prune();
            return;
        }

        let kbps = bytes as f64 * 8.0 / elapsed_ms as f64;
        if samples.last_key == Some(key) {
            samples.last_measured = Some((key, kbps));
        }
        samples.window.push_overwrite(Sample { kbps, at });
        samples.ewma = time_decayed_ewma(samples.window.iter(), self.config.max_window_ms as f64);
        samples.prune();

        debug!(vehicle_id, key, kbps, elapsed_ms = elapsed_ms as u64, "Bandwidth sample recorded");
        observability::record_bandwidth(vehicle_id, kbps);
    }

    /// Raw measurement of the latest completed transfer
    pub fn naive_kbps(&self, vehicle_id: VehicleId) -> Option<f64> {
        self.vehicles.lock().get(&vehicle_id).and_then(VehicleSamples::naive)
    }

    pub fn ewma_kbps(&self, vehicle_id: VehicleId) -> Option<f64> {
        self.vehicles.lock().get(&vehicle_id).and_then(|s| s.ewma)
    }

    /// Estimate selected by configuration
    pub fn estimate_kbps(&self, vehicle_id: VehicleId) -> Option<f64> {
        match self.config.estimate {
            BandwidthEstimate::Naive => self.naive_kbps(vehicle_id),
            BandwidthEstimate::Ewma => self.ewma_kbps(vehicle_id),
        }
    }

    /// Estimate in Mbps, falling back to the configured default when unmeasured
    pub fn estimate_mbps(&self, vehicle_id: VehicleId) -> f64 {
        self.estimate_kbps(vehicle_id)
            .map(|kbps| kbps / 1000.0)
            .unwrap_or(self.config.fallback_mbps)
    }

    pub fn snapshot(&self, vehicle_id: VehicleId) -> BandwidthSnapshot {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .map(|s| BandwidthSnapshot {
                naive_kbps: s.naive(),
                ewma_kbps: s.ewma,
                samples: s.window.occupied_len(),
            })
            .unwrap_or_default()
    }
}

fn time_decayed_ewma<'a>(
    mut samples: impl Iterator<Item = &'a Sample>,
    max_window_ms: f64,
) -> Option<f64> {
    let first = samples.next()?;
    let (ewma, _) = samples.fold((first.kbps, first.at), |(ewma, prev), sample| {
        let dt_ms = sample.at.saturating_duration_since(prev).as_secs_f64() * 1000.0;
        let alpha = (0.75 + 0.25 * dt_ms / max_window_ms).min(1.0);
        ((1.0 - alpha) * ewma + alpha * sample.kbps, sample.at)
    });
    Some(ewma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn estimator() -> BandwidthEstimator {
        BandwidthEstimator::new(BandwidthConfig::default())
    }

    /// One completed transfer of `bytes`, taking `ms`
    fn transfer(est: &BandwidthEstimator, key: u64, bytes: u64, start: Instant, ms: u64) {
        est.on_receive_at(1, key, 0, bytes, start);
        est.on_receive_at(1, key, bytes, bytes, start + Duration::from_millis(ms));
    }

    #[test]
    fn test_partial_then_complete_gives_one_sample() {
        let est = estimator();
        let t0 = Instant::now();
        est.on_receive_at(1, 0, 1000, 50_000, t0);
        assert_eq!(est.naive_kbps(1), None);

        est.on_receive_at(1, 0, 50_000, 50_000, t0 + Duration::from_secs(1));
        let expected = (50_000.0 - 1000.0) * 8.0 / 1000.0;
        assert_eq!(est.naive_kbps(1), Some(expected));
        assert_eq!(est.ewma_kbps(1), Some(expected));
        assert_eq!(est.snapshot(1).samples, 1);
    }

    #[test]
    fn test_zero_duration_is_discarded() {
        let est = estimator();
        let t0 = Instant::now();
        est.on_receive_at(1, 0, 500, 500, t0);
        assert_eq!(est.snapshot(1), BandwidthSnapshot::default());
        assert_eq!(est.estimate_mbps(1), 10.0);
    }

    #[test]
    fn test_malformed_sample_is_discarded() {
        let est = estimator();
        est.on_receive_at(1, 0, 900, 100, Instant::now());
        est.on_receive_at(1, 1, 0, 0, Instant::now());
        assert_eq!(est.snapshot(1).samples, 0);
    }

    #[test]
    fn test_repeated_completion_is_ignored() {
        let est = estimator();
        let t0 = Instant::now();
        transfer(&est, 0, 1000, t0, 100);
        est.on_receive_at(1, 0, 1000, 1000, t0 + Duration::from_secs(5));
        assert_eq!(est.snapshot(1).samples, 1);
        assert_eq!(est.naive_kbps(1), Some(80.0));
    }

    #[test]
    fn test_ewma_weights_by_elapsed_time() {
        let est = estimator();
        let t0 = Instant::now();
        // 100 kbps, then 200 kbps finishing at the same instant: alpha = 0.75
        transfer(&est, 0, 1250, t0, 100);
        transfer(&est, 1, 2500, t0, 100);
        let ewma = est.ewma_kbps(1).unwrap();
        assert!((ewma - 175.0).abs() < 1e-9, "got {ewma}");
        assert_eq!(est.naive_kbps(1), Some(200.0));

        // a full decay window later the newest sample dominates entirely
        transfer(&est, 2, 5000, t0 + Duration::from_millis(30_000), 100);
        let ewma = est.ewma_kbps(1).unwrap();
        assert!((ewma - 400.0).abs() < 1e-9, "got {ewma}");
    }

    #[test]
    fn test_window_is_bounded() {
        let est = estimator();
        let t0 = Instant::now();
        for key in 0..40 {
            transfer(&est, key, 1000, t0 + Duration::from_millis(key * 10), 5);
        }
        assert_eq!(est.snapshot(1).samples, 25);
    }

    #[test]
    fn test_ewma_mode_and_fallback() {
        let config = BandwidthConfig {
            estimate: BandwidthEstimate::Ewma,
            fallback_mbps: 3.5,
            ..BandwidthConfig::default()
        };
        let est = BandwidthEstimator::new(config);
        assert_eq!(est.estimate_mbps(9), 3.5);

        transfer(&est, 0, 125_000, Instant::now(), 1000);
        assert_eq!(est.estimate_kbps(1), Some(1000.0));
        assert_eq!(est.estimate_mbps(1), 1.0);
    }
}
