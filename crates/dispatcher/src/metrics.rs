//! Per-sink counters
//!
//! Lock-free; read by the dispatcher for the shutdown report.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use contracts::FrameId;

/// `last_frame` 未写入时的哨兵值
const NO_FRAME: u32 = u32::MAX;

/// Counters for a single sink
#[derive(Debug)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    write_count: AtomicU64,
    failure_count: AtomicU64,
    dropped_count: AtomicU64,
    /// 已写出的点数（不含失败帧）
    points_written: AtomicU64,
    last_frame: AtomicU32,
}

impl Default for SinkMetrics {
    fn default() -> Self {
        Self {
            queue_len: AtomicUsize::new(0),
            write_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            last_frame: AtomicU32::new(NO_FRAME),
        }
    }
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Record a successful write of `points` points for `frame_id`
    pub fn record_write(&self, frame_id: FrameId, points: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.points_written
            .fetch_add(points as u64, Ordering::Relaxed);
        self.last_frame.store(u32::from(frame_id), Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn points_written(&self) -> u64 {
        self.points_written.load(Ordering::Relaxed)
    }

    /// Last frame written successfully
    pub fn last_frame(&self) -> Option<FrameId> {
        FrameId::try_from(self.last_frame.load(Ordering::Relaxed)).ok()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            points_written: self.points_written(),
            last_frame: self.last_frame(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub points_written: u64,
    pub last_frame: Option<FrameId>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "written={} failed={} dropped={} points={}",
            self.write_count, self.failure_count, self.dropped_count, self.points_written
        )?;
        if let Some(frame) = self.last_frame {
            write!(f, " last_frame={frame}")?;
        }
        Ok(())
    }
}
