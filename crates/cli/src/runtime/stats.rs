//! Run statistics printed at shutdown.

use std::time::Duration;

use contracts::FrameId;
use dispatcher::DispatchReport;
use observability::MetricsSummary;

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub duration: Duration,
    /// Vehicles seen during the run
    pub vehicles: usize,
    /// Frame the edge was waiting on when it stopped
    pub last_frame: FrameId,
    pub pipeline: MetricsSummary,
    pub sinks: DispatchReport,
}

impl RunStats {
    /// Completed frames per second
    pub fn fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.pipeline.frames_completed as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Edge Run Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Vehicles: {}", self.vehicles);
        println!("Last frame: {}", self.last_frame);
        println!("Frames/s: {:.2}", self.fps());
        println!();
        print!("{}", self.pipeline);

        if !self.sinks.is_empty() {
            println!("\nSinks:");
            for (name, snapshot) in &self.sinks {
                println!("  - {name}: {snapshot}");
            }
        }
        println!();
    }
}
