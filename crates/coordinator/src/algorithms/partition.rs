//! Gabriel-graph partitioner.
//!
//! Two vehicles within `radius_m` are neighbours when no third vehicle lies
//! strictly inside the circle whose diameter is the segment between them.
//! Each neighbour pair gets a straight boundary perpendicular to that segment;
//! the strategy decides where along the segment it sits.
//!
//! Boundary descriptors are `[nx, ny, offset, neighbor_index]`: the owning
//! vehicle keeps points with `nx·x + ny·y <= offset` (world frame).

use contracts::{BoundaryDescriptor, PartitionDecision, PartitionError, Partitioner, VehicleLocation};

/// Where the boundary between two neighbours is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// 中点切分
    Basic,
    /// 按带宽比例切分，带宽高的车辆负责更大的区域
    BandwidthWeighted,
    /// 带宽比例切分，但限制在 [0.25, 0.75] 之间
    Adaptive,
}

impl PartitionStrategy {
    const ADAPTIVE_MIN: f64 = 0.25;
    const ADAPTIVE_MAX: f64 = 0.75;

    /// Algorithm ids 1-2 share the midpoint split.
    pub fn from_algorithm_id(id: u8) -> Option<Self> {
        match id {
            1 | 2 => Some(Self::Basic),
            3 => Some(Self::BandwidthWeighted),
            4 => Some(Self::Adaptive),
            _ => None,
        }
    }

    /// Fraction of the `i → j` segment assigned to `i`
    fn split_ratio(self, bandwidth_i: f64, bandwidth_j: f64) -> f64 {
        let weighted = || {
            let total = bandwidth_i + bandwidth_j;
            if total > 0.0 && total.is_finite() {
                bandwidth_i / total
            } else {
                0.5
            }
        };
        match self {
            Self::Basic => 0.5,
            Self::BandwidthWeighted => weighted(),
            Self::Adaptive => weighted().clamp(Self::ADAPTIVE_MIN, Self::ADAPTIVE_MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GabrielPartitioner {
    strategy: PartitionStrategy,
    radius_m: f64,
}

impl GabrielPartitioner {
    pub fn new(strategy: PartitionStrategy, radius_m: f64) -> Self {
        Self { strategy, radius_m }
    }

    pub fn strategy(&self) -> PartitionStrategy {
        self.strategy
    }

    fn positions(poses: &[VehicleLocation]) -> Result<Vec<(f64, f64)>, PartitionError> {
        poses
            .iter()
            .enumerate()
            .map(|(i, pose)| {
                pose.xy()
                    .map(|(x, y)| (f64::from(x), f64::from(y)))
                    .ok_or_else(|| PartitionError::new(format!("pose {i} has no x/y")))
            })
            .collect()
    }

    fn is_gabriel_edge(positions: &[(f64, f64)], i: usize, j: usize, distance: f64) -> bool {
        let (xi, yi) = positions[i];
        let (xj, yj) = positions[j];
        let mid = ((xi + xj) / 2.0, (yi + yj) / 2.0);
        let radius = distance / 2.0;
        positions
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != i && *k != j)
            .all(|(_, &(xk, yk))| (xk - mid.0).hypot(yk - mid.1) >= radius)
    }
}

impl Partitioner for GabrielPartitioner {
    fn partition(
        &self,
        poses: &[VehicleLocation],
        bandwidths_mbps: &[f64],
    ) -> Result<PartitionDecision, PartitionError> {
        if poses.len() != bandwidths_mbps.len() {
            return Err(PartitionError::new(format!(
                "{} poses but {} bandwidth samples",
                poses.len(),
                bandwidths_mbps.len()
            )));
        }
        let positions = Self::positions(poses)?;
        let n = positions.len();
        let mut decision = PartitionDecision {
            neighbor_pairs: Vec::new(),
            decisions: vec![Vec::new(); n],
        };

        for i in 0..n {
            for j in (i + 1)..n {
                let (xi, yi) = positions[i];
                let (xj, yj) = positions[j];
                let distance = (xj - xi).hypot(yj - yi);
                // co-located vehicles have no usable boundary
                if distance == 0.0 || distance > self.radius_m {
                    continue;
                }
                if !Self::is_gabriel_edge(&positions, i, j, distance) {
                    continue;
                }

                let ratio = self.strategy.split_ratio(bandwidths_mbps[i], bandwidths_mbps[j]);
                let (nx, ny) = ((xj - xi) / distance, (yj - yi) / distance);
                let (bx, by) = (xi + ratio * (xj - xi), yi + ratio * (yj - yi));
                let offset = nx * bx + ny * by;

                decision.neighbor_pairs.push((i, j));
                decision.decisions[i].push(descriptor(nx, ny, offset, j));
                decision.decisions[j].push(descriptor(-nx, -ny, -offset, i));
            }
        }
        Ok(decision)
    }
}

fn descriptor(nx: f64, ny: f64, offset: f64, neighbor: usize) -> BoundaryDescriptor {
    vec![nx as f32, ny as f32, offset as f32, neighbor as f32]
}
