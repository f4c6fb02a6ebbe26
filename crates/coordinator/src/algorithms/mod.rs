//! Adapters over the geometry/partitioning collaborators, plus built-in
//! reference implementations of each collaborator trait.

mod codec;
mod detect;
mod merge;
mod partition;

use std::collections::BTreeSet;

pub use codec::RawPointCodec;
pub use detect::SummaryDetector;
pub use merge::RigidTransformMerger;
pub use partition::{GabrielPartitioner, PartitionStrategy};

use contracts::{CoordinatorConfig, PartitionDecision, VehicleId};

use crate::{CoordinatorError, Result};

/// Map index-based neighbour pairs back onto vehicle ids.
///
/// `ids[i]` is the vehicle whose pose was passed at index `i`. Self-pairs are
/// ignored; out-of-range indices reject the whole decision.
pub fn neighbor_sets(
    ids: &[VehicleId],
    decision: &PartitionDecision,
) -> Result<Vec<BTreeSet<VehicleId>>> {
    let n = ids.len();
    if !decision.decisions.is_empty() && decision.decisions.len() != n {
        return Err(CoordinatorError::invalid_decision(format!(
            "{} boundary lists for {} vehicles",
            decision.decisions.len(),
            n
        )));
    }

    let mut sets = vec![BTreeSet::new(); n];
    for &(i, j) in &decision.neighbor_pairs {
        if i >= n || j >= n {
            return Err(CoordinatorError::invalid_decision(format!(
                "pair ({i}, {j}) out of range for {n} vehicles"
            )));
        }
        if i == j {
            continue;
        }
        sets[i].insert(ids[j]);
        sets[j].insert(ids[i]);
    }
    Ok(sets)
}

/// Built-in partitioner for the configured algorithm id
pub fn partitioner_for(config: &CoordinatorConfig) -> Result<GabrielPartitioner> {
    let strategy = PartitionStrategy::from_algorithm_id(config.partition_algorithm).ok_or_else(
        || {
            CoordinatorError::invalid_decision(format!(
                "unknown partition algorithm {}",
                config.partition_algorithm
            ))
        },
    )?;
    Ok(GabrielPartitioner::new(strategy, config.neighbor_radius_m))
}
