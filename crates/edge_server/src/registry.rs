//! 车辆下行队列注册表
//!
//! Each connected vehicle has one unbounded queue of encoded downlink
//! messages, drained by its connection's writer task.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use contracts::{ContractError, DownlinkMessage, DownlinkSender, VehicleId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Encoded downlink frames for one connection
pub type DownlinkQueue = mpsc::UnboundedSender<Bytes>;

/// Connection-local id, so a stale connection cannot unbind its successor
pub type ConnectionId = u64;

struct VehicleLink {
    connection: ConnectionId,
    queue: DownlinkQueue,
}

#[derive(Default)]
struct RegistryState {
    links: BTreeMap<VehicleId, VehicleLink>,
    started: bool,
    /// Vehicles that already got `S`
    greeted: BTreeSet<VehicleId>,
}

/// Routes downlink messages to connected vehicles and owns the start signal
pub struct VehicleRegistry {
    expected_clients: usize,
    state: Mutex<RegistryState>,
}

impl VehicleRegistry {
    pub fn new(expected_clients: usize) -> Self {
        Self {
            expected_clients,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Bind `vehicle_id` to a connection's queue.
    ///
    /// Once `expected_clients` vehicles are bound, `S` goes to every bound
    /// vehicle; vehicles binding after that get it on arrival. Nobody gets it
    /// twice.
    pub fn bind(&self, vehicle_id: VehicleId, connection: ConnectionId, queue: DownlinkQueue) {
        let mut state = self.state.lock();
        if let Some(previous) = state
            .links
            .insert(vehicle_id, VehicleLink { connection, queue })
        {
            warn!(
                vehicle_id,
                previous = previous.connection,
                connection,
                "Vehicle rebound to a new connection"
            );
        }

        if !state.started && state.links.len() >= self.expected_clients {
            state.started = true;
            info!(vehicles = state.links.len(), "All expected vehicles connected, broadcasting start");
        }
        if state.started {
            let RegistryState { links, greeted, .. } = &mut *state;
            for (&id, link) in links.iter() {
                if greeted.insert(id) {
                    let sent = link.queue.send(DownlinkMessage::start().encode()).is_ok();
                    observability::record_downlink_sent("start", sent);
                }
            }
        }
    }

    /// Drop the binding if it still belongs to `connection`
    pub fn unbind(&self, vehicle_id: VehicleId, connection: ConnectionId) -> bool {
        let mut state = self.state.lock();
        match state.links.get(&vehicle_id) {
            Some(link) if link.connection == connection => {
                state.links.remove(&vehicle_id);
                debug!(vehicle_id, connection, "Downlink unbound");
                true
            }
            _ => false,
        }
    }

    pub fn online_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

impl DownlinkSender for VehicleRegistry {
    fn send(&self, vehicle_id: VehicleId, message: DownlinkMessage) -> Result<(), ContractError> {
        let state = self.state.lock();
        let link = state
            .links
            .get(&vehicle_id)
            .ok_or(ContractError::UnknownVehicle { vehicle_id })?;
        link.queue
            .send(message.encode())
            .map_err(|_| ContractError::DownlinkClosed { vehicle_id })
    }
}
