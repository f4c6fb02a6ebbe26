//! One vehicle connection: a reader driving the uplink session and a writer
//! draining the downlink queue.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use framing::UplinkSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::registry::{ConnectionId, DownlinkQueue};
use crate::server::ServerContext;
use crate::{Result, ServerError};

#[instrument(name = "edge_connection", skip_all, fields(%peer, connection))]
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    let (mut reader, writer) = stream.into_split();
    let (queue, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let coordinator = &context.coordinator;
    let mut session = UplinkSession::new(
        Arc::clone(&context.tasks),
        Arc::clone(coordinator.bandwidth()),
        coordinator.primary_vehicle_id(),
        context.config.max_message_bytes,
    );
    let mut buf = vec![0u8; context.config.read_buffer_bytes];

    let result = loop {
        let n = tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(ServerError::connection(peer, e)),
            },
        };

        match session.on_bytes(&buf[..n]) {
            Ok(Some(vehicle_id)) => context.register(vehicle_id, connection, queue.clone()),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Closing connection on protocol error");
                break Err(e.into());
            }
        }
    };

    if let Some(vehicle_id) = session.vehicle_id() {
        context.unregister(vehicle_id, connection);
    }
    drop(queue);
    if let Err(e) = writer_task.await {
        error!(error = %e, "Writer task panicked");
    }
    result
}

/// Drains the downlink queue until every sender is gone
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            info!(error = %e, "Downlink write failed, dropping queue");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

impl ServerContext {
    fn register(&self, vehicle_id: contracts::VehicleId, connection: ConnectionId, queue: DownlinkQueue) {
        self.coordinator.register_vehicle(vehicle_id);
        self.registry.bind(vehicle_id, connection, queue);
        info!(vehicle_id, connection, "Vehicle registered");
        observability::record_connections(self.registry.online_count());
    }

    fn unregister(&self, vehicle_id: contracts::VehicleId, connection: ConnectionId) {
        if self.registry.unbind(vehicle_id, connection) {
            self.coordinator.mark_offline(vehicle_id);
            info!(vehicle_id, connection, "Vehicle disconnected");
        }
        observability::record_connections(self.registry.online_count());
    }
}
