//! Mock Fleet Example
//!
//! Simulated vehicles driving a running edge over TCP: handshake, wait for
//! `S`, then per frame send a pose and a few compressed chunks and wait for
//! the edge's `D`.
//!
//! Run with: cargo run --bin mock_fleet -- [addr] [vehicles] [frames]
//! (start `emp-edge run -c <vehicles>` first)

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use contracts::{
    ChunkId, FrameId, PointCloudCodec, UplinkMessage, VehicleId, VehicleLocation, POINT_STRIDE,
};
use coordinator::algorithms::RawPointCodec;
use framing::{DownlinkEvent, DownlinkSession};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

type DemoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const CHUNKS_PER_FRAME: ChunkId = 2;
const POINTS_PER_CHUNK: usize = 256;
const VEHICLE_SPACING_M: f32 = 20.0;
const DOWNLINK_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> DemoResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:31904".to_string())
        .parse()?;
    let vehicles: VehicleId = args.next().map(|s| s.parse()).transpose()?.unwrap_or(2);
    let frames: FrameId = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);

    tracing::info!(%addr, vehicles, frames, "Starting mock fleet");

    let mut handles = Vec::new();
    for vehicle_id in 1..=vehicles {
        handles.push(tokio::spawn(run_vehicle(addr, vehicle_id, frames)));
    }
    for handle in handles {
        handle.await??;
    }

    tracing::info!("Mock fleet finished");
    Ok(())
}

struct Vehicle {
    id: VehicleId,
    stream: TcpStream,
    downlink: DownlinkSession,
    buf: Vec<u8>,
}

impl Vehicle {
    async fn connect(addr: SocketAddr, id: VehicleId) -> DemoResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&UplinkMessage::handshake(id).encode()).await?;
        Ok(Self {
            id,
            stream,
            downlink: DownlinkSession::new(4 * 1024 * 1024),
            buf: vec![0; 64 * 1024],
        })
    }

    /// Read downlink until `done` matches
    async fn wait_for(&mut self, done: impl Fn(&DownlinkEvent) -> bool) -> DemoResult<()> {
        loop {
            let n = timeout(DOWNLINK_WAIT, self.stream.read(&mut self.buf)).await??;
            if n == 0 {
                return Err(format!("vehicle {}: edge closed the connection", self.id).into());
            }
            for event in self.downlink.on_bytes(&self.buf[..n])? {
                if let DownlinkEvent::Decision { boundaries, .. } = &event {
                    tracing::debug!(vehicle_id = self.id, neighbors = boundaries.len(), "New partition");
                }
                if done(&event) {
                    return Ok(());
                }
            }
        }
    }

    async fn send(&mut self, message: UplinkMessage) -> DemoResult<()> {
        self.stream.write_all(&message.encode()).await?;
        Ok(())
    }
}

async fn run_vehicle(addr: SocketAddr, vehicle_id: VehicleId, frames: FrameId) -> DemoResult<()> {
    let mut vehicle = Vehicle::connect(addr, vehicle_id).await?;
    vehicle.wait_for(|e| *e == DownlinkEvent::Started).await?;
    tracing::info!(vehicle_id, "Start received");

    let codec = RawPointCodec;
    for frame_id in 0..frames {
        let started = Instant::now();
        let pose = pose_at(vehicle_id, frame_id);
        vehicle
            .send(UplinkMessage::location(vehicle_id, frame_id, &pose))
            .await?;

        for chunk_id in 1..=CHUNKS_PER_FRAME {
            let payload = codec.encode(&random_points(POINTS_PER_CHUNK), 0, 0)?;
            vehicle
                .send(UplinkMessage::compressed(
                    vehicle_id,
                    frame_id,
                    chunk_id,
                    payload.into(),
                ))
                .await?;
        }

        vehicle
            .wait_for(|e| *e == DownlinkEvent::FrameFinished(frame_id))
            .await?;
        tracing::info!(
            vehicle_id,
            frame_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            next = vehicle.downlink.next_frame(),
            "Frame acknowledged"
        );
    }
    Ok(())
}

/// Vehicles in a column along x, creeping forward 1 m per frame
fn pose_at(vehicle_id: VehicleId, frame_id: FrameId) -> VehicleLocation {
    let x = vehicle_id as f32 * VEHICLE_SPACING_M + f32::from(frame_id);
    VehicleLocation::new(vec![x, 0.0, 0.0, 0.0, 0.0, 0.0])
}

fn random_points(count: usize) -> Vec<f32> {
    let mut rng = rand::rng();
    let mut points = Vec::with_capacity(count * POINT_STRIDE);
    for _ in 0..count {
        points.push(rng.random_range(-50.0..50.0));
        points.push(rng.random_range(-50.0..50.0));
        points.push(rng.random_range(-2.0..5.0));
        points.push(rng.random_range(0.0..1.0));
    }
    points
}
