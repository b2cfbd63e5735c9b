//! LAN discovery: a hosting node multicasts beacons naming its session address and TCP port;
//! a joining node listens until it hears the address it wants.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use peerpad_core::Address;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const BEACON_INTERVAL: Duration = Duration::from_secs(1);
pub const BEACON_VERSION: u8 = 1;

/// One advertisement: "`address` accepts sessions on TCP `port`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub version: u8,
    pub address: Address,
    pub port: u16,
}

impl Beacon {
    pub fn new(address: Address, port: u16) -> Self {
        Self {
            version: BEACON_VERSION,
            address,
            port,
        }
    }

    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// `None` for garbage and for beacons of another version.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let beacon: Beacon = bincode::deserialize(bytes).ok()?;
        (beacon.version == BEACON_VERSION).then_some(beacon)
    }
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Announce `address` every second until the task is dropped.
pub async fn advertise(address: Address, discovery_port: u16, transport_port: u16) -> std::io::Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_multicast_ttl_v4(1)?;
    let frame = Beacon::new(address, transport_port).encode()?;
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            debug!(error = %e, "beacon send failed");
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

/// Listen for a beacon naming `target`; returns where to open the session connection.
pub async fn resolve(target: &Address, discovery_port: u16, timeout: Duration) -> std::io::Result<SocketAddr> {
    let socket = make_multicast_socket(discovery_port).await?;
    let mut buf = vec![0u8; 2048];
    let search = async {
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            match Beacon::decode(&buf[..n]) {
                Some(b) if &b.address == target => {
                    debug!(%target, %from, port = b.port, "host found");
                    return Ok::<_, std::io::Error>(SocketAddr::new(from.ip(), b.port));
                }
                Some(b) => trace!(address = %b.address, "ignoring beacon"),
                None => trace!(%from, "ignoring datagram"),
            }
        }
    };
    tokio::time::timeout(timeout, search).await.map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no host answered for {target}"),
        )
    })?
}
