/**
 * ADAPTATEUR E1.31 (sACN) - Encodage/décodage des trames lumière
 *
 * RÔLE :
 * - Sortant : une trame DMX par device et par tick, envoyée en UDP au host
 * - Entrant : trames reçues sur un univers, qui alimentent la source grille
 *
 * FORMAT (paquet de données, 126 octets d'en-tête + slots) :
 * - couche racine : préambule 0x0010, identifiant "ASC-E1.17", vecteur 4, CID 16 octets
 * - couche framing : vecteur 2, nom de source 64 octets (complété de NUL),
 *   priorité, adresse de synchro, séquence, options, univers
 * - couche DMP : vecteur 2, type 0xa1, start code 0, puis les slots
 */

use crate::color::GridFeed;
use crate::health::HealthTracker;
use crate::resolver::HostCache;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub const E131_PORT: u16 = 5568;
pub const MAX_SLOTS: usize = 512;
pub const SOURCE_NAME: &str = "BYOP";
pub const DEFAULT_UNIVERSE: u16 = 1;
pub const DEFAULT_PRIORITY: u8 = 100;

const HEADER_LEN: usize = 126;
const ACN_PACKET_ID: [u8; 12] = *b"ASC-E1.17\0\0\0";
const VECTOR_ROOT_DATA: u32 = 0x0000_0004;
const VECTOR_FRAMING_DATA: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
const DMP_ADDRESS_DATA_TYPE: u8 = 0xa1;
const SOURCE_NAME_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("not an ACN packet")]
    BadIdentifier,
    #[error("unexpected {layer} vector {vector:#x}")]
    UnexpectedVector { layer: &'static str, vector: u32 },
    #[error("unsupported start code {0:#x}")]
    UnsupportedStartCode(u8),
    #[error("too many slots: {0} (max {MAX_SLOTS})")]
    TooManySlots(usize),
    #[error("host {0} is not resolved yet")]
    Unresolved(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One E1.31 data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPacket {
    pub cid: [u8; 16],
    pub source_name: String,
    pub priority: u8,
    pub sequence: u8,
    pub universe: u16,
    pub slots: Vec<u8>,
}

impl DataPacket {
    pub fn new(cid: [u8; 16], source_name: &str, universe: u16, slot_count: usize) -> Self {
        Self {
            cid,
            source_name: source_name.to_string(),
            priority: DEFAULT_PRIORITY,
            sequence: 0,
            universe,
            slots: vec![0; slot_count],
        }
    }

    pub fn advance_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let n = self.slots.len();
        if n > MAX_SLOTS {
            return Err(ProtocolError::TooManySlots(n));
        }
        let total = HEADER_LEN + n;
        let mut buf = Vec::with_capacity(total);

        // couche racine
        buf.extend_from_slice(&0x0010u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&ACN_PACKET_ID);
        buf.extend_from_slice(&flags_and_length(total - 16));
        buf.extend_from_slice(&VECTOR_ROOT_DATA.to_be_bytes());
        buf.extend_from_slice(&self.cid);

        // couche framing
        buf.extend_from_slice(&flags_and_length(total - 38));
        buf.extend_from_slice(&VECTOR_FRAMING_DATA.to_be_bytes());
        let mut name = [0u8; SOURCE_NAME_LEN];
        let raw = self.source_name.as_bytes();
        let len = raw.len().min(SOURCE_NAME_LEN - 1);
        name[..len].copy_from_slice(&raw[..len]);
        buf.extend_from_slice(&name);
        buf.push(self.priority);
        buf.extend_from_slice(&0u16.to_be_bytes()); // adresse de synchro
        buf.push(self.sequence);
        buf.push(0); // options
        buf.extend_from_slice(&self.universe.to_be_bytes());

        // couche DMP
        buf.extend_from_slice(&flags_and_length(total - 115));
        buf.push(VECTOR_DMP_SET_PROPERTY);
        buf.push(DMP_ADDRESS_DATA_TYPE);
        buf.extend_from_slice(&0u16.to_be_bytes()); // première adresse
        buf.extend_from_slice(&1u16.to_be_bytes()); // incrément
        buf.extend_from_slice(&((n + 1) as u16).to_be_bytes());
        buf.push(0); // start code DMX
        buf.extend_from_slice(&self.slots);

        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort(buf.len()));
        }
        if buf[0..2] != 0x0010u16.to_be_bytes() || buf[4..16] != ACN_PACKET_ID {
            return Err(ProtocolError::BadIdentifier);
        }

        let root_vector = read_u32(buf, 18);
        if root_vector != VECTOR_ROOT_DATA {
            return Err(ProtocolError::UnexpectedVector { layer: "root", vector: root_vector });
        }
        let framing_vector = read_u32(buf, 40);
        if framing_vector != VECTOR_FRAMING_DATA {
            return Err(ProtocolError::UnexpectedVector { layer: "framing", vector: framing_vector });
        }
        if buf[117] != VECTOR_DMP_SET_PROPERTY {
            return Err(ProtocolError::UnexpectedVector { layer: "dmp", vector: buf[117] as u32 });
        }
        if buf[125] != 0 {
            return Err(ProtocolError::UnsupportedStartCode(buf[125]));
        }

        let count = read_u16(buf, 123) as usize;
        let slot_count = count.saturating_sub(1);
        if slot_count > MAX_SLOTS {
            return Err(ProtocolError::TooManySlots(slot_count));
        }
        if buf.len() < HEADER_LEN + slot_count {
            return Err(ProtocolError::TooShort(buf.len()));
        }

        let mut cid = [0u8; 16];
        cid.copy_from_slice(&buf[22..38]);
        // le nom est complété de NUL, on les retire
        let source_name = String::from_utf8_lossy(&buf[44..44 + SOURCE_NAME_LEN])
            .trim_end_matches('\0')
            .to_string();

        Ok(Self {
            cid,
            source_name,
            priority: buf[108],
            sequence: buf[111],
            universe: read_u16(buf, 113),
            slots: buf[HEADER_LEN..HEADER_LEN + slot_count].to_vec(),
        })
    }
}

fn flags_and_length(len: usize) -> [u8; 2] {
    (0x7000u16 | (len as u16 & 0x0fff)).to_be_bytes()
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Adresse multicast sACN d'un univers (239.255.hi.lo).
pub fn multicast_group(universe: u16) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

/// Où partent les trames encodées.
pub trait FrameSink: Send {
    fn send(&mut self, host: &str, packet: &[u8]) -> Result<(), ProtocolError>;
}

/// Sends frames over UDP from one non-blocking socket. Host names are
/// resolved by the task started with [`crate::resolver::spawn_resolver`];
/// until then their frames are dropped.
pub struct UdpSink {
    socket: UdpSocket,
    hosts: HostCache,
}

impl UdpSink {
    pub fn bind() -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, hosts: HostCache::new() })
    }

    pub fn hosts(&self) -> HostCache {
        self.hosts.clone()
    }
}

impl FrameSink for UdpSink {
    fn send(&mut self, host: &str, packet: &[u8]) -> Result<(), ProtocolError> {
        let addr = self.hosts.address(host).ok_or_else(|| ProtocolError::Unresolved(host.to_string()))?;
        self.socket.send_to(packet, addr)?;
        Ok(())
    }
}

/// Binds the inbound socket and joins the universe's multicast group.
pub async fn bind_receiver(listen: SocketAddr, universe: u16) -> io::Result<tokio::net::UdpSocket> {
    let socket = tokio::net::UdpSocket::bind(listen).await?;
    if let Err(e) = socket.join_multicast_v4(multicast_group(universe), Ipv4Addr::UNSPECIFIED) {
        warn!("could not join multicast group for universe {universe}: {e}");
    }
    info!("sACN receiver listening on {}, universe {universe}", socket.local_addr()?);
    Ok(socket)
}

/// Feeds every valid packet on `universe` into the grid. Bad packets are
/// skipped; only a socket error ends the loop.
pub async fn run_receiver(
    socket: tokio::net::UdpSocket,
    universe: u16,
    feed: GridFeed,
    health: HealthTracker,
) -> io::Result<()> {
    let mut buf = vec![0u8; HEADER_LEN + MAX_SLOTS];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match DataPacket::decode(&buf[..len]) {
            Ok(packet) if packet.universe == universe => {
                let started = Instant::now();
                feed.apply_frame(&packet.slots, &packet.source_name);
                health.record_grid_frame(started.elapsed());
            }
            Ok(packet) => trace!("ignoring universe {} from {from}", packet.universe),
            Err(e) => debug!("invalid sACN packet from {from}: {e}"),
        }
    }
}

pub fn spawn_receiver(
    socket: tokio::net::UdpSocket,
    universe: u16,
    feed: GridFeed,
    health: HealthTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_receiver(socket, universe, feed, health).await {
            warn!("sACN receiver stopped: {e}");
        }
    })
}
