//! Capture output sinks (spec.md §4.C9): a trace-file writer in pcap
//! format, and a HEP v3 re-encapsulating UDP sender. The manager tees
//! every inbound frame to the registered outputs before forwarding it
//! downstream for dissection.

use std::net::{SocketAddr, UdpSocket};

use parking_lot::Mutex;
use pcap::{Capture, Linktype, Packet as PcapPacket, PacketHeader, Savefile};
use sipwatch_core::Address;

use crate::error::CaptureError;

/// One registered capture output. `write_raw_frame` receives frames that
/// carry a genuine link-layer header (live device, trace file); these are
/// the only ones a pcap-format sink can record faithfully.
/// `write_payload` receives the resolved endpoints and payload for every
/// frame regardless of origin, which is what a HEP sink re-encapsulates.
pub trait CaptureOutput: Send + Sync {
    fn write_raw_frame(&self, _unix_secs: i64, _unix_nanos: u32, _frame: &[u8]) {}

    fn write_payload(&self, _src: Address, _dst: Address, _unix_secs: i64, _unix_nanos: u32, _payload: &[u8]) {}
}

/// Writes raw captured frames back out to a pcap-format trace file.
/// Frames from a HEP listener carry no real link-layer header and are
/// silently skipped by this sink (see `CaptureManager`'s dispatch).
pub struct PcapFileOutput {
    savefile: Mutex<Savefile>,
}

impl PcapFileOutput {
    pub fn create(path: &str) -> Result<Self, CaptureError> {
        let dead = Capture::dead(Linktype::ETHERNET).map_err(|e| CaptureError::InputOpen { name: path.to_string(), reason: e.to_string() })?;
        let savefile = dead.savefile(path).map_err(|e| CaptureError::InputOpen { name: path.to_string(), reason: e.to_string() })?;
        Ok(Self { savefile: Mutex::new(savefile) })
    }
}

impl CaptureOutput for PcapFileOutput {
    fn write_raw_frame(&self, unix_secs: i64, unix_nanos: u32, frame: &[u8]) {
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: unix_secs as libc::time_t,
                tv_usec: (unix_nanos / 1000) as libc::suseconds_t,
            },
            caplen: frame.len() as u32,
            len: frame.len() as u32,
        };
        let packet = PcapPacket::new(&header, frame);
        self.savefile.lock().write(&packet);
    }
}

/// Re-encapsulates every resolved packet as a HEP v3 datagram and sends it
/// to a configured collector address, carrying the original endpoints and
/// timestamp regardless of what kind of input produced the packet.
pub struct HepOutput {
    socket: UdpSocket,
    dest: SocketAddr,
    secret: Option<String>,
}

impl HepOutput {
    pub fn connect(dest: SocketAddr, secret: Option<String>) -> Result<Self, CaptureError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| CaptureError::InputOpen { name: dest.to_string(), reason: e.to_string() })?;
        Ok(Self { socket, dest, secret })
    }
}

impl CaptureOutput for HepOutput {
    fn write_payload(&self, src: Address, dst: Address, unix_secs: i64, unix_nanos: u32, payload: &[u8]) {
        let datagram = crate::hep::encode(src, dst, unix_secs, unix_nanos, payload, self.secret.as_deref());
        if let Err(error) = self.socket.send_to(&datagram, self.dest) {
            tracing::debug!(%error, dest = %self.dest, "failed to send HEP output datagram");
        }
    }
}
