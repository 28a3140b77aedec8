use crate::hexed::{HexedU16, HexedU64, HexedU8};
use crate::skstack::ipv6::IPv6Addr;

/// Event numbers the modem reports through `EVENT` lines.
pub mod event {
    pub const NS_RECEIVED: u8 = 0x01;
    pub const NA_RECEIVED: u8 = 0x02;
    pub const ECHO_REQUEST_RECEIVED: u8 = 0x05;
    pub const ED_SCAN_COMPLETED: u8 = 0x1F;
    pub const BEACON_REQUEST_RECEIVED: u8 = 0x20;
    pub const UDP_SEND_COMPLETED: u8 = 0x21;
    pub const ACTIVE_SCAN_COMPLETED: u8 = 0x22;
    pub const PANA_CONNECT_ERROR: u8 = 0x24;
    pub const PANA_CONNECT_COMPLETED: u8 = 0x25;
    pub const SESSION_CLOSE_REQUEST_RECEIVED: u8 = 0x26;
    pub const PANA_SESSION_CLOSED: u8 = 0x27;
    pub const PANA_SESSION_CLOSE_TIMEOUT: u8 = 0x28;
    pub const PANA_SESSION_EXPIRED: u8 = 0x29;
    pub const ARIB108_SEND_PAUSED: u8 = 0x32;
    pub const ARIB108_SEND_RESUMED: u8 = 0x33;
}

/// `EVENT <num> <sender> [<param>]`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResEvent {
    pub num: HexedU8,
    pub sender: IPv6Addr,
    pub param: Option<HexedU8>,
}

/// One PAN discovered by an active scan, from the labeled `EPANDESC` block.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResEpandesc {
    pub channel: HexedU8,
    pub channel_page: HexedU8,
    pub pan_id: HexedU16,
    pub addr: HexedU64,
    pub lqi: HexedU8,
    pub pair_id: String,
}

/// A received UDP datagram, header fields plus the raw payload bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResErxudp {
    pub sender: IPv6Addr,
    pub dest: IPv6Addr,
    pub rport: HexedU16,
    pub lport: HexedU16,
    pub sender_lla: HexedU64,
    pub secured: HexedU8,
    pub datalen: HexedU16,
    pub payload: Vec<u8>,
}

/// The three asynchronous notification shapes the modem emits.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Response {
    Event(ResEvent),
    Epandesc(ResEpandesc),
    Erxudp(ResErxudp),
}

/// Durable handle for a discovered and address-resolved meter. Held for
/// the lifetime of the PANA session, dropped on disconnect.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SmartMeterIdentifier {
    pub ipv6_address: IPv6Addr,
    pub channel: HexedU8,
    pub pan_id: HexedU16,
}

impl std::fmt::Display for SmartMeterIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "addr: {}, channel: {}, pan id: {}",
            self.ipv6_address, self.channel, self.pan_id
        )
    }
}
