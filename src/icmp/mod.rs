pub mod decode;
pub mod error;
pub mod layout;
pub mod session;

#[cfg(unix)]
pub mod packet;
#[cfg(unix)]
pub mod socket;

#[cfg(windows)]
pub mod winapi;

pub use error::{ErrorKind, IcmpError};
pub use session::{IcmpTransport, SendStatus, Session};

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Largest payload the ICMP transport accepts.
pub const MAX_PAYLOAD_SIZE: usize = 65500;

/// `IP_FLAG_DF` in the option block's flags byte.
pub const IP_FLAG_DF: u8 = 0x02;

pub const DEFAULT_TTL: u8 = 128;

#[cfg(windows)]
pub use winapi::WinApiTransport as SystemTransport;
#[cfg(unix)]
pub use socket::DgramTransport as SystemTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// IP-level options sent with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpOptions {
    pub ttl: u8,
    pub tos: u8,
    pub flags: u8,
}

impl Default for IpOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            tos: 0,
            flags: 0,
        }
    }
}

impl IpOptions {
    pub fn dont_fragment(&self) -> bool {
        self.flags & IP_FLAG_DF != 0
    }
}

#[derive(Debug, Clone)]
pub struct EchoRequest<'a> {
    pub destination: IpAddr,
    /// IPv6 scope id, 0 when unscoped.
    pub scope_id: u32,
    pub payload: &'a [u8],
    pub timeout: Duration,
    pub options: IpOptions,
}

impl<'a> EchoRequest<'a> {
    pub fn new(destination: IpAddr, payload: &'a [u8], timeout: Duration) -> Self {
        Self {
            destination,
            scope_id: 0,
            payload,
            timeout,
            options: IpOptions::default(),
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.destination)
    }

    /// Timeout in whole milliseconds, saturating at `u32::MAX`.
    pub fn timeout_ms(&self) -> u32 {
        u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

/// IP option block echoed back with an IPv4 reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionEcho {
    pub ttl: u8,
    pub tos: u8,
    pub flags: u8,
    pub data: Vec<u8>,
}

/// One reply record.
///
/// IPv6 records carry neither payload nor option echo: the transport does
/// not return them, so `data` and `options` are `None` for that family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub source: SocketAddr,
    pub status: u32,
    /// Round-trip time in milliseconds.
    pub round_trip_time: u32,
    pub data: Option<Vec<u8>>,
    pub options: Option<OptionEcho>,
}

impl EchoReply {
    pub fn is_success(&self) -> bool {
        self.status == error::IP_SUCCESS
    }

    /// Failure kind carried by a non-zero record status.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.is_success() {
            None
        } else {
            Some(ErrorKind::classify(self.status))
        }
    }

    pub fn ttl(&self) -> Option<u8> {
        self.options.as_ref().map(|o| o.ttl)
    }
}
