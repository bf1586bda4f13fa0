// Unix transport on top of the kernel's ICMP datagram sockets.
// Linux allows these without privileges for groups in net.ipv4.ping_group_range;
// macOS always does.

use socket2::{Domain, Protocol, Socket, Type};
use std::cell::Cell;
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use crate::icmp::error::{
    IP_BAD_OPTION, IP_DEST_HOST_UNREACHABLE, IP_DEST_NET_UNREACHABLE, IP_GENERAL_FAILURE,
    IP_REQ_TIMED_OUT, IP_SUCCESS,
};
use crate::icmp::layout::RecordWriter;
use crate::icmp::packet::{strip_ipv4_header, IcmpPacket};
use crate::icmp::{AddressFamily, EchoReply, EchoRequest, IcmpTransport, IpOptions, OptionEcho, SendStatus};

const RECV_BUFFER_SIZE: usize = 65536;

// Default TTL when IP header not available
const DEFAULT_REPLY_TTL: u8 = 64;

pub struct DgramTransport;

pub struct DgramHandle {
    socket: Socket,
    family: AddressFamily,
    identifier: u16,
    sequence: Cell<u16>,
    replies: Cell<u32>,
    /// Options last set on the socket.
    applied: Cell<Option<IpOptions>>,
}

impl IcmpTransport for DgramTransport {
    type Handle = DgramHandle;

    fn open(&self, family: AddressFamily) -> Result<DgramHandle, u32> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            AddressFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|e| {
            log::debug!("failed to create {} ICMP datagram socket: {}", family, e);
            e.raw_os_error().map(|code| code as u32).unwrap_or(IP_GENERAL_FAILURE)
        })?;

        Ok(DgramHandle {
            socket,
            family,
            identifier: crate::utils::generate_identifier(),
            sequence: Cell::new(0),
            replies: Cell::new(0),
            applied: Cell::new(None),
        })
    }

    fn close(&self, handle: DgramHandle) -> Result<(), u32> {
        drop(handle);
        Ok(())
    }

    fn send_echo(&self, handle: &DgramHandle, request: &EchoRequest<'_>, reply: &mut [u8]) -> SendStatus {
        handle.replies.set(0);
        match handle.exchange(request, reply) {
            Ok(count) => {
                handle.replies.set(count);
                SendStatus::Replies(count)
            }
            Err(code) => SendStatus::Failed(code),
        }
    }

    fn wait(&self, _handle: &DgramHandle) -> Result<(), u32> {
        // sends complete synchronously
        Ok(())
    }

    fn parse_replies(&self, handle: &DgramHandle, _reply: &mut [u8]) -> Result<u32, u32> {
        Ok(handle.replies.get())
    }
}

impl DgramHandle {
    fn apply_options(&self, options: &IpOptions) -> io::Result<()> {
        if self.applied.get() == Some(*options) {
            return Ok(());
        }
        match self.family {
            AddressFamily::V4 => {
                self.socket.set_ttl(u32::from(options.ttl))?;
                self.socket.set_tos(u32::from(options.tos))?;
            }
            AddressFamily::V6 => {
                self.socket.set_unicast_hops_v6(u32::from(options.ttl))?;
                if options.tos != 0 {
                    log::warn!("type of service {} is not applied to IPv6 requests", options.tos);
                }
            }
        }
        set_dont_fragment(&self.socket, self.family, options.dont_fragment())?;
        self.applied.set(Some(*options));
        Ok(())
    }

    /// Sends one echo request and writes the matching reply into `reply`.
    fn exchange(&self, request: &EchoRequest<'_>, reply: &mut [u8]) -> Result<u32, u32> {
        self.apply_options(&request.options).map_err(|e| {
            log::debug!("failed to apply IP options {:?}: {}", request.options, e);
            IP_BAD_OPTION
        })?;

        let sequence = self.sequence.get().wrapping_add(1);
        self.sequence.set(sequence);
        let is_ipv6 = self.family == AddressFamily::V6;
        let packet = IcmpPacket::new_echo_request(self.identifier, sequence, request.payload, is_ipv6);

        let target = match request.destination {
            IpAddr::V4(addr) => SocketAddr::V4(SocketAddrV4::new(addr, 0)),
            IpAddr::V6(addr) => SocketAddr::V6(SocketAddrV6::new(addr, 0, 0, request.scope_id)),
        };

        let start = Instant::now();
        let deadline = reply_deadline(start, request.timeout);
        self.socket
            .send_to(&packet.to_bytes(), &target.into())
            .map_err(|e| send_error_status(&e))?;
        log::debug!("sent echo request seq={} to {}", sequence, target);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(IP_REQ_TIMED_OUT);
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(|_| IP_GENERAL_FAILURE)?;

            let (data, source) = match recv(&self.socket) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(IP_REQ_TIMED_OUT);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("recv on ICMP socket failed: {}", e);
                    return Err(IP_GENERAL_FAILURE);
                }
            };

            let (icmp, ttl) = match self.family {
                AddressFamily::V4 => match strip_ipv4_header(&data) {
                    Some(split) => split,
                    None => continue,
                },
                AddressFamily::V6 => (&data[..], None),
            };
            let Ok(packet) = IcmpPacket::from_bytes(icmp) else {
                continue;
            };
            if !is_ipv6 && !packet.verify_checksum() {
                log::trace!("dropping echo reply with bad checksum");
                continue;
            }
            if !packet.is_echo_reply(is_ipv6) || packet.sequence != sequence {
                log::trace!(
                    "ignoring ICMP type={} seq={} (waiting for seq={})",
                    packet.icmp_type,
                    packet.sequence,
                    sequence
                );
                continue;
            }

            let round_trip_time = u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX);
            let record = self.record(source.unwrap_or(target), round_trip_time, packet.payload, ttl);
            let mut writer = RecordWriter::new(reply, self.family, 1);
            writer.push(&record).map_err(|kind| kind.code())?;
            return Ok(writer.count());
        }
    }

    fn record(&self, source: SocketAddr, round_trip_time: u32, payload: Vec<u8>, ttl: Option<u8>) -> EchoReply {
        match self.family {
            AddressFamily::V4 => EchoReply {
                source: SocketAddr::new(source.ip(), 0),
                status: IP_SUCCESS,
                round_trip_time,
                data: Some(payload),
                options: Some(OptionEcho {
                    ttl: ttl.unwrap_or(DEFAULT_REPLY_TTL),
                    ..OptionEcho::default()
                }),
            },
            AddressFamily::V6 => EchoReply {
                source,
                status: IP_SUCCESS,
                round_trip_time,
                data: None,
                options: None,
            },
        }
    }
}

fn recv(socket: &Socket) -> io::Result<(Vec<u8>, Option<SocketAddr>)> {
    let mut buffer = vec![MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];
    let (received, source) = socket.recv_from(&mut buffer)?;
    // recv_from initialised the first `received` bytes
    let data = buffer[..received]
        .iter()
        .map(|byte| unsafe { byte.assume_init() })
        .collect();
    Ok((data, source.as_socket()))
}

/// Deadline for the reply, with the timeout capped at what a `u32` of
/// milliseconds can express.
fn reply_deadline(start: Instant, timeout: Duration) -> Instant {
    let capped = timeout.min(Duration::from_millis(u64::from(u32::MAX)));
    start
        .checked_add(capped)
        .or_else(|| start.checked_add(Duration::from_secs(1)))
        .unwrap_or(start)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
fn setsockopt_int(socket: &Socket, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of_val(&value) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sets or clears the Don't Fragment bit on outgoing requests.
#[cfg(target_os = "linux")]
fn set_dont_fragment(socket: &Socket, family: AddressFamily, enabled: bool) -> io::Result<()> {
    match family {
        AddressFamily::V4 => {
            let mode = if enabled { libc::IP_PMTUDISC_DO } else { libc::IP_PMTUDISC_WANT };
            setsockopt_int(socket, libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, mode)
        }
        AddressFamily::V6 => {
            let mode = if enabled { libc::IPV6_PMTUDISC_DO } else { libc::IPV6_PMTUDISC_WANT };
            setsockopt_int(socket, libc::IPPROTO_IPV6, libc::IPV6_MTU_DISCOVER, mode)
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_dont_fragment(socket: &Socket, family: AddressFamily, enabled: bool) -> io::Result<()> {
    const IP_DONTFRAG: libc::c_int = 28;
    const IPV6_DONTFRAG: libc::c_int = 62;
    let value = libc::c_int::from(enabled);
    match family {
        AddressFamily::V4 => setsockopt_int(socket, libc::IPPROTO_IP, IP_DONTFRAG, value),
        AddressFamily::V6 => setsockopt_int(socket, libc::IPPROTO_IPV6, IPV6_DONTFRAG, value),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
fn set_dont_fragment(_socket: &Socket, _family: AddressFamily, enabled: bool) -> io::Result<()> {
    if enabled {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "don't fragment is not supported on this platform",
        ));
    }
    Ok(())
}

fn send_error_status(e: &io::Error) -> u32 {
    log::debug!("send_to failed: {}", e);
    match e.kind() {
        io::ErrorKind::NetworkUnreachable => IP_DEST_NET_UNREACHABLE,
        io::ErrorKind::HostUnreachable => IP_DEST_HOST_UNREACHABLE,
        _ => IP_GENERAL_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::Session;

    #[test]
    fn test_reply_deadline_never_overflows() {
        let start = Instant::now();
        assert_eq!(reply_deadline(start, Duration::from_millis(250)), start + Duration::from_millis(250));

        let deadline = reply_deadline(start, Duration::MAX);
        assert!(deadline > start);
        assert!(deadline <= start + Duration::from_millis(u64::from(u32::MAX)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dont_fragment_sets_pmtu_discovery() {
        fn mtu_discover(socket: &Socket) -> libc::c_int {
            let mut value: libc::c_int = -1;
            let mut len = std::mem::size_of_val(&value) as libc::socklen_t;
            let ret = unsafe {
                libc::getsockopt(
                    socket.as_raw_fd(),
                    libc::IPPROTO_IP,
                    libc::IP_MTU_DISCOVER,
                    &mut value as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };
            assert_eq!(ret, 0);
            value
        }

        // Plain UDP sockets take the same IP-level option without privileges
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        set_dont_fragment(&socket, AddressFamily::V4, true).unwrap();
        assert_eq!(mtu_discover(&socket), libc::IP_PMTUDISC_DO);
        set_dont_fragment(&socket, AddressFamily::V4, false).unwrap();
        assert_eq!(mtu_discover(&socket), libc::IP_PMTUDISC_WANT);
    }

    #[test]
    fn test_send_error_mapping() {
        let e = io::Error::from(io::ErrorKind::NetworkUnreachable);
        assert_eq!(send_error_status(&e), IP_DEST_NET_UNREACHABLE);
        let e = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(send_error_status(&e), IP_DEST_HOST_UNREACHABLE);
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(send_error_status(&e), IP_GENERAL_FAILURE);
    }

    #[test]
    fn test_dgram_socket_creation() {
        // ICMP datagram sockets may be disabled by ping_group_range
        match Session::open(crate::icmp::SystemTransport, AddressFamily::V4) {
            Ok(_) => println!("ICMP datagram socket creation successful"),
            Err(e) => println!("ICMP datagram socket creation failed: {}", e),
        }
    }

    #[test]
    fn test_loopback_ping() {
        if let Ok(mut session) = Session::open(DgramTransport, AddressFamily::V4) {
            let payload = [0x61u8; 32];
            let request = EchoRequest::new("127.0.0.1".parse().unwrap(), &payload, Duration::from_millis(1000));
            match session.send(&request, 1) {
                Ok(replies) => {
                    println!("Loopback ping successful: {:?}", replies);
                    for reply in replies.iter().filter(|r| r.is_success()) {
                        assert_eq!(reply.data.as_deref(), Some(&payload[..]));
                    }
                }
                Err(e) => println!("Loopback ping failed: {}", e),
            }
        }
    }
}
