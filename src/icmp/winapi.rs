// Windows transport over the ICMP helper API in iphlpapi.dll.
// IcmpSendEcho/Icmp6SendEcho2 don't require raw socket privileges.

use std::ffi::c_void;
use std::io;
use std::net::IpAddr;
use std::ptr;

use crate::icmp::error::IP_GENERAL_FAILURE;
use crate::icmp::layout::IpOptionInformation;
use crate::icmp::{AddressFamily, EchoRequest, IcmpTransport, SendStatus};

type Handle = *mut c_void;

const INVALID_HANDLE_VALUE: Handle = -1isize as Handle;
const ERROR_IO_PENDING: u32 = 997;
const AF_INET6: u16 = 23;
const INFINITE: u32 = u32::MAX;
const WAIT_OBJECT_0: u32 = 0;

#[repr(C)]
struct SockaddrIn6 {
    sin6_family: u16,
    sin6_port: u16,
    sin6_flowinfo: u32,
    sin6_addr: [u8; 16],
    sin6_scope_id: u32,
}

impl SockaddrIn6 {
    fn new(addr: [u8; 16], scope_id: u32) -> Self {
        Self {
            sin6_family: AF_INET6,
            sin6_port: 0,
            sin6_flowinfo: 0,
            sin6_addr: addr,
            sin6_scope_id: scope_id,
        }
    }
}

#[link(name = "iphlpapi")]
unsafe extern "system" {
    fn IcmpCreateFile() -> Handle;
    fn Icmp6CreateFile() -> Handle;
    fn IcmpCloseHandle(icmp_handle: Handle) -> i32;
    fn IcmpSendEcho(
        icmp_handle: Handle,
        destination_address: u32,
        request_data: *const c_void,
        request_size: u16,
        request_options: *const IpOptionInformation,
        reply_buffer: *mut c_void,
        reply_size: u32,
        timeout: u32,
    ) -> u32;
    fn Icmp6SendEcho2(
        icmp_handle: Handle,
        event: Handle,
        apc_routine: *const c_void,
        apc_context: *const c_void,
        source_address: *const SockaddrIn6,
        destination_address: *const SockaddrIn6,
        request_data: *const c_void,
        request_size: u16,
        request_options: *const IpOptionInformation,
        reply_buffer: *mut c_void,
        reply_size: u32,
        timeout: u32,
    ) -> u32;
    fn Icmp6ParseReplies(reply_buffer: *mut c_void, reply_size: u32) -> u32;
}

#[link(name = "kernel32")]
unsafe extern "system" {
    fn CreateEventW(attributes: *const c_void, manual_reset: i32, initial_state: i32, name: *const u16) -> Handle;
    fn WaitForSingleObject(handle: Handle, milliseconds: u32) -> u32;
    fn CloseHandle(handle: Handle) -> i32;
}

fn last_error() -> u32 {
    io::Error::last_os_error()
        .raw_os_error()
        .map(|code| code as u32)
        .unwrap_or(IP_GENERAL_FAILURE)
}

fn is_valid(handle: Handle) -> bool {
    !handle.is_null() && handle != INVALID_HANDLE_VALUE
}

pub struct WinApiTransport;

pub struct WinApiHandle {
    icmp: Handle,
    /// Completion event for IPv6 requests; null for IPv4.
    event: Handle,
}

impl IcmpTransport for WinApiTransport {
    type Handle = WinApiHandle;

    fn open(&self, family: AddressFamily) -> Result<WinApiHandle, u32> {
        let icmp = unsafe {
            match family {
                AddressFamily::V4 => IcmpCreateFile(),
                AddressFamily::V6 => Icmp6CreateFile(),
            }
        };
        if !is_valid(icmp) {
            return Err(last_error());
        }

        let event = match family {
            AddressFamily::V4 => ptr::null_mut(),
            AddressFamily::V6 => {
                let event = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
                if event.is_null() {
                    let code = last_error();
                    unsafe {
                        IcmpCloseHandle(icmp);
                    }
                    return Err(code);
                }
                event
            }
        };

        Ok(WinApiHandle { icmp, event })
    }

    fn close(&self, handle: WinApiHandle) -> Result<(), u32> {
        if !handle.event.is_null() && unsafe { CloseHandle(handle.event) } == 0 {
            log::warn!("CloseHandle on ICMP event failed: {}", last_error());
        }
        if unsafe { IcmpCloseHandle(handle.icmp) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn send_echo(&self, handle: &WinApiHandle, request: &EchoRequest<'_>, reply: &mut [u8]) -> SendStatus {
        let options = IpOptionInformation {
            ttl: request.options.ttl,
            tos: request.options.tos,
            flags: request.options.flags,
            options_size: 0,
            options_data: ptr::null_mut(),
        };
        // the session validates both sizes before calling in
        let request_size = request.payload.len() as u16;
        let reply_size = reply.len() as u32;

        let result = match request.destination {
            IpAddr::V4(addr) => unsafe {
                IcmpSendEcho(
                    handle.icmp,
                    u32::from_ne_bytes(addr.octets()),
                    request.payload.as_ptr().cast(),
                    request_size,
                    &options,
                    reply.as_mut_ptr().cast(),
                    reply_size,
                    request.timeout_ms(),
                )
            },
            IpAddr::V6(addr) => {
                let source = SockaddrIn6::new([0; 16], 0);
                let destination = SockaddrIn6::new(addr.octets(), request.scope_id);
                unsafe {
                    Icmp6SendEcho2(
                        handle.icmp,
                        handle.event,
                        ptr::null(),
                        ptr::null(),
                        &source,
                        &destination,
                        request.payload.as_ptr().cast(),
                        request_size,
                        &options,
                        reply.as_mut_ptr().cast(),
                        reply_size,
                        request.timeout_ms(),
                    )
                }
            }
        };

        if result != 0 {
            return SendStatus::Replies(result);
        }
        match last_error() {
            ERROR_IO_PENDING => SendStatus::Pending,
            code => SendStatus::Failed(code),
        }
    }

    fn wait(&self, handle: &WinApiHandle) -> Result<(), u32> {
        if handle.event.is_null() {
            return Ok(());
        }
        // The driver completes the request once its own timeout elapses, and
        // the reply buffer must stay alive until it does.
        match unsafe { WaitForSingleObject(handle.event, INFINITE) } {
            WAIT_OBJECT_0 => Ok(()),
            _ => Err(last_error()),
        }
    }

    fn parse_replies(&self, _handle: &WinApiHandle, reply: &mut [u8]) -> Result<u32, u32> {
        let count = unsafe { Icmp6ParseReplies(reply.as_mut_ptr().cast(), reply.len() as u32) };
        if count == 0 {
            return Err(last_error());
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::Session;
    use std::time::Duration;

    #[test]
    fn test_winapi_availability() {
        for family in [AddressFamily::V4, AddressFamily::V6] {
            let available = Session::open(WinApiTransport, family).is_ok();
            println!("Windows ICMP API available for {}: {}", family, available);
        }
    }

    #[test]
    fn test_winapi_ping() {
        let payload = [0x61u8; 32];
        for target in ["127.0.0.1", "::1"] {
            let destination: IpAddr = target.parse().unwrap();
            if let Ok(mut session) = Session::open(WinApiTransport, AddressFamily::of(&destination)) {
                let request = EchoRequest::new(destination, &payload, Duration::from_millis(1000));
                match session.send(&request, 10) {
                    Ok(replies) => println!("WinAPI ping to {} successful: {:?}", target, replies),
                    Err(e) => println!("WinAPI ping to {} failed: {}", target, e),
                }
            }
        }
    }
}
