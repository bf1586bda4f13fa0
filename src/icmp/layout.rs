//! Geometry of the reply records the ICMP transport packs into a reply buffer.
//!
//! The structs mirror `ICMP_ECHO_REPLY` and `ICMPV6_ECHO_REPLY` from
//! `ipexport.h` byte for byte. Pointer fields have the native pointer width.

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use std::ffi::c_void;
use std::mem::{offset_of, size_of};
use std::net::SocketAddr;

use crate::icmp::{AddressFamily, EchoReply, ErrorKind};

#[repr(C)]
#[derive(Debug)]
#[cfg_attr(not(windows), allow(dead_code))]
pub struct IpOptionInformation {
    pub ttl: u8,
    pub tos: u8,
    pub flags: u8,
    pub options_size: u8,
    pub options_data: *mut u8,
}

#[repr(C)]
#[allow(dead_code)]
pub struct IcmpEchoReply {
    address: u32,
    status: u32,
    round_trip_time: u32,
    data_size: u16,
    reserved: u16,
    data: *mut c_void,
    options: IpOptionInformation,
}

#[repr(C, packed)]
#[allow(dead_code)]
pub struct Ipv6AddressEx {
    sin6_port: u16,
    sin6_flowinfo: u32,
    sin6_addr: [u8; 16],
    sin6_scope_id: u32,
}

#[repr(C)]
#[allow(dead_code)]
pub struct Icmpv6EchoReply {
    address: Ipv6AddressEx,
    status: u32,
    round_trip_time: u32,
}

#[repr(C)]
#[allow(dead_code)]
pub struct IoStatusBlock {
    status: *mut c_void,
    information: usize,
}

pub const POINTER_SIZE: usize = size_of::<usize>();

/// Slack the transport requires for an ICMP error message per record.
pub const ICMP_ERROR_SLACK: usize = 8;

pub mod v4 {
    use super::*;

    pub const RECORD_SIZE: usize = size_of::<IcmpEchoReply>();
    pub const ADDRESS: usize = offset_of!(IcmpEchoReply, address);
    pub const STATUS: usize = offset_of!(IcmpEchoReply, status);
    pub const ROUND_TRIP_TIME: usize = offset_of!(IcmpEchoReply, round_trip_time);
    pub const DATA_SIZE: usize = offset_of!(IcmpEchoReply, data_size);
    pub const DATA: usize = offset_of!(IcmpEchoReply, data);
    const OPTIONS: usize = offset_of!(IcmpEchoReply, options);
    pub const TTL: usize = OPTIONS + offset_of!(IpOptionInformation, ttl);
    pub const TOS: usize = OPTIONS + offset_of!(IpOptionInformation, tos);
    pub const FLAGS: usize = OPTIONS + offset_of!(IpOptionInformation, flags);
    pub const OPTIONS_SIZE: usize = OPTIONS + offset_of!(IpOptionInformation, options_size);
    pub const OPTIONS_DATA: usize = OPTIONS + offset_of!(IpOptionInformation, options_data);
}

pub mod v6 {
    use super::*;

    pub const RECORD_SIZE: usize = size_of::<Icmpv6EchoReply>();
    const ADDRESS: usize = offset_of!(Icmpv6EchoReply, address);
    pub const PORT: usize = ADDRESS + offset_of!(Ipv6AddressEx, sin6_port);
    pub const FLOW_INFO: usize = ADDRESS + offset_of!(Ipv6AddressEx, sin6_flowinfo);
    pub const ADDR: usize = ADDRESS + offset_of!(Ipv6AddressEx, sin6_addr);
    pub const SCOPE_ID: usize = ADDRESS + offset_of!(Ipv6AddressEx, sin6_scope_id);
    pub const STATUS: usize = offset_of!(Icmpv6EchoReply, status);
    pub const ROUND_TRIP_TIME: usize = offset_of!(Icmpv6EchoReply, round_trip_time);
}

pub fn record_size(family: AddressFamily) -> usize {
    match family {
        AddressFamily::V4 => v4::RECORD_SIZE,
        AddressFamily::V6 => v6::RECORD_SIZE,
    }
}

/// Reply buffer size for `expected_count` replies to a payload of
/// `payload_len` bytes, or `None` on overflow.
pub fn reply_capacity(family: AddressFamily, payload_len: usize, expected_count: usize) -> Option<usize> {
    let per_record = match family {
        AddressFamily::V4 => v4::RECORD_SIZE + payload_len + ICMP_ERROR_SLACK,
        AddressFamily::V6 => {
            v6::RECORD_SIZE + payload_len + ICMP_ERROR_SLACK + size_of::<IoStatusBlock>()
        }
    };
    per_record.checked_mul(expected_count)
}

/// Packs reply records into a buffer the way the Windows transport does:
/// records first, variable-length data after the last reserved slot, with
/// absolute pointers into the buffer.
pub struct RecordWriter<'a> {
    buf: &'a mut [u8],
    family: AddressFamily,
    slots: usize,
    written: usize,
    data_end: usize,
}

impl<'a> RecordWriter<'a> {
    pub fn new(buf: &'a mut [u8], family: AddressFamily, slots: usize) -> Self {
        let data_end = slots.saturating_mul(record_size(family));
        Self {
            buf,
            family,
            slots,
            written: 0,
            data_end,
        }
    }

    pub fn count(&self) -> u32 {
        self.written as u32
    }

    pub fn push(&mut self, reply: &EchoReply) -> Result<(), ErrorKind> {
        let size = record_size(self.family);
        let offset = self.written * size;
        if self.written >= self.slots || offset + size > self.buf.len() {
            return Err(ErrorKind::BufferTooSmall);
        }
        match (self.family, reply.source) {
            (AddressFamily::V4, SocketAddr::V4(source)) => {
                let data = reply.data.as_deref().unwrap_or(&[]);
                let options = reply.options.clone().unwrap_or_default();
                let data_size = u16::try_from(data.len()).map_err(|_| ErrorKind::PacketTooBig)?;
                let options_size =
                    u8::try_from(options.data.len()).map_err(|_| ErrorKind::OptionTooBig)?;
                let data_ptr = self.append(data)?;
                let options_ptr = self.append(&options.data)?;

                let record = &mut self.buf[offset..offset + size];
                record[v4::ADDRESS..v4::ADDRESS + 4].copy_from_slice(&source.ip().octets());
                NativeEndian::write_u32(&mut record[v4::STATUS..], reply.status);
                NativeEndian::write_u32(&mut record[v4::ROUND_TRIP_TIME..], reply.round_trip_time);
                NativeEndian::write_u16(&mut record[v4::DATA_SIZE..], data_size);
                NativeEndian::write_uint(&mut record[v4::DATA..], data_ptr, POINTER_SIZE);
                record[v4::TTL] = options.ttl;
                record[v4::TOS] = options.tos;
                record[v4::FLAGS] = options.flags;
                record[v4::OPTIONS_SIZE] = options_size;
                NativeEndian::write_uint(&mut record[v4::OPTIONS_DATA..], options_ptr, POINTER_SIZE);
            }
            (AddressFamily::V6, SocketAddr::V6(source)) => {
                let record = &mut self.buf[offset..offset + size];
                BigEndian::write_u16(&mut record[v6::PORT..], source.port());
                BigEndian::write_u32(&mut record[v6::FLOW_INFO..], source.flowinfo());
                record[v6::ADDR..v6::ADDR + 16].copy_from_slice(&source.ip().octets());
                NativeEndian::write_u32(&mut record[v6::SCOPE_ID..], source.scope_id());
                NativeEndian::write_u32(&mut record[v6::STATUS..], reply.status);
                NativeEndian::write_u32(&mut record[v6::ROUND_TRIP_TIME..], reply.round_trip_time);
            }
            _ => return Err(ErrorKind::BadRequest),
        }
        self.written += 1;
        Ok(())
    }

    /// Copies `bytes` into the data area and returns their absolute address,
    /// or 0 for an empty slice.
    fn append(&mut self, bytes: &[u8]) -> Result<u64, ErrorKind> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let start = self.data_end;
        let end = start
            .checked_add(bytes.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or(ErrorKind::BufferTooSmall)?;
        self.buf[start..end].copy_from_slice(bytes);
        self.data_end = end;
        Ok(self.buf.as_ptr() as u64 + start as u64)
    }
}
