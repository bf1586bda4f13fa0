//! Turns a packed reply buffer into `EchoReply` values.
//!
//! Record pointers are never dereferenced: they are translated into offsets
//! against the buffer's own base address and bounds-checked.

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::icmp::error::DecodeError;
use crate::icmp::layout::{self, v4, v6, POINTER_SIZE};
use crate::icmp::{AddressFamily, EchoReply, OptionEcho};

pub fn decode(family: AddressFamily, buf: &[u8], count: usize) -> Result<Vec<EchoReply>, DecodeError> {
    let size = layout::record_size(family);
    let needed = count.checked_mul(size).unwrap_or(usize::MAX);
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: buf.len(),
        });
    }

    let replies = buf[..needed]
        .chunks_exact(size)
        .map(|record| match family {
            AddressFamily::V4 => decode_v4(buf, record),
            AddressFamily::V6 => Ok(decode_v6(record)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::trace!("decoded {} {} reply record(s)", replies.len(), family);
    Ok(replies)
}

fn decode_v4(buf: &[u8], record: &[u8]) -> Result<EchoReply, DecodeError> {
    let mut octets = [0u8; 4];
    octets.copy_from_slice(&record[v4::ADDRESS..v4::ADDRESS + 4]);

    let data_size = NativeEndian::read_u16(&record[v4::DATA_SIZE..]) as usize;
    let data_ptr = NativeEndian::read_uint(&record[v4::DATA..], POINTER_SIZE);
    let data = resolve(buf, "data", data_ptr, data_size)?;

    let options_size = record[v4::OPTIONS_SIZE] as usize;
    let options_ptr = NativeEndian::read_uint(&record[v4::OPTIONS_DATA..], POINTER_SIZE);
    let options_data = resolve(buf, "options", options_ptr, options_size)?;

    Ok(EchoReply {
        source: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), 0)),
        status: NativeEndian::read_u32(&record[v4::STATUS..]),
        round_trip_time: NativeEndian::read_u32(&record[v4::ROUND_TRIP_TIME..]),
        data: Some(data.to_vec()),
        options: Some(OptionEcho {
            ttl: record[v4::TTL],
            tos: record[v4::TOS],
            flags: record[v4::FLAGS],
            data: options_data.to_vec(),
        }),
    })
}

fn decode_v6(record: &[u8]) -> EchoReply {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&record[v6::ADDR..v6::ADDR + 16]);
    let source = SocketAddrV6::new(
        Ipv6Addr::from(octets),
        BigEndian::read_u16(&record[v6::PORT..]),
        BigEndian::read_u32(&record[v6::FLOW_INFO..]),
        NativeEndian::read_u32(&record[v6::SCOPE_ID..]),
    );

    EchoReply {
        source: SocketAddr::V6(source),
        status: NativeEndian::read_u32(&record[v6::STATUS..]),
        round_trip_time: NativeEndian::read_u32(&record[v6::ROUND_TRIP_TIME..]),
        data: None,
        options: None,
    }
}

/// Maps `len` bytes at absolute `address` onto a subslice of `buf`.
fn resolve<'b>(buf: &'b [u8], field: &'static str, address: u64, len: usize) -> Result<&'b [u8], DecodeError> {
    if len == 0 {
        return Ok(&[]);
    }
    let out_of_bounds = || DecodeError::PointerOutOfBounds { field, address, len };

    let start = address
        .checked_sub(buf.as_ptr() as u64)
        .and_then(|offset| usize::try_from(offset).ok())
        .ok_or_else(out_of_bounds)?;
    let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
    buf.get(start..end).ok_or_else(out_of_bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::layout::RecordWriter;

    fn v4_reply(source: &str, status: u32, rtt: u32, data: &[u8]) -> EchoReply {
        EchoReply {
            source: format!("{}:0", source).parse().unwrap(),
            status,
            round_trip_time: rtt,
            data: Some(data.to_vec()),
            options: Some(OptionEcho {
                ttl: 64,
                tos: 0,
                flags: 0,
                data: Vec::new(),
            }),
        }
    }

    fn v6_reply(source: &str, status: u32, rtt: u32) -> EchoReply {
        EchoReply {
            source: SocketAddr::V6(SocketAddrV6::new(source.parse().unwrap(), 0, 0, 0)),
            status,
            round_trip_time: rtt,
            data: None,
            options: None,
        }
    }

    fn pack(family: AddressFamily, capacity: usize, replies: &[EchoReply]) -> (Vec<u8>, u32) {
        let mut buf = vec![0u8; capacity];
        let mut writer = RecordWriter::new(&mut buf, family, replies.len());
        for reply in replies {
            writer.push(reply).unwrap();
        }
        let count = writer.count();
        (buf, count)
    }

    #[test]
    fn test_zero_records_is_empty() {
        assert!(decode(AddressFamily::V4, &[], 0).unwrap().is_empty());
        assert!(decode(AddressFamily::V6, &[0u8; 16], 0).unwrap().is_empty());
    }

    #[test]
    fn test_exact_size_buffer_yields_records_in_order() {
        for n in 0..5usize {
            let replies: Vec<_> = (0..n)
                .map(|i| v4_reply(&format!("10.0.0.{}", i + 1), 0, i as u32, &[]))
                .collect();
            let (buf, count) = pack(AddressFamily::V4, n * v4::RECORD_SIZE, &replies);
            assert_eq!(buf.len(), n * v4::RECORD_SIZE);

            let decoded = decode(AddressFamily::V4, &buf, count as usize).unwrap();
            assert_eq!(decoded.len(), n);
            for (i, reply) in decoded.iter().enumerate() {
                assert_eq!(reply.source, format!("10.0.0.{}:0", i + 1).parse().unwrap());
                assert_eq!(reply.round_trip_time, i as u32);
            }
        }

        let replies: Vec<_> = (0..3)
            .map(|i| v6_reply(&format!("2001:db8::{}", i + 1), 0, 10 + i))
            .collect();
        let (buf, count) = pack(AddressFamily::V6, 3 * v6::RECORD_SIZE, &replies);
        assert_eq!(decode(AddressFamily::V6, &buf, count as usize).unwrap(), replies);
    }

    #[test]
    fn test_undersized_buffer_is_rejected() {
        let replies = vec![v4_reply("10.0.0.1", 0, 1, &[]), v4_reply("10.0.0.2", 0, 2, &[])];
        let (buf, _) = pack(AddressFamily::V4, 2 * v4::RECORD_SIZE, &replies);

        let err = decode(AddressFamily::V4, &buf[..2 * v4::RECORD_SIZE - 1], 2).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                needed: 2 * v4::RECORD_SIZE,
                available: 2 * v4::RECORD_SIZE - 1
            }
        );
        assert!(decode(AddressFamily::V6, &[0u8; 35], 1).is_err());
        assert!(decode(AddressFamily::V4, &buf, usize::MAX).is_err());
    }

    #[test]
    fn test_v4_payload_and_options_copied_exactly() {
        let payload: Vec<u8> = (0..32).collect();
        let mut reply = v4_reply("192.168.1.1", 0, 7, &payload);
        reply.options = Some(OptionEcho {
            ttl: 117,
            tos: 4,
            flags: 2,
            data: vec![0x01, 0x01, 0x00, 0x00],
        });
        let (buf, count) = pack(AddressFamily::V4, 128, &[reply.clone()]);

        let decoded = decode(AddressFamily::V4, &buf, count as usize).unwrap();
        assert_eq!(decoded, vec![reply]);
        assert_eq!(decoded[0].data.as_deref(), Some(&payload[..]));
        assert_eq!(decoded[0].ttl(), Some(117));
    }

    #[test]
    fn test_v4_pointer_outside_buffer_is_rejected() {
        let reply = v4_reply("192.168.1.1", 0, 7, b"abcdefgh");
        let (buf, count) = pack(AddressFamily::V4, 64, &[reply]);

        // pointers in a copy still address the original allocation
        let copy = buf.clone();
        let err = decode(AddressFamily::V4, &copy, count as usize).unwrap_err();
        assert!(matches!(err, DecodeError::PointerOutOfBounds { field: "data", .. }));

        // declared length running past the end of the buffer
        let mut buf = buf;
        NativeEndian::write_u16(&mut buf[v4::DATA_SIZE..], 64);
        let err = decode(AddressFamily::V4, &buf, count as usize).unwrap_err();
        assert!(matches!(err, DecodeError::PointerOutOfBounds { len: 64, .. }));
    }

    #[test]
    fn test_v6_record_fields() {
        let source = SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0x12345, 7);
        let mut buf = vec![0u8; v6::RECORD_SIZE];
        buf[v6::FLOW_INFO..v6::FLOW_INFO + 4].copy_from_slice(&0x12345u32.to_be_bytes());
        buf[v6::ADDR..v6::ADDR + 16].copy_from_slice(&source.ip().octets());
        NativeEndian::write_u32(&mut buf[v6::SCOPE_ID..], 7);
        NativeEndian::write_u32(&mut buf[v6::STATUS..], 11003);
        NativeEndian::write_u32(&mut buf[v6::ROUND_TRIP_TIME..], 3);

        let decoded = decode(AddressFamily::V6, &buf, 1).unwrap();
        assert_eq!(decoded[0].source, SocketAddr::V6(source));
        assert_eq!(decoded[0].status, 11003);
        assert_eq!(decoded[0].round_trip_time, 3);
        assert!(decoded[0].data.is_none());
        assert!(decoded[0].options.is_none());
        assert_eq!(
            decoded[0].error_kind(),
            Some(crate::icmp::ErrorKind::DestinationHostUnreachable)
        );
    }

    #[test]
    fn test_decode_does_not_mutate_buffer() {
        let (buf, count) = pack(AddressFamily::V4, 128, &[v4_reply("10.1.1.1", 0, 1, b"ping")]);
        let before = buf.clone();
        decode(AddressFamily::V4, &buf, count as usize).unwrap();
        assert_eq!(buf, before);
    }
}
