use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

const ICMP_HEADER_SIZE: usize = 8;
const IPV4_TTL_OFFSET: usize = 8;

#[derive(Debug, Clone)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    pub fn new_echo_request(identifier: u16, sequence: u16, payload: &[u8], is_ipv6: bool) -> Self {
        let icmp_type = if is_ipv6 { ICMPV6_ECHO_REQUEST } else { ICMP_ECHO_REQUEST };

        let mut packet = Self {
            icmp_type,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload: payload.to_vec(),
        };

        // the kernel fills in the ICMPv6 checksum from the pseudo-header
        if !is_ipv6 {
            packet.calculate_checksum();
        }
        packet
    }

    pub fn from_bytes(data: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(data);
        let icmp_type = cursor.read_u8()?;
        let code = cursor.read_u8()?;
        let checksum = cursor.read_u16::<BigEndian>()?;
        let identifier = cursor.read_u16::<BigEndian>()?;
        let sequence = cursor.read_u16::<BigEndian>()?;

        let mut payload = Vec::new();
        cursor.read_to_end(&mut payload)?;

        Ok(Self {
            icmp_type,
            code,
            checksum,
            identifier,
            sequence,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        bytes.push(self.icmp_type);
        bytes.push(self.code);
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        bytes.extend_from_slice(&self.identifier.to_be_bytes());
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let bytes = self.to_bytes();
        self.checksum = compute_checksum(&bytes);
    }

    pub fn is_echo_reply(&self, is_ipv6: bool) -> bool {
        let expected_type = if is_ipv6 { ICMPV6_ECHO_REPLY } else { ICMP_ECHO_REPLY };
        self.icmp_type == expected_type && self.code == 0
    }

    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.to_bytes()) == 0
    }
}

/// Internet checksum over `data`.
pub fn compute_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Splits an IPv4 datagram into its ICMP message and the header's TTL.
///
/// Datagram ICMP sockets deliver the IP header on some platforms (macOS)
/// and not on others (Linux); a leading version nibble of 4 tells them apart.
pub fn strip_ipv4_header(data: &[u8]) -> Option<(&[u8], Option<u8>)> {
    match data.first() {
        Some(first) if first >> 4 == 4 => {
            let header_len = usize::from(first & 0x0f) * 4;
            if data.len() < header_len + ICMP_HEADER_SIZE {
                return None;
            }
            Some((&data[header_len..], Some(data[IPV4_TTL_OFFSET])))
        }
        _ if data.len() >= ICMP_HEADER_SIZE => Some((data, None)),
        _ => None,
    }
}
