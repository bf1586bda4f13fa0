use std::fmt;

/// Base of the IP status codes reported by the ICMP transport.
pub const IP_STATUS_BASE: u32 = 11000;
pub const IP_SUCCESS: u32 = 0;
pub const IP_BUF_TOO_SMALL: u32 = IP_STATUS_BASE + 1;
pub const IP_DEST_NET_UNREACHABLE: u32 = IP_STATUS_BASE + 2;
pub const IP_DEST_HOST_UNREACHABLE: u32 = IP_STATUS_BASE + 3;
pub const IP_DEST_PROT_UNREACHABLE: u32 = IP_STATUS_BASE + 4;
pub const IP_DEST_PORT_UNREACHABLE: u32 = IP_STATUS_BASE + 5;
pub const IP_NO_RESOURCES: u32 = IP_STATUS_BASE + 6;
pub const IP_BAD_OPTION: u32 = IP_STATUS_BASE + 7;
pub const IP_HW_ERROR: u32 = IP_STATUS_BASE + 8;
pub const IP_PACKET_TOO_BIG: u32 = IP_STATUS_BASE + 9;
pub const IP_REQ_TIMED_OUT: u32 = IP_STATUS_BASE + 10;
pub const IP_BAD_REQ: u32 = IP_STATUS_BASE + 11;
pub const IP_BAD_ROUTE: u32 = IP_STATUS_BASE + 12;
pub const IP_TTL_EXPIRED_TRANSIT: u32 = IP_STATUS_BASE + 13;
pub const IP_TTL_EXPIRED_REASSEM: u32 = IP_STATUS_BASE + 14;
pub const IP_PARAM_PROBLEM: u32 = IP_STATUS_BASE + 15;
pub const IP_SOURCE_QUENCH: u32 = IP_STATUS_BASE + 16;
pub const IP_OPTION_TOO_BIG: u32 = IP_STATUS_BASE + 17;
pub const IP_BAD_DESTINATION: u32 = IP_STATUS_BASE + 18;
pub const IP_GENERAL_FAILURE: u32 = IP_STATUS_BASE + 50;

/// Failure kind named by a transport status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BufferTooSmall,
    DestinationNetUnreachable,
    DestinationHostUnreachable,
    DestinationProtocolUnreachable,
    DestinationPortUnreachable,
    NoResources,
    BadOption,
    HardwareError,
    PacketTooBig,
    RequestTimedOut,
    BadRequest,
    BadRoute,
    TtlExpiredInTransit,
    TtlExpiredOnReassembly,
    ParameterProblem,
    SourceQuench,
    OptionTooBig,
    BadDestination,
    GeneralFailure,
    /// A code outside the status table, carried unchanged.
    TransportError(u32),
}

const STATUS_TABLE: [(u32, ErrorKind); 19] = [
    (IP_BUF_TOO_SMALL, ErrorKind::BufferTooSmall),
    (IP_DEST_NET_UNREACHABLE, ErrorKind::DestinationNetUnreachable),
    (IP_DEST_HOST_UNREACHABLE, ErrorKind::DestinationHostUnreachable),
    (IP_DEST_PROT_UNREACHABLE, ErrorKind::DestinationProtocolUnreachable),
    (IP_DEST_PORT_UNREACHABLE, ErrorKind::DestinationPortUnreachable),
    (IP_NO_RESOURCES, ErrorKind::NoResources),
    (IP_BAD_OPTION, ErrorKind::BadOption),
    (IP_HW_ERROR, ErrorKind::HardwareError),
    (IP_PACKET_TOO_BIG, ErrorKind::PacketTooBig),
    (IP_REQ_TIMED_OUT, ErrorKind::RequestTimedOut),
    (IP_BAD_REQ, ErrorKind::BadRequest),
    (IP_BAD_ROUTE, ErrorKind::BadRoute),
    (IP_TTL_EXPIRED_TRANSIT, ErrorKind::TtlExpiredInTransit),
    (IP_TTL_EXPIRED_REASSEM, ErrorKind::TtlExpiredOnReassembly),
    (IP_PARAM_PROBLEM, ErrorKind::ParameterProblem),
    (IP_SOURCE_QUENCH, ErrorKind::SourceQuench),
    (IP_OPTION_TOO_BIG, ErrorKind::OptionTooBig),
    (IP_BAD_DESTINATION, ErrorKind::BadDestination),
    (IP_GENERAL_FAILURE, ErrorKind::GeneralFailure),
];

impl ErrorKind {
    pub fn classify(code: u32) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::TransportError(code))
    }

    /// Status code this kind was classified from.
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::TransportError(code) => *code,
            kind => STATUS_TABLE
                .iter()
                .find(|(_, known)| known == kind)
                .map(|(code, _)| *code)
                .unwrap_or(IP_GENERAL_FAILURE),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::RequestTimedOut)
    }

    fn message(&self) -> &'static str {
        match self {
            ErrorKind::BufferTooSmall => "Buffer too small",
            ErrorKind::DestinationNetUnreachable => "Destination net unreachable",
            ErrorKind::DestinationHostUnreachable => "Destination host unreachable",
            ErrorKind::DestinationProtocolUnreachable => "Destination protocol unreachable",
            ErrorKind::DestinationPortUnreachable => "Destination port unreachable",
            ErrorKind::NoResources => "No resources",
            ErrorKind::BadOption => "Bad option specified",
            ErrorKind::HardwareError => "Hardware error",
            ErrorKind::PacketTooBig => "Packet needs to be fragmented but DF set",
            ErrorKind::RequestTimedOut => "Request timed out",
            ErrorKind::BadRequest => "Bad request",
            ErrorKind::BadRoute => "Bad route specified",
            ErrorKind::TtlExpiredInTransit => "TTL expired in transit",
            ErrorKind::TtlExpiredOnReassembly => "TTL expired during reassembly",
            ErrorKind::ParameterProblem => "Parameter problem",
            ErrorKind::SourceQuench => "Source quench received",
            ErrorKind::OptionTooBig => "Option too big",
            ErrorKind::BadDestination => "Bad destination",
            ErrorKind::GeneralFailure => "General failure",
            ErrorKind::TransportError(_) => "Transport error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransportError(code) => write!(f, "Transport error (code {})", code),
            kind => write!(f, "{}", kind.message()),
        }
    }
}

/// Reply buffer could not be decoded into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { needed: usize, available: usize },
    PointerOutOfBounds { field: &'static str, address: u64, len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => write!(
                f,
                "reply buffer too short: need {} bytes, have {}",
                needed, available
            ),
            DecodeError::PointerOutOfBounds { field, address, len } => write!(
                f,
                "{} pointer {:#x} (+{} bytes) lies outside the reply buffer",
                field, address, len
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum IcmpError {
    /// The platform refused to open an ICMP handle.
    TransportUnavailable { code: u32 },
    /// The transport reported a status code for the request.
    Status(ErrorKind),
    Decode(DecodeError),
    InvalidRequest(String),
    SessionClosed,
}

impl IcmpError {
    pub fn from_status(code: u32) -> Self {
        IcmpError::Status(ErrorKind::classify(code))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, IcmpError::Status(kind) if kind.is_timeout())
    }

    /// Failures that mean the run cannot meaningfully continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IcmpError::Status(_))
    }

    pub fn code(&self) -> Option<u32> {
        match self {
            IcmpError::TransportUnavailable { code } => Some(*code),
            IcmpError::Status(kind) => Some(kind.code()),
            _ => None,
        }
    }
}

impl fmt::Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpError::TransportUnavailable { code } => {
                write!(f, "ICMP transport unavailable (code {})", code)
            }
            IcmpError::Status(ErrorKind::TransportError(code)) => {
                write!(f, "Transport error (code {})", code)
            }
            IcmpError::Status(kind) => write!(f, "{} (code {})", kind, kind.code()),
            IcmpError::Decode(e) => write!(f, "Malformed reply buffer: {}", e),
            IcmpError::InvalidRequest(msg) => write!(f, "Invalid echo request: {}", msg),
            IcmpError::SessionClosed => write!(f, "ICMP session is closed"),
        }
    }
}

impl std::error::Error for IcmpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IcmpError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for IcmpError {
    fn from(e: DecodeError) -> Self {
        IcmpError::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(ErrorKind::classify(11001), ErrorKind::BufferTooSmall);
        assert_eq!(ErrorKind::classify(11002), ErrorKind::DestinationNetUnreachable);
        assert_eq!(ErrorKind::classify(11003), ErrorKind::DestinationHostUnreachable);
        assert_eq!(ErrorKind::classify(11004), ErrorKind::DestinationProtocolUnreachable);
        assert_eq!(ErrorKind::classify(11005), ErrorKind::DestinationPortUnreachable);
        assert_eq!(ErrorKind::classify(11010), ErrorKind::RequestTimedOut);
        assert_eq!(ErrorKind::classify(11013), ErrorKind::TtlExpiredInTransit);
        assert_eq!(ErrorKind::classify(11014), ErrorKind::TtlExpiredOnReassembly);
        assert_eq!(ErrorKind::classify(11018), ErrorKind::BadDestination);
        assert_eq!(ErrorKind::classify(11050), ErrorKind::GeneralFailure);
    }

    #[test]
    fn test_classify_unknown_codes_pass_through() {
        for code in [0, 1, 997, 11000, 11019, 11049, 11051, u32::MAX] {
            assert_eq!(ErrorKind::classify(code), ErrorKind::TransportError(code));
        }
    }

    #[test]
    fn test_code_inverts_classify() {
        for (code, kind) in STATUS_TABLE {
            assert_eq!(ErrorKind::classify(code), kind);
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ErrorKind::TransportError(42).code(), 42);
    }

    #[test]
    fn test_timeout_is_distinct_and_not_fatal() {
        let timeout = IcmpError::from_status(IP_REQ_TIMED_OUT);
        assert!(timeout.is_timeout());
        assert!(!timeout.is_fatal());

        let unreachable = IcmpError::from_status(IP_DEST_HOST_UNREACHABLE);
        assert!(!unreachable.is_timeout());
        assert!(!unreachable.is_fatal());

        assert!(IcmpError::TransportUnavailable { code: 5 }.is_fatal());
        assert!(IcmpError::SessionClosed.is_fatal());
        assert!(
            IcmpError::Decode(DecodeError::Truncated { needed: 40, available: 8 }).is_fatal()
        );
    }

    #[test]
    fn test_error_formatting() {
        let e = IcmpError::from_status(IP_DEST_HOST_UNREACHABLE);
        assert_eq!(e.to_string(), "Destination host unreachable (code 11003)");
        assert_eq!(e.code(), Some(11003));

        let e = IcmpError::from_status(1234);
        assert_eq!(e.to_string(), "Transport error (code 1234)");

        let e = IcmpError::TransportUnavailable { code: 5 };
        assert!(e.to_string().contains("code 5"));
    }
}
