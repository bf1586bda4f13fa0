use crate::icmp::decode::decode;
use crate::icmp::layout::reply_capacity;
use crate::icmp::{AddressFamily, EchoReply, EchoRequest, IcmpError, MAX_PAYLOAD_SIZE};

/// Result of submitting one echo request to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The call completed and reported this many records.
    Replies(u32),
    /// The request is in flight; completion must be awaited.
    Pending,
    /// The call failed with this status code.
    Failed(u32),
}

/// Access to a native ICMP facility.
///
/// Failure codes are raw transport status/OS error codes; the session maps
/// them onto the error taxonomy.
pub trait IcmpTransport {
    type Handle;

    fn open(&self, family: AddressFamily) -> Result<Self::Handle, u32>;

    /// Releases a handle. Takes ownership so a handle cannot be released twice.
    fn close(&self, handle: Self::Handle) -> Result<(), u32>;

    /// Submits `request` and fills `reply` with packed records.
    fn send_echo(&self, handle: &Self::Handle, request: &EchoRequest<'_>, reply: &mut [u8]) -> SendStatus;

    /// Blocks until a `Pending` request has completed.
    fn wait(&self, handle: &Self::Handle) -> Result<(), u32>;

    /// Post-processes an IPv6 reply buffer and returns its record count.
    fn parse_replies(&self, handle: &Self::Handle, reply: &mut [u8]) -> Result<u32, u32>;
}

/// An open ICMP handle for one address family.
///
/// The handle is released by [`Session::close`] or, failing that, on drop.
pub struct Session<T: IcmpTransport> {
    transport: T,
    family: AddressFamily,
    handle: Option<T::Handle>,
}

impl<T: IcmpTransport> Session<T> {
    pub fn open(transport: T, family: AddressFamily) -> Result<Self, IcmpError> {
        let handle = transport
            .open(family)
            .map_err(|code| IcmpError::TransportUnavailable { code })?;
        log::debug!("opened {} ICMP session", family);
        Ok(Self {
            transport,
            family,
            handle: Some(handle),
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Closing an already closed session does nothing.
    pub fn close(&mut self) -> Result<(), IcmpError> {
        match self.handle.take() {
            Some(handle) => {
                log::debug!("closing {} ICMP session", self.family);
                self.transport
                    .close(handle)
                    .map_err(IcmpError::from_status)
            }
            None => Ok(()),
        }
    }

    /// Sends one echo request and returns every reply record the transport
    /// reported for it. `expected_count` sizes the reply buffer.
    pub fn send(&mut self, request: &EchoRequest<'_>, expected_count: usize) -> Result<Vec<EchoReply>, IcmpError> {
        let handle = self.handle.as_ref().ok_or(IcmpError::SessionClosed)?;
        validate(self.family, request, expected_count)?;

        let capacity = reply_capacity(self.family, request.payload.len(), expected_count)
            .filter(|c| u32::try_from(*c).is_ok())
            .ok_or_else(|| IcmpError::InvalidRequest(format!("expected count {} is too large", expected_count)))?;
        let mut buffer = vec![0u8; capacity];

        log::debug!(
            "sending echo to {} ({} payload bytes, {} byte reply buffer, timeout {}ms)",
            request.destination,
            request.payload.len(),
            capacity,
            request.timeout_ms()
        );

        let completed = match self.transport.send_echo(handle, request, &mut buffer) {
            SendStatus::Replies(count) => Some(count),
            SendStatus::Pending => {
                log::debug!("echo to {} pending, waiting for completion", request.destination);
                self.transport.wait(handle).map_err(IcmpError::from_status)?;
                None
            }
            SendStatus::Failed(code) => return Err(IcmpError::from_status(code)),
        };

        let count = match (self.family, completed) {
            (AddressFamily::V4, Some(count)) => count,
            (AddressFamily::V4, None) | (AddressFamily::V6, _) => self
                .transport
                .parse_replies(handle, &mut buffer)
                .map_err(IcmpError::from_status)?,
        };

        let replies = decode(self.family, &buffer, count as usize)?;
        log::debug!("received {} reply record(s) from {}", replies.len(), request.destination);
        Ok(replies)
    }
}

impl<T: IcmpTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to release ICMP handle: {}", e);
        }
    }
}

fn validate(family: AddressFamily, request: &EchoRequest<'_>, expected_count: usize) -> Result<(), IcmpError> {
    if request.family() != family {
        return Err(IcmpError::InvalidRequest(format!(
            "{} destination {} on an {} session",
            request.family(),
            request.destination,
            family
        )));
    }
    if request.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(IcmpError::InvalidRequest(format!(
            "payload of {} bytes exceeds {}",
            request.payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    if request.timeout_ms() == 0 {
        return Err(IcmpError::InvalidRequest("timeout must be at least 1ms".to_string()));
    }
    if expected_count == 0 {
        return Err(IcmpError::InvalidRequest("expected count must be positive".to_string()));
    }
    Ok(())
}
