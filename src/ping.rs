use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::icmp::{EchoReply, EchoRequest, ErrorKind, IcmpError, IcmpTransport, IpOptions, Session};
use crate::stats::RunStatistics;

/// Everything that stays fixed across the iterations of a run.
#[derive(Debug, Clone)]
pub struct PingPlan {
    pub destination: IpAddr,
    pub scope_id: u32,
    /// Sent unchanged every iteration so echoes can be compared.
    pub payload: Vec<u8>,
    pub timeout: Duration,
    pub options: IpOptions,
    /// `None` pings until interrupted.
    pub count: Option<u32>,
    pub interval: Duration,
    pub expected_count: usize,
}

impl PingPlan {
    fn request(&self) -> EchoRequest<'_> {
        EchoRequest {
            scope_id: self.scope_id,
            options: self.options,
            ..EchoRequest::new(self.destination, &self.payload, self.timeout)
        }
    }
}

/// Per-request outcome handed to the caller as it happens.
#[derive(Debug)]
pub enum ProbeEvent<'a> {
    Reply { reply: &'a EchoReply, corrupted: bool },
    /// A record carrying a non-zero status, e.g. from a router on the path.
    ErrorReply { reply: &'a EchoReply, kind: ErrorKind },
    TimedOut,
    /// A per-request transport failure other than a timeout.
    Failed(&'a IcmpError),
}

#[derive(Debug)]
pub struct RunOutcome {
    pub statistics: RunStatistics,
    /// Structural failure that ended the run early.
    pub error: Option<IcmpError>,
    pub interrupted: bool,
}

/// Pings `plan.destination` through `session` until the count is reached,
/// a structural failure occurs, or `shutdown` fires. The session is closed
/// before this returns on every path.
pub async fn run<T, F>(
    mut session: Session<T>,
    plan: &PingPlan,
    mut shutdown: oneshot::Receiver<()>,
    mut on_event: F,
) -> RunOutcome
where
    T: IcmpTransport,
    F: FnMut(ProbeEvent<'_>),
{
    let mut stats = RunStatistics::new();
    let mut error = None;
    let mut interrupted = false;
    let mut listening = true;
    let mut iteration: u32 = 0;
    log::debug!("pinging {} over an {} session", plan.destination, session.family());

    'run: loop {
        if listening {
            match shutdown.try_recv() {
                Ok(()) => {
                    interrupted = true;
                    break;
                }
                Err(TryRecvError::Closed) => listening = false,
                Err(TryRecvError::Empty) => {}
            }
        }

        let request = plan.request();
        let result = tokio::task::block_in_place(|| session.send(&request, plan.expected_count));
        iteration = iteration.saturating_add(1);

        match result {
            Ok(replies) => {
                stats.record_sent();
                if replies.is_empty() {
                    stats.record_lost();
                    on_event(ProbeEvent::TimedOut);
                }
                for reply in &replies {
                    match reply.error_kind() {
                        None => {
                            stats.record_received(reply.round_trip_time);
                            // IPv6 replies carry no payload to compare
                            let corrupted = reply
                                .data
                                .as_deref()
                                .is_some_and(|data| data != plan.payload.as_slice());
                            if corrupted {
                                log::warn!("payload echoed by {} does not match the request", reply.source.ip());
                                stats.record_corrupted();
                            }
                            on_event(ProbeEvent::Reply { reply, corrupted });
                        }
                        Some(kind) => {
                            stats.record_lost();
                            on_event(ProbeEvent::ErrorReply { reply, kind });
                        }
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                stats.record_sent();
                stats.record_lost();
                on_event(ProbeEvent::TimedOut);
            }
            Err(e) if e.is_fatal() => {
                log::debug!("aborting run: {}", e);
                error = Some(e);
                break;
            }
            Err(e) => {
                stats.record_sent();
                stats.record_lost();
                on_event(ProbeEvent::Failed(&e));
            }
        }

        if plan.count.is_some_and(|count| iteration >= count) {
            break;
        }

        let pause = tokio::time::sleep(plan.interval);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => break,
                received = &mut shutdown, if listening => {
                    if received.is_ok() {
                        interrupted = true;
                        break 'run;
                    }
                    // listener gone; finish the pause without it
                    listening = false;
                }
            }
        }
    }

    if let Err(e) = session.close() {
        log::warn!("failed to release ICMP handle: {}", e);
        error.get_or_insert(e);
    }

    RunOutcome {
        statistics: stats,
        error,
        interrupted,
    }
}
