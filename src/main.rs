mod cli;
mod dns;
mod icmp;
mod ping;
mod stats;
mod utils;

use icmp::{AddressFamily, IpOptions, Session, SystemTransport, IP_FLAG_DF};
use ping::{PingPlan, ProbeEvent};
use std::time::Duration;

const EXIT_FAILURE: i32 = 1;
const EXIT_UNKNOWN_HOST: i32 = 3;

#[tokio::main]
async fn main() {
    // Enable debug logging if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            utils::exit_with_error(&e.to_string(), EXIT_FAILURE);
        }
    };

    if let Err(e) = utils::validate_ping_params(args.size, args.count, args.timeout, args.ttl, args.expected) {
        utils::exit_with_error(&e.to_string(), EXIT_FAILURE);
    }

    let (target_ip, scope_id) = match dns::resolve_hostname(&args.target, args.force_ipv4, args.force_ipv6).await {
        Ok(resolved) => resolved,
        Err(e) => {
            log::debug!("resolving {} failed: {}", args.target, e);
            println!(
                "Ping request could not find host {}. Please check the name and try again.",
                args.target
            );
            std::process::exit(EXIT_UNKNOWN_HOST);
        }
    };

    let family = AddressFamily::of(&target_ip);
    let session = match Session::open(SystemTransport, family) {
        Ok(session) => session,
        Err(e) => {
            utils::exit_with_error(&format!("Unable to open {} ICMP handle: {}", family, e), EXIT_FAILURE);
        }
    };

    // validate_ping_params bounds the narrowing casts below
    let payload_size = args.size.unwrap_or(32) as usize;
    let mut options = IpOptions {
        ttl: args.ttl.map_or(icmp::DEFAULT_TTL, |ttl| ttl as u8),
        tos: args.tos.unwrap_or(0) as u8,
        flags: 0,
    };
    if args.dont_fragment {
        if family == AddressFamily::V4 {
            options.flags |= IP_FLAG_DF;
        } else {
            log::warn!("-f only applies to IPv4, ignoring it");
        }
    }
    log::debug!("IP options {:?} (don't fragment: {})", options, options.dont_fragment());

    let plan = PingPlan {
        destination: target_ip,
        scope_id,
        payload: utils::random_payload(payload_size),
        timeout: Duration::from_millis(u64::from(args.timeout.unwrap_or(1000))),
        options,
        count: args.count,
        interval: Duration::from_millis(1000),
        expected_count: args.expected.unwrap_or(10) as usize,
    };

    println!("{}", stats::format_header(&args.target, &target_ip, payload_size));

    let shutdown_signal = utils::setup_signal_handler();
    let mut resolver = args.resolve_addresses.then(dns::ReverseResolver::default);

    let outcome = ping::run(session, &plan, shutdown_signal, |event| match event {
        ProbeEvent::Reply { reply, corrupted } => {
            let name = resolver.as_mut().and_then(|r| r.lookup(reply.source.ip()));
            println!("{}", stats::format_response(reply, name));
            if corrupted {
                eprintln!("Corrupted packet!");
            }
        }
        ProbeEvent::ErrorReply { reply, kind } => {
            let name = resolver.as_mut().and_then(|r| r.lookup(reply.source.ip()));
            println!("{}", stats::format_failed_reply(reply, kind, name));
        }
        ProbeEvent::TimedOut => println!("Request timed out."),
        ProbeEvent::Failed(e) => eprintln!("Error: {}", e),
    })
    .await;

    print!("{}", outcome.statistics.format_summary(&target_ip));
    if outcome.interrupted {
        println!("Control-C");
    }

    if let Some(e) = outcome.error {
        log::debug!("run aborted, raw status {:?}", e.code());
        utils::exit_with_error(&e.to_string(), EXIT_FAILURE);
    }
}
