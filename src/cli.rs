use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::icmp::DEFAULT_TTL;

#[derive(Debug, Clone)]
pub struct PingArgs {
    pub target: String,
    pub continuous: bool,
    pub resolve_addresses: bool,
    /// `None` once `-t` is given.
    pub count: Option<u32>,
    pub size: Option<u32>,
    pub dont_fragment: bool,
    pub ttl: Option<u32>,
    pub tos: Option<u32>,
    pub timeout: Option<u32>,
    pub expected: Option<u32>,
    pub force_ipv4: bool,
    pub force_ipv6: bool,
}

impl Default for PingArgs {
    fn default() -> Self {
        Self {
            target: String::new(),
            continuous: false,
            resolve_addresses: false,
            count: Some(4),
            size: Some(32),
            dont_fragment: false,
            ttl: Some(u32::from(DEFAULT_TTL)),
            tos: None,
            timeout: Some(1000),
            expected: Some(10),
            force_ipv4: false,
            force_ipv6: false,
        }
    }
}

pub fn build_cli() -> Command {
    Command::new("winping")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sends ICMP echo requests through the operating system's ICMP service")
        .arg(
            Arg::new("target")
                .help("Target hostname or IP address")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("continuous")
                .short('t')
                .help("Ping the specified host until stopped")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("resolve")
                .short('a')
                .help("Resolve reply addresses to hostnames")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("count")
                .short('n')
                .help("Number of echo requests to send")
                .value_name("count")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("size")
                .short('l')
                .help("Send buffer size")
                .value_name("size")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("dont_fragment")
                .short('f')
                .help("Set Don't Fragment flag in packet (IPv4-only)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ttl")
                .short('i')
                .help("Time To Live")
                .value_name("TTL")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("tos")
                .short('v')
                .help("Type Of Service (IPv4-only, deprecated)")
                .value_name("TOS")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("timeout")
                .short('w')
                .help("Timeout in milliseconds to wait for each reply")
                .value_name("timeout")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("expected")
                .long("expected")
                .help("Number of replies the reply buffer is sized for")
                .value_name("count")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("force_ipv4")
                .short('4')
                .help("Force using IPv4")
                .conflicts_with("force_ipv6")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("force_ipv6")
                .short('6')
                .help("Force using IPv6")
                .action(ArgAction::SetTrue),
        )
}

pub fn parse_args() -> anyhow::Result<PingArgs> {
    from_matches(&build_cli().get_matches())
}

#[cfg(test)]
fn parse_args_from<I, T>(argv: I) -> anyhow::Result<PingArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    from_matches(&build_cli().try_get_matches_from(argv)?)
}

fn from_matches(matches: &ArgMatches) -> anyhow::Result<PingArgs> {
    let mut args = PingArgs::default();

    args.target = matches
        .get_one::<String>("target")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("A target host must be specified"))?;
    args.continuous = matches.get_flag("continuous");
    args.resolve_addresses = matches.get_flag("resolve");
    args.dont_fragment = matches.get_flag("dont_fragment");
    args.force_ipv4 = matches.get_flag("force_ipv4");
    args.force_ipv6 = matches.get_flag("force_ipv6");

    if let Some(count) = matches.get_one::<u32>("count") {
        args.count = Some(*count);
    }

    if let Some(size) = matches.get_one::<u32>("size") {
        args.size = Some(*size);
    }

    if let Some(ttl) = matches.get_one::<u32>("ttl") {
        args.ttl = Some(*ttl);
    }

    if let Some(tos) = matches.get_one::<u8>("tos") {
        args.tos = Some(u32::from(*tos));
    }

    if let Some(timeout) = matches.get_one::<u32>("timeout") {
        args.timeout = Some(*timeout);
    }

    if let Some(expected) = matches.get_one::<u32>("expected") {
        args.expected = Some(*expected);
    }

    // Continuous mode overrides count
    if args.continuous {
        args.count = None;
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = parse_args_from(["winping", "example.com"]).unwrap();
        assert_eq!(args.target, "example.com");
        assert_eq!(args.count, Some(4));
        assert_eq!(args.size, Some(32));
        assert_eq!(args.timeout, Some(1000));
        assert_eq!(args.ttl, Some(128));
        assert_eq!(args.expected, Some(10));
        assert_eq!(args.tos, None);
        assert!(!args.continuous && !args.dont_fragment && !args.resolve_addresses);
    }

    #[test]
    fn test_all_options() {
        let args = parse_args_from([
            "winping", "-n", "7", "-l", "1400", "-w", "250", "-i", "12", "-v", "16", "-f", "-a", "-4",
            "--expected", "3", "10.0.0.1",
        ])
        .unwrap();
        assert_eq!(args.target, "10.0.0.1");
        assert_eq!(args.count, Some(7));
        assert_eq!(args.size, Some(1400));
        assert_eq!(args.timeout, Some(250));
        assert_eq!(args.ttl, Some(12));
        assert_eq!(args.tos, Some(16));
        assert_eq!(args.expected, Some(3));
        assert!(args.dont_fragment && args.resolve_addresses && args.force_ipv4);
    }

    #[test]
    fn test_continuous_overrides_count() {
        let args = parse_args_from(["winping", "-t", "-n", "5", "localhost"]).unwrap();
        assert!(args.continuous);
        assert_eq!(args.count, None);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_args_from(["winping"]).is_err());
        assert!(parse_args_from(["winping", "-4", "-6", "localhost"]).is_err());
        assert!(parse_args_from(["winping", "-n", "many", "localhost"]).is_err());
        assert!(parse_args_from(["winping", "-v", "256", "localhost"]).is_err());
    }
}
