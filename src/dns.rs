use dns_lookup::{lookup_addr, lookup_host};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};

/// Resolves `hostname` to the address to ping and its IPv6 scope id.
///
/// Literal addresses are accepted as-is; an IPv6 literal may carry a numeric
/// zone such as `fe80::1%4`. Names go through the system resolver and IPv4
/// results are preferred unless IPv6 is forced.
pub async fn resolve_hostname(hostname: &str, force_ipv4: bool, force_ipv6: bool) -> anyhow::Result<(IpAddr, u32)> {
    if let Some((ip, scope_id)) = parse_literal(hostname) {
        return match (ip, force_ipv4, force_ipv6) {
            (IpAddr::V4(_), _, true) => Err(anyhow::anyhow!("IPv4 address provided but IPv6 forced")),
            (IpAddr::V6(_), true, _) => Err(anyhow::anyhow!("IPv6 address provided but IPv4 forced")),
            _ => Ok((ip, scope_id)),
        };
    }

    let addresses = tokio::task::spawn_blocking({
        let hostname = hostname.to_string();
        move || lookup_host(&hostname)
    })
    .await??;
    log::debug!("{} resolved to {:?}", hostname, addresses);

    let address = pick_address(&addresses, force_ipv4, force_ipv6).ok_or_else(|| {
        let version = if force_ipv4 {
            "IPv4 "
        } else if force_ipv6 {
            "IPv6 "
        } else {
            ""
        };
        anyhow::anyhow!("No {}addresses found for hostname: {}", version, hostname)
    })?;

    Ok((address, 0))
}

fn parse_literal(text: &str) -> Option<(IpAddr, u32)> {
    if let Ok(ip) = text.parse::<IpAddr>() {
        return Some((ip, 0));
    }
    let (address, zone) = text.split_once('%')?;
    let ip = address.parse::<Ipv6Addr>().ok()?;
    let scope_id = zone.parse::<u32>().ok()?;
    Some((IpAddr::V6(ip), scope_id))
}

fn pick_address(addresses: &[IpAddr], force_ipv4: bool, force_ipv6: bool) -> Option<IpAddr> {
    if force_ipv6 {
        return addresses.iter().find(|addr| addr.is_ipv6()).copied();
    }
    let ipv4 = addresses.iter().find(|addr| addr.is_ipv4()).copied();
    if force_ipv4 {
        return ipv4;
    }
    ipv4.or_else(|| addresses.first().copied())
}

/// Reverse lookups for `-a`, remembered per address for the whole run.
#[derive(Debug, Default)]
pub struct ReverseResolver {
    cache: HashMap<IpAddr, Option<String>>,
}

impl ReverseResolver {
    /// Must be called from a multi-threaded runtime; the lookup blocks.
    pub fn lookup(&mut self, ip: IpAddr) -> Option<&str> {
        self.cache
            .entry(ip)
            .or_insert_with(|| {
                tokio::task::block_in_place(|| match lookup_addr(&ip) {
                    // the resolver echoes the numeric form back when it has no name
                    Ok(name) if name != ip.to_string() => Some(name),
                    Ok(_) => None,
                    Err(e) => {
                        log::debug!("reverse lookup of {} failed: {}", ip, e);
                        None
                    }
                })
            })
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_address_parsing() {
        let result = resolve_hostname("8.8.8.8", false, false).await.unwrap();
        assert_eq!(result, ("8.8.8.8".parse::<IpAddr>().unwrap(), 0));

        let result = resolve_hostname("::1", false, true).await.unwrap();
        assert_eq!(result, ("::1".parse::<IpAddr>().unwrap(), 0));
    }

    #[tokio::test]
    async fn test_scoped_ipv6_literal() {
        let (ip, scope_id) = resolve_hostname("fe80::1%4", false, false).await.unwrap();
        assert_eq!(ip, "fe80::1".parse::<IpAddr>().unwrap());
        assert_eq!(scope_id, 4);
    }

    #[tokio::test]
    async fn test_forced_family_mismatch() {
        assert!(resolve_hostname("127.0.0.1", false, true).await.is_err());
        assert!(resolve_hostname("::1", true, false).await.is_err());
    }

    #[test]
    fn test_address_preference() {
        let v4: IpAddr = "192.0.2.7".parse().unwrap();
        let v6: IpAddr = "2001:db8::7".parse().unwrap();

        assert_eq!(pick_address(&[v6, v4], false, false), Some(v4));
        assert_eq!(pick_address(&[v6], false, false), Some(v6));
        assert_eq!(pick_address(&[v4, v6], false, true), Some(v6));
        assert_eq!(pick_address(&[v6], true, false), None);
        assert_eq!(pick_address(&[v4], false, true), None);
        assert_eq!(pick_address(&[], false, false), None);
    }

    #[tokio::test]
    async fn test_hostname_resolution() {
        // Depends on the resolver configuration of the machine
        let result = resolve_hostname("localhost", false, false).await;
        println!("localhost resolved to: {:?}", result);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reverse_lookup() {
        let mut resolver = ReverseResolver::default();
        let ip = "127.0.0.1".parse::<IpAddr>().unwrap();
        let first = resolver.lookup(ip).map(str::to_owned);
        println!("Reverse lookup result: {:?}", first);
        assert_eq!(resolver.lookup(ip).map(str::to_owned), first);
        assert_eq!(resolver.cache.len(), 1);
    }
}
