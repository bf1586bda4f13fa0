use rand::RngCore;
use std::process;

use crate::icmp::MAX_PAYLOAD_SIZE;

/// Generate a random identifier for ICMP packets
#[cfg_attr(windows, allow(dead_code))]
pub fn generate_identifier() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=65535)
}

/// Random request payload, reused for every echo of a run.
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("winping: {}", message);
    process::exit(code);
}

/// Validate ping parameters
pub fn validate_ping_params(
    size: Option<u32>,
    count: Option<u32>,
    timeout: Option<u32>,
    ttl: Option<u32>,
    expected: Option<u32>,
) -> anyhow::Result<()> {
    if let Some(size) = size {
        if size as usize > MAX_PAYLOAD_SIZE {
            return Err(anyhow::anyhow!(
                "Bad data size, valid range is from 0 to {}",
                MAX_PAYLOAD_SIZE
            ));
        }
    }

    if count == Some(0) {
        return Err(anyhow::anyhow!("Bad value for option -n, count must be positive"));
    }

    if timeout == Some(0) {
        return Err(anyhow::anyhow!("Bad value for option -w, timeout must be positive"));
    }

    if let Some(ttl) = ttl {
        if ttl == 0 || ttl > 255 {
            return Err(anyhow::anyhow!("Bad value for option -i, valid range is from 1 to 255"));
        }
    }

    if expected == Some(0) {
        return Err(anyhow::anyhow!("Bad value for option --expected, must be positive"));
    }

    Ok(())
}

/// Format round-trip time the way Windows ping does
pub fn format_time(ms: u32) -> String {
    if ms < 1 {
        "time<1ms".to_string()
    } else {
        format!("time={}ms", ms)
    }
}

/// Handle Ctrl+C signal for graceful shutdown
pub fn setup_signal_handler() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::debug!("interrupt received, stopping after the current request");
                let _ = tx.send(());
            }
            Err(e) => log::warn!("failed to listen for Ctrl+C: {}", e),
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_generation() {
        let ids: Vec<u16> = (0..8).map(|_| generate_identifier()).collect();
        assert!(ids.iter().all(|id| *id != 0));
        // Very unlikely to all be the same
        assert!(ids.iter().any(|id| *id != ids[0]));
    }

    #[test]
    fn test_random_payload() {
        assert!(random_payload(0).is_empty());
        let payload = random_payload(32);
        assert_eq!(payload.len(), 32);
        assert_ne!(payload, random_payload(32));
    }

    #[test]
    fn test_parameter_validation() {
        // Valid parameters
        assert!(validate_ping_params(Some(32), Some(4), Some(1000), Some(64), Some(10)).is_ok());
        assert!(validate_ping_params(Some(0), None, None, None, None).is_ok());
        assert!(validate_ping_params(Some(65500), None, None, None, None).is_ok());

        // Invalid size
        assert!(validate_ping_params(Some(65501), None, None, None, None).is_err());

        // Invalid count
        assert!(validate_ping_params(None, Some(0), None, None, None).is_err());

        // Invalid timeout
        assert!(validate_ping_params(None, None, Some(0), None, None).is_err());

        // Invalid TTL
        assert!(validate_ping_params(None, None, None, Some(0), None).is_err());
        assert!(validate_ping_params(None, None, None, Some(256), None).is_err());

        // Invalid expected reply count
        assert!(validate_ping_params(None, None, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(0), "time<1ms");
        assert_eq!(format_time(1), "time=1ms");
        assert_eq!(format_time(16), "time=16ms");
        assert_eq!(format_time(100), "time=100ms");
    }
}
