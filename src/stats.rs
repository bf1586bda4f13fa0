use std::net::IpAddr;

use crate::icmp::{EchoReply, ErrorKind};
use crate::utils::format_time;

/// Running totals for one ping run. Counters only ever grow.
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    pub packets_corrupted: u32,
    pub min_time: Option<u32>,
    pub max_time: Option<u32>,
    pub total_time: u64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            packets_corrupted: 0,
            min_time: None,
            max_time: None,
            total_time: 0,
        }
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_received(&mut self, time_ms: u32) {
        self.packets_received += 1;
        self.total_time += u64::from(time_ms);
        self.min_time = Some(self.min_time.map_or(time_ms, |min| min.min(time_ms)));
        self.max_time = Some(self.max_time.map_or(time_ms, |max| max.max(time_ms)));
    }

    pub fn record_lost(&mut self) {
        self.packets_lost += 1;
    }

    pub fn record_corrupted(&mut self) {
        self.packets_corrupted += 1;
    }

    pub fn loss_percentage(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        (self.packets_lost as f64 / self.packets_sent as f64) * 100.0
    }

    /// Mean round-trip time, rounded to the nearest millisecond.
    pub fn average_time(&self) -> u32 {
        if self.packets_received == 0 {
            return 0;
        }
        (self.total_time as f64 / self.packets_received as f64).round() as u32
    }

    pub fn format_summary(&self, target: &IpAddr) -> String {
        if self.packets_sent == 0 {
            return String::new();
        }

        let mut summary = format!(
            "\nPing statistics for {}:\n    Packets: Sent = {}, Received = {}, Lost = {} ({:.2}% loss),\n",
            target,
            self.packets_sent,
            self.packets_received,
            self.packets_lost,
            self.loss_percentage()
        );

        if let (Some(min), Some(max)) = (self.min_time, self.max_time) {
            summary.push_str(&format!(
                "Approximate round trip times in milli-seconds:\n    Minimum = {}ms, Maximum = {}ms, Average = {}ms\n",
                min,
                max,
                self.average_time()
            ));
        }

        summary
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_response(reply: &EchoReply, resolved_name: Option<&str>) -> String {
    let source = source_display(reply, resolved_name);
    let time = format_time(reply.round_trip_time);
    match (&reply.data, reply.ttl()) {
        (Some(data), Some(ttl)) => format!(
            "Reply from {}: bytes={} {} TTL={}",
            source,
            data.len(),
            time,
            ttl
        ),
        _ => format!("Reply from {}: {}", source, time),
    }
}

pub fn format_failed_reply(reply: &EchoReply, kind: ErrorKind, resolved_name: Option<&str>) -> String {
    format!("Reply from {}: {}.", source_display(reply, resolved_name), kind)
}

pub fn format_header(target: &str, resolved_ip: &IpAddr, payload_size: usize) -> String {
    if target == resolved_ip.to_string() {
        format!("\nPinging {} with {} bytes of data:", target, payload_size)
    } else {
        format!("\nPinging {} [{}] with {} bytes of data:", target, resolved_ip, payload_size)
    }
}

fn source_display(reply: &EchoReply, resolved_name: Option<&str>) -> String {
    match resolved_name {
        Some(name) => format!("{} [{}]", name, reply.source.ip()),
        None => reply.source.ip().to_string(),
    }
}
