//! Network origin detector.
//!
//! Flags origins inside data-center networks or on a bad-reputation list.
//! Both lists are static CIDR tables; no live reputation or geo lookups.

use super::{DetectionContext, Detector, DetectorResult};
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

pub const DATACENTER_POINTS: u32 = 50;
pub const BAD_REPUTATION_POINTS: u32 = 70;

/// Network origin detector.
#[derive(Debug, Clone, Default)]
pub struct NetworkDetector {
    datacenter: Vec<IpNet>,
    bad_reputation: Vec<IpNet>,
}

impl NetworkDetector {
    /// Build from CIDR strings. Unparsable entries are skipped.
    pub fn new(datacenter: &[String], bad_reputation: &[String]) -> Self {
        Self {
            datacenter: parse_ranges(datacenter),
            bad_reputation: parse_ranges(bad_reputation),
        }
    }

    pub fn is_datacenter(&self, ip: &IpAddr) -> bool {
        self.datacenter.iter().any(|net| net.contains(ip))
    }

    pub fn has_bad_reputation(&self, ip: &IpAddr) -> bool {
        self.bad_reputation.iter().any(|net| net.contains(ip))
    }
}

fn parse_ranges(ranges: &[String]) -> Vec<IpNet> {
    ranges
        .iter()
        .filter_map(|r| {
            // Accept bare addresses as single-host networks
            let parsed = r
                .parse::<IpNet>()
                .or_else(|_| r.parse::<IpAddr>().map(IpNet::from));
            match parsed {
                Ok(net) => Some(net),
                Err(_) => {
                    warn!(range = %r, "Skipping invalid network range");
                    None
                }
            }
        })
        .collect()
}

impl Detector for NetworkDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let mut result = DetectorResult::new(0);

        let ip: IpAddr = match ctx.signals.origin.trim().parse() {
            Ok(ip) => ip,
            Err(_) => return result,
        };

        if self.is_datacenter(&ip) {
            result.add(DATACENTER_POINTS, "datacenter_origin");
        }
        if self.has_bad_reputation(&ip) {
            result.add(BAD_REPUTATION_POINTS, "bad_reputation_origin");
        }

        result
    }

    fn name(&self) -> &'static str {
        "network"
    }
}
