//! Shared data structures for hoptrace.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceFile {
    pub version: u32,
    pub runs: Vec<TraceRun>,
}

/// One parsed capture, tagged with the run metadata the session attaches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRun {
    pub destination: String,
    /// 1-based index of this run within its destination.
    pub run: u32,
    pub timestamp_utc: String,
    pub hops: Vec<HopRecord>,
}

/// One hop line of traceroute output.
///
/// `latencies` holds one slot per probe found on the line; `None` is a probe
/// that timed out. `name` is only set when it differs from `address`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HopRecord {
    pub hop: u32,
    pub address: Option<String>,
    pub name: Option<String>,
    pub latencies: Vec<Option<f64>>,
}

impl HopRecord {
    /// No responder was identified on this hop.
    pub fn is_lost(&self) -> bool {
        self.address.is_none()
    }

    pub fn timeouts(&self) -> usize {
        self.latencies.iter().filter(|probe| probe.is_none()).count()
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.address.as_deref())
            .unwrap_or("*")
    }
}
