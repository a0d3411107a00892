use hoptrace_model::HopRecord;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static HOP_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"^([0-9]+)\s+(.*)$"));

// Either a timeout marker or `<number> ms`, optionally followed by an
// ICMP annotation such as `!H` that is consumed and dropped.
static TIMING: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(\*)|([0-9]+(?:\.[0-9]+)?)\s*ms(?:\s*!\S+)?"));

static NAMED_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"([^\s(]+)\s*\(([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)\)"));

static BARE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+"));

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^traceroute6?\s+to\s+([^\s,(]+)(?:\s*\(([^)]*)\))?(?:,\s*([0-9]+)\s+hops\s+max)?")
});

// Patterns are literals, so a failure here is caught by the first test run.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hop pattern must compile")
}

/// The banner line traceroute prints before the first hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceHeader {
    pub destination: String,
    pub address: Option<String>,
    pub max_hops: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTrace {
    pub header: Option<TraceHeader>,
    pub hops: Vec<HopRecord>,
}

/// Extracts one record per hop line, in input order.
///
/// Never fails: banners, blank lines and anything else that does not start
/// with a hop number are skipped. Repeated hop numbers are kept as separate
/// records.
pub fn parse(text: &str) -> Vec<HopRecord> {
    text.lines().filter_map(parse_hop_line).collect()
}

/// Like [`parse`], but also picks up the first `traceroute to ...` banner.
pub fn parse_trace(text: &str) -> ParsedTrace {
    let header = text.lines().find_map(parse_header);
    ParsedTrace {
        header,
        hops: parse(text),
    }
}

pub fn parse_header(line: &str) -> Option<TraceHeader> {
    let caps = HEADER.captures(line.trim())?;
    let destination = caps.get(1)?.as_str().to_string();
    let address = caps
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let max_hops = caps.get(3).and_then(|m| m.as_str().parse().ok());

    Some(TraceHeader {
        destination,
        address,
        max_hops,
    })
}

/// Parses a single line. Returns `None` unless the line starts with a hop
/// number followed by whitespace.
pub fn parse_hop_line(line: &str) -> Option<HopRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let caps = HOP_LINE.captures(line)?;
    // Digits only, so the sole failure is overflow; saturate to keep the line.
    let hop = caps.get(1)?.as_str().parse::<u32>().unwrap_or(u32::MAX);
    let payload = caps.get(2).map_or("", |m| m.as_str());

    let (address, name) = responder(payload);

    Some(HopRecord {
        hop,
        address,
        name,
        latencies: latencies(payload),
    })
}

fn latencies(payload: &str) -> Vec<Option<f64>> {
    TIMING
        .captures_iter(payload)
        .map(|caps| caps.get(2).and_then(|value| value.as_str().parse::<f64>().ok()))
        .collect()
}

/// Returns `(address, name)`. A `name (address)` pair wins over a bare
/// address anywhere on the line.
fn responder(payload: &str) -> (Option<String>, Option<String>) {
    if let Some(caps) = NAMED_ADDRESS.captures(payload) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        let address = caps.get(2).map_or("", |m| m.as_str());
        let name = (name != address).then(|| name.to_string());
        return (Some(address.to_string()), name);
    }

    match BARE_ADDRESS.find(payload) {
        Some(found) => (Some(found.as_str().to_string()), None),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(line: &str) -> HopRecord {
        parse_hop_line(line).unwrap()
    }

    #[test]
    fn named_hop_keeps_name_and_address() {
        let record = hop("1  _gateway (192.168.1.1)  1.235 ms  1.391 ms  1.506 ms");
        assert_eq!(
            record,
            HopRecord {
                hop: 1,
                address: Some("192.168.1.1".to_string()),
                name: Some("_gateway".to_string()),
                latencies: vec![Some(1.235), Some(1.391), Some(1.506)],
            }
        );
    }

    #[test]
    fn all_timeouts_have_no_responder() {
        let record = hop("2  * * *");
        assert_eq!(record.hop, 2);
        assert_eq!(record.address, None);
        assert_eq!(record.name, None);
        assert_eq!(record.latencies, vec![None, None, None]);
    }

    #[test]
    fn bare_address_with_mixed_timeouts() {
        let record = hop("3  192.168.1.1  2.0 ms  * 3.1 ms");
        assert_eq!(record.address.as_deref(), Some("192.168.1.1"));
        assert_eq!(record.name, None);
        assert_eq!(record.latencies, vec![Some(2.0), None, Some(3.1)]);
    }

    #[test]
    fn name_equal_to_address_is_dropped() {
        let record = hop("4  10.0.0.1 (10.0.0.1)  1.0 ms");
        assert_eq!(record.address.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.name, None);
        assert_eq!(record.latencies, vec![Some(1.0)]);
    }

    #[test]
    fn banner_and_blank_lines_yield_nothing() {
        assert!(parse_hop_line("traceroute to google.com (142.250.1.1), 30 hops max").is_none());
        assert!(parse_hop_line("").is_none());
        assert!(parse_hop_line("   \t ").is_none());
        assert!(parse("\n   \n\t\n").is_empty());
    }

    #[test]
    fn hop_number_needs_trailing_whitespace() {
        assert!(parse_hop_line("7").is_none());
        assert!(parse_hop_line("12abc 1.0 ms").is_none());
        assert!(parse_hop_line("x 1 10.0.0.1 1.0 ms").is_none());
    }

    #[test]
    fn oversized_hop_number_saturates() {
        let hops = parse(" 1  10.0.0.1  1.0 ms\n4294967296  10.0.0.2  2.0 ms\n");
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].hop, u32::MAX);
        assert_eq!(hops[1].address.as_deref(), Some("10.0.0.2"));
        assert_eq!(hops[1].latencies, vec![Some(2.0)]);
    }

    #[test]
    fn all_patterns_compile() {
        for pattern in [&HOP_LINE, &TIMING, &NAMED_ADDRESS, &BARE_ADDRESS, &HEADER] {
            assert!(!pattern.as_str().is_empty());
        }
    }

    #[test]
    fn annotations_are_consumed_without_changing_values() {
        let record = hop("9  10.1.1.1 (10.1.1.1)  12.5 ms !H  13.0 ms !N  *");
        assert_eq!(record.latencies, vec![Some(12.5), Some(13.0), None]);
    }

    #[test]
    fn unit_may_touch_the_number() {
        let record = hop("5  10.0.0.5  1ms 2.25ms");
        assert_eq!(record.latencies, vec![Some(1.0), Some(2.25)]);
    }

    #[test]
    fn line_without_identity_or_timing_still_yields_a_record() {
        let record = hop("6  something unexpected");
        assert_eq!(record.hop, 6);
        assert_eq!(record.address, None);
        assert_eq!(record.name, None);
        assert!(record.latencies.is_empty());
    }

    #[test]
    fn address_groups_are_not_range_checked() {
        let record = hop("8  999.300.1.2  4.0 ms");
        assert_eq!(record.address.as_deref(), Some("999.300.1.2"));
    }

    #[test]
    fn first_named_pair_wins_over_earlier_bare_address() {
        let record = hop("3  10.9.9.9 router.example (10.0.0.3)  1.0 ms");
        assert_eq!(record.address.as_deref(), Some("10.0.0.3"));
        assert_eq!(record.name.as_deref(), Some("router.example"));
    }

    #[test]
    fn leading_whitespace_is_trimmed() {
        let record = hop("   10  * * *   ");
        assert_eq!(record.hop, 10);
        assert_eq!(record.latencies.len(), 3);
    }

    #[test]
    fn parse_header_variants() {
        assert_eq!(
            parse_header("traceroute to google.com (142.250.1.1), 30 hops max, 60 byte packets"),
            Some(TraceHeader {
                destination: "google.com".to_string(),
                address: Some("142.250.1.1".to_string()),
                max_hops: Some(30),
            })
        );
        assert_eq!(
            parse_header("traceroute to 1.1.1.1, 64 hops max"),
            Some(TraceHeader {
                destination: "1.1.1.1".to_string(),
                address: None,
                max_hops: Some(64),
            })
        );
        assert_eq!(parse_header(" 1  10.0.0.1  1.0 ms"), None);
    }

    #[test]
    fn parse_trace_uses_first_header() {
        let text = "traceroute to a.example (10.0.0.9), 30 hops max\n\
                    traceroute to b.example (10.0.0.8), 30 hops max\n \
                    1  10.0.0.9  1.0 ms\n";
        let parsed = parse_trace(text);
        assert_eq!(
            parsed.header.map(|header| header.destination).as_deref(),
            Some("a.example")
        );
        assert_eq!(parsed.hops.len(), 1);
    }
}
