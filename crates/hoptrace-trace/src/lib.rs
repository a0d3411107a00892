//! Traceroute capture and hop parsing.

pub mod error;
pub mod parser;
pub mod runner;
pub mod session;
pub mod stream;

pub use error::CaptureError;
pub use parser::{parse, parse_header, parse_hop_line, parse_trace, ParsedTrace, TraceHeader};
pub use runner::{
    capture_trace, traceroute_command, SystemTracerouteRunner, TraceSettings, TracerouteRunner,
};
pub use session::{run_session, SessionSettings, TraceJobResult};
pub use stream::{forward_hops, spawn_traceroute_stream, stream_for_target, TraceEvent};
