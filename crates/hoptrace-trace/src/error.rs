use thiserror::Error;

/// Failures while running the traceroute process.
///
/// A non-zero exit status is not one of them: whatever the tool printed is
/// still returned to the parser.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to spawn {program} for {target}: {source}")]
    Spawn {
        program: String,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing traceroute {0} pipe")]
    MissingPipe(&'static str),
}
