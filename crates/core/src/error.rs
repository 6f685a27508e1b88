use crate::host::NodeId;

/// Result alias that carries the custom [`PartyError`] type.
pub type Result<T> = std::result::Result<T, PartyError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PartyError {
    /// Free-form failure reported by a host or by the application layer.
    #[error("{0}")]
    Message(String),
    /// The analyser or its context cannot produce data yet. Callers treat
    /// this as an empty sample and try again on the next frame.
    #[error("audio graph not ready: {0}")]
    NotReady(String),
    /// The host refused to start playback, usually because no user gesture
    /// preceded the request.
    #[error("playback denied: {0}")]
    PlaybackDenied(String),
    /// A node already has the connection that was requested.
    #[error("audio node {0} is already connected")]
    AlreadyConnected(NodeId),
    /// A media element can feed exactly one source node.
    #[error("media element `{0}` already feeds a source node")]
    SourceAlreadyAttached(String),
    /// A node id that the context never handed out.
    #[error("unknown audio node {0}")]
    UnknownNode(NodeId),
    /// Any operation after final teardown.
    #[error("audio graph has been closed")]
    GraphClosed,
    /// A configuration value outside what the graph or detector accepts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A color string that is not `#RRGGBB`.
    #[error("invalid color `{0}`, expected #RRGGBB")]
    InvalidColor(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialization errors.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around WAV decoding errors.
    #[error("failed to decode audio: {0}")]
    Decode(#[from] hound::Error),
    /// Wrapper around FFT processing errors.
    #[error("frequency analysis failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl PartyError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PartyError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PartyError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
