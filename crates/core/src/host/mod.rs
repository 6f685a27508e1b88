//! Capabilities the core expects from the platform it runs on.
//!
//! The lifecycle manager, the sampler and the scheduler are written against
//! these traits only. [`crate::audio`] provides an in-process implementation;
//! other platforms plug in their own media element and processing graph.

use std::fmt;

use crate::{AnalyserOptions, Result};

/// Opaque identifier of a node inside a [`ProcessingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime state of a processing context as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// Hosts may suspend an idle context on their own.
    Suspended,
    Closed,
}

/// Playable media with a single source reference.
pub trait MediaElement {
    fn source(&self) -> &str;

    fn set_looping(&mut self, looping: bool);

    /// Starts or resumes playback. Hosts that require a user gesture fail
    /// with [`crate::PartyError::PlaybackDenied`].
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;
}

/// Audio-processing graph able to route a media element through an analyser
/// to the output.
pub trait ProcessingContext {
    type Media: MediaElement;

    fn state(&self) -> ContextState;

    fn resume(&mut self) -> Result<()>;

    /// Releases every node. A closed context cannot be reopened.
    fn close(&mut self) -> Result<()>;

    fn create_media_source(&mut self, media: &Self::Media) -> Result<NodeId>;

    fn create_analyser(&mut self, options: &AnalyserOptions) -> Result<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;

    fn connect_to_destination(&mut self, from: NodeId) -> Result<()>;

    /// Removes every outgoing connection of `node`.
    fn disconnect(&mut self, node: NodeId) -> Result<()>;

    /// Fills `out` with the analyser's current per-bin energy, 0 to 255.
    fn byte_frequency_data(&mut self, analyser: NodeId, out: &mut [u8]) -> Result<()>;
}

/// Factory for processing contexts.
pub trait AudioHost {
    type Media: MediaElement;
    type Context: ProcessingContext<Media = Self::Media>;

    fn create_context(&mut self) -> Result<Self::Context>;
}
