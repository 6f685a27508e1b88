//! Core library for the Party Picker color picker.
//!
//! Party mode listens to a looping track, detects beats in the bass band of
//! its spectrum and repaints the background on every beat. The crate is split
//! along that pipeline: the host capabilities the graph is built from
//! ([`host`], with an in-process implementation in [`audio`]), the analyser
//! and sampler ([`analysis`]), the beat detector ([`beat`]), the per-frame
//! scheduler ([`timeline`]), the graph lifecycle ([`lifecycle`]) and the
//! owner tying them to the UI state ([`party`]).

pub mod analysis;
pub mod audio;
pub mod beat;
pub mod color;
pub mod config;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod party;
pub mod timeline;

pub use analysis::{AnalyserNode, AnalyserOptions, FrequencySample, FrequencySampler};
pub use audio::{PcmPlayer, PcmTrack, SoftwareContext, SoftwareHost};
pub use beat::{bass_average, detect, BeatDetector, BeatDetectorState};
pub use color::{Color, ColorPolicy, RandomColors};
pub use config::{AppConfig, AudioConfig, DetectorConfig, PartyConfig};
pub use error::{PartyError, Result};
pub use host::{AudioHost, ContextState, MediaElement, NodeId, ProcessingContext};
pub use lifecycle::{Activation, AudioGraphHandle, AudioGraphLifecycle, GraphPhase};
pub use party::{PartyMode, PartyModeState};
pub use timeline::{
    Clock, FrameClock, LoopControl, ManualClock, RealtimeFrames, Scheduler, SimulatedFrames,
    SystemClock, Tick,
};
