use std::{mem, time::Duration};

use crate::{
    host::{AudioHost, ContextState, MediaElement, NodeId, ProcessingContext},
    AnalyserOptions, AppConfig, BeatDetector, Color, DetectorConfig, FrequencySampler, PartyError,
    Result, Scheduler, Tick,
};

/// Resources of one built graph: source → analyser → output.
///
/// Only [`AudioGraphLifecycle`] creates or destroys these. Other components
/// borrow a handle for the duration of a single call.
#[derive(Debug)]
pub struct AudioGraphHandle<C: ProcessingContext> {
    pub(crate) context: C,
    pub(crate) analyser: NodeId,
    pub(crate) source: NodeId,
    pub(crate) media: C::Media,
}

impl<C: ProcessingContext> AudioGraphHandle<C> {
    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn analyser(&self) -> NodeId {
        self.analyser
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn media(&self) -> &C::Media {
        &self.media
    }
}

/// Where the audio graph is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPhase {
    Uninitialized,
    Suspended,
    Active,
    /// Terminal.
    Closed,
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Playing,
    /// The graph is live but the host refused playback. Beat detection sees
    /// silence until a later activation manages to start the media.
    Silent { reason: String },
}

enum GraphState<C: ProcessingContext> {
    Uninitialized { media: C::Media },
    Suspended(AudioGraphHandle<C>),
    Active(AudioGraphHandle<C>),
    Closed,
}

impl<C: ProcessingContext> GraphState<C> {
    fn phase(&self) -> GraphPhase {
        match self {
            GraphState::Uninitialized { .. } => GraphPhase::Uninitialized,
            GraphState::Suspended(_) => GraphPhase::Suspended,
            GraphState::Active(_) => GraphPhase::Active,
            GraphState::Closed => GraphPhase::Closed,
        }
    }
}

/// Owns the audio graph and the beat scheduler, and moves both through
/// Uninitialized → Active ⇄ Suspended → Closed.
///
/// The graph is built lazily on first activation and reused across
/// deactivate/activate cycles, so the media element is only ever attached to
/// one source node. [`reset`](Self::reset) and [`shutdown`](Self::shutdown)
/// are the only ways to release it.
pub struct AudioGraphLifecycle<H: AudioHost> {
    host: H,
    options: AnalyserOptions,
    state: GraphState<H::Context>,
    scheduler: Scheduler,
}

impl<H: AudioHost> AudioGraphLifecycle<H> {
    pub fn new(
        host: H,
        media: H::Media,
        options: AnalyserOptions,
        detector: DetectorConfig,
    ) -> Self {
        let scheduler = Scheduler::new(
            FrequencySampler::new(options.bin_count()),
            BeatDetector::new(detector),
        );
        Self {
            host,
            options,
            state: GraphState::Uninitialized { media },
            scheduler,
        }
    }

    /// Validates `config`, applies its looping flag to `media` and takes the
    /// analyser and detector settings from it.
    pub fn from_config(host: H, mut media: H::Media, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        media.set_looping(config.audio.looping);
        Ok(Self::new(
            host,
            media,
            AnalyserOptions::from(&config.audio),
            config.detector.clone(),
        ))
    }

    pub fn phase(&self) -> GraphPhase {
        self.state.phase()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn graph(&self) -> Option<&AudioGraphHandle<H::Context>> {
        match &self.state {
            GraphState::Suspended(graph) | GraphState::Active(graph) => Some(graph),
            _ => None,
        }
    }

    pub fn graph_mut(&mut self) -> Option<&mut AudioGraphHandle<H::Context>> {
        match &mut self.state {
            GraphState::Suspended(graph) | GraphState::Active(graph) => Some(graph),
            _ => None,
        }
    }

    /// The media element, wherever it currently lives. `None` once closed.
    pub fn media_mut(&mut self) -> Option<&mut H::Media> {
        match &mut self.state {
            GraphState::Uninitialized { media } => Some(media),
            GraphState::Suspended(graph) | GraphState::Active(graph) => Some(&mut graph.media),
            GraphState::Closed => None,
        }
    }

    /// Brings the graph to Active and arms the scheduler with `on_beat`.
    ///
    /// Builds the graph on first use and reuses it afterwards, resuming a
    /// context the host suspended before anything samples it. A refused
    /// playback is reported as [`Activation::Silent`], not as an error.
    /// Activating while already Active retries playback and re-arms a
    /// scheduler that was stopped through its [`crate::LoopControl`].
    pub fn activate(&mut self, on_beat: impl FnMut() -> Color + 'static) -> Result<Activation> {
        let mut graph = match mem::replace(&mut self.state, GraphState::Closed) {
            GraphState::Closed => return Err(PartyError::GraphClosed),
            GraphState::Uninitialized { media } => match self.build(media) {
                Ok(graph) => graph,
                Err((media, err)) => {
                    self.state = GraphState::Uninitialized { media };
                    return Err(err);
                }
            },
            GraphState::Suspended(graph) => {
                tracing::info!("reusing suspended audio graph");
                graph
            }
            GraphState::Active(mut graph) => {
                let activation = start_playback(&mut graph.media);
                self.state = GraphState::Active(graph);
                if !self.scheduler.is_running() {
                    tracing::info!("re-arming stopped beat scheduler");
                    self.scheduler.start(on_beat);
                }
                return Ok(activation);
            }
        };

        if graph.context.state() == ContextState::Suspended {
            tracing::info!("resuming suspended processing context");
            if let Err(err) = graph.context.resume() {
                tracing::warn!(%err, "processing context did not resume");
            }
        }

        let activation = start_playback(&mut graph.media);
        self.state = GraphState::Active(graph);
        self.scheduler.start(on_beat);
        Ok(activation)
    }

    /// Active → Suspended: stops the scheduler, then pauses playback. The
    /// graph stays allocated. A no-op in any other open phase.
    pub fn deactivate(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, GraphState::Closed) {
            GraphState::Closed => Err(PartyError::GraphClosed),
            GraphState::Active(mut graph) => {
                self.scheduler.stop();
                graph.media.pause();
                self.state = GraphState::Suspended(graph);
                tracing::info!("audio graph suspended");
                Ok(())
            }
            other => {
                self.scheduler.stop();
                self.state = other;
                Ok(())
            }
        }
    }

    /// Tears the graph down and returns to Uninitialized, so the next
    /// activation builds a fresh one.
    pub fn reset(&mut self) -> Result<()> {
        self.scheduler.stop();
        let media = match mem::replace(&mut self.state, GraphState::Closed) {
            GraphState::Closed => return Err(PartyError::GraphClosed),
            GraphState::Uninitialized { media } => media,
            GraphState::Suspended(graph) | GraphState::Active(graph) => teardown(graph),
        };
        self.state = GraphState::Uninitialized { media };
        tracing::info!("audio graph reset");
        Ok(())
    }

    /// Final teardown. Every later call on the lifecycle fails with
    /// [`PartyError::GraphClosed`].
    pub fn shutdown(&mut self) -> Result<()> {
        self.scheduler.stop();
        match mem::replace(&mut self.state, GraphState::Closed) {
            GraphState::Closed => return Err(PartyError::GraphClosed),
            GraphState::Uninitialized { .. } => {}
            GraphState::Suspended(graph) | GraphState::Active(graph) => {
                drop(teardown(graph));
            }
        }
        tracing::info!("audio graph closed");
        Ok(())
    }

    /// One scheduler frame at `now`. Only an Active graph is sampled.
    pub fn tick(&mut self, now: Duration) -> Result<Tick> {
        let graph = match &mut self.state {
            GraphState::Closed => return Err(PartyError::GraphClosed),
            GraphState::Active(graph) => Some(graph),
            _ => None,
        };
        Ok(self.scheduler.tick(graph, now))
    }

    fn build(
        &mut self,
        media: H::Media,
    ) -> std::result::Result<AudioGraphHandle<H::Context>, (H::Media, PartyError)> {
        let mut context = match self.host.create_context() {
            Ok(context) => context,
            Err(err) => return Err((media, err)),
        };

        match wire(&mut context, &media, &self.options) {
            Ok((source, analyser)) => {
                tracing::info!(
                    source = media.source(),
                    bins = self.options.bin_count(),
                    "audio graph built"
                );
                Ok(AudioGraphHandle {
                    context,
                    analyser,
                    source,
                    media,
                })
            }
            Err(err) => {
                if let Err(close_err) = context.close() {
                    tracing::warn!(%close_err, "failed to release a half-built graph");
                }
                Err((media, err))
            }
        }
    }
}

impl<H: AudioHost> Drop for AudioGraphLifecycle<H> {
    fn drop(&mut self) {
        if self.phase() != GraphPhase::Closed {
            if let Err(err) = self.shutdown() {
                tracing::warn!(%err, "audio graph teardown on drop failed");
            }
        }
    }
}

impl<H: AudioHost> std::fmt::Debug for AudioGraphLifecycle<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraphLifecycle")
            .field("phase", &self.phase())
            .field("options", &self.options)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

fn wire<C: ProcessingContext>(
    context: &mut C,
    media: &C::Media,
    options: &AnalyserOptions,
) -> Result<(NodeId, NodeId)> {
    let analyser = context.create_analyser(options)?;
    let source = context.create_media_source(media)?;
    context.connect(source, analyser)?;
    context.connect_to_destination(analyser)?;
    Ok((source, analyser))
}

fn start_playback<M: MediaElement>(media: &mut M) -> Activation {
    if media.is_playing() {
        return Activation::Playing;
    }

    match media.play() {
        Ok(()) => Activation::Playing,
        Err(err) => {
            tracing::warn!(%err, source = media.source(), "playback did not start, staying silent");
            Activation::Silent {
                reason: err.to_string(),
            }
        }
    }
}

/// Disconnects both nodes and closes the context, handing the media back.
fn teardown<C: ProcessingContext>(graph: AudioGraphHandle<C>) -> C::Media {
    let AudioGraphHandle {
        mut context,
        analyser,
        source,
        mut media,
    } = graph;

    media.pause();
    for node in [source, analyser] {
        if let Err(err) = context.disconnect(node) {
            tracing::warn!(%err, %node, "failed to disconnect audio node");
        }
    }
    if let Err(err) = context.close() {
        tracing::warn!(%err, "failed to close processing context");
    }
    media
}
