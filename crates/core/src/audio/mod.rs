//! In-process implementation of the host capabilities.
//!
//! A [`PcmPlayer`] plays a decoded [`PcmTrack`] against a [`Clock`], and a
//! [`SoftwareContext`] routes it through an [`AnalyserNode`]. The app binary
//! runs party mode on top of it, and the tests drive it with a
//! [`crate::ManualClock`].

use std::{
    cell::RefCell,
    path::Path,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use crate::{
    host::{AudioHost, ContextState, MediaElement, NodeId, ProcessingContext},
    AnalyserNode, AnalyserOptions, Clock, PartyError, Result,
};

/// Mono PCM audio held in memory.
#[derive(Debug, Clone)]
pub struct PcmTrack {
    source: String,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl PcmTrack {
    pub fn from_samples(source: impl Into<String>, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            source: source.into(),
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    /// Decodes a WAV file, mixing all channels down to mono.
    pub fn from_wav_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let channels = usize::from(spec.channels.max(1));
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            "decoded track"
        );
        Ok(Self::from_samples(
            path.display().to_string(),
            spec.sample_rate,
            samples,
        ))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Playback state shared between a player and the source node reading it.
struct Transport {
    track: PcmTrack,
    clock: Rc<dyn Clock>,
    looping: bool,
    autoplay_blocked: bool,
    playing: bool,
    offset: Duration,
    resumed_at: Duration,
    source_attached: bool,
}

impl Transport {
    fn position(&self) -> Duration {
        if self.playing {
            self.offset + self.clock.now().saturating_sub(self.resumed_at)
        } else {
            self.offset
        }
    }

    fn ended(&self) -> bool {
        !self.looping && self.position() >= self.track.duration()
    }

    fn is_audible(&self) -> bool {
        self.playing && !self.ended()
    }

    /// Copies the samples that played just before the playhead into `out`.
    /// Anything not playing reads as silence.
    fn fill_window(&self, out: &mut [f32]) {
        out.fill(0.0);
        let samples = &self.track.samples;
        if !self.is_audible() || samples.is_empty() {
            return;
        }

        let head = (self.position().as_nanos() * u128::from(self.track.sample_rate)
            / 1_000_000_000) as u64;
        let len = samples.len() as u64;
        let first = head.saturating_sub(out.len() as u64);
        let skip = out.len() - (head - first) as usize;

        for (slot, index) in out[skip..].iter_mut().zip(first..head) {
            *slot = if self.looping {
                samples[(index % len) as usize]
            } else if index < len {
                samples[index as usize]
            } else {
                0.0
            };
        }
    }
}

/// [`MediaElement`] that plays a [`PcmTrack`] in step with a [`Clock`].
pub struct PcmPlayer {
    source: String,
    transport: Rc<RefCell<Transport>>,
}

impl PcmPlayer {
    pub fn new(track: PcmTrack, clock: Rc<dyn Clock>) -> Self {
        let source = track.source().to_string();
        let transport = Transport {
            track,
            clock,
            looping: false,
            autoplay_blocked: false,
            playing: false,
            offset: Duration::ZERO,
            resumed_at: Duration::ZERO,
            source_attached: false,
        };
        Self {
            source,
            transport: Rc::new(RefCell::new(transport)),
        }
    }

    /// While blocked, [`MediaElement::play`] fails the way a browser refuses
    /// playback without a user gesture.
    pub fn set_autoplay_blocked(&mut self, blocked: bool) {
        self.transport.borrow_mut().autoplay_blocked = blocked;
    }

    pub fn position(&self) -> Duration {
        self.transport.borrow().position()
    }

    pub fn is_looping(&self) -> bool {
        self.transport.borrow().looping
    }
}

impl MediaElement for PcmPlayer {
    fn source(&self) -> &str {
        &self.source
    }

    fn set_looping(&mut self, looping: bool) {
        let mut transport = self.transport.borrow_mut();
        let position = transport.position();
        let now = transport.clock.now();
        transport.offset = position;
        transport.resumed_at = now;
        transport.looping = looping;
    }

    fn play(&mut self) -> Result<()> {
        let mut transport = self.transport.borrow_mut();
        if transport.autoplay_blocked {
            return Err(PartyError::PlaybackDenied(format!(
                "`{}` cannot start without a user gesture",
                self.source
            )));
        }
        if transport.is_audible() {
            return Ok(());
        }

        let offset = if transport.ended() {
            Duration::ZERO
        } else {
            transport.position()
        };
        let now = transport.clock.now();
        transport.offset = offset;
        transport.resumed_at = now;
        transport.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        let mut transport = self.transport.borrow_mut();
        if transport.playing {
            let position = transport.position();
            transport.offset = position;
            transport.playing = false;
        }
    }

    fn is_playing(&self) -> bool {
        self.transport.borrow().is_audible()
    }
}

impl std::fmt::Debug for PcmPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmPlayer")
            .field("source", &self.source)
            .field("playing", &self.is_playing())
            .finish()
    }
}

enum Node {
    Source(Rc<RefCell<Transport>>),
    Analyser(AnalyserNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Node(NodeId),
    Destination,
}

/// Processing graph for [`PcmPlayer`] media.
pub struct SoftwareContext {
    state: ContextState,
    nodes: Vec<Node>,
    edges: Vec<(NodeId, Endpoint)>,
    window: Vec<f32>,
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self {
            state: ContextState::Running,
            nodes: Vec::new(),
            edges: Vec::new(),
            window: Vec::new(),
        }
    }

    /// Puts a running context to sleep, as hosts do with idle contexts.
    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    /// Number of source nodes currently feeding an analyser.
    pub fn connected_sources(&self) -> usize {
        self.edges
            .iter()
            .filter(|(from, to)| self.is_source(*from) && self.is_analyser_endpoint(*to))
            .count()
    }

    pub fn is_connected_to_destination(&self, node: NodeId) -> bool {
        self.edges.contains(&(node, Endpoint::Destination))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.raw() as usize)
            .ok_or(PartyError::UnknownNode(id))
    }

    fn is_source(&self, id: NodeId) -> bool {
        matches!(self.node(id), Ok(Node::Source(_)))
    }

    fn is_analyser_endpoint(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Node(id) => matches!(self.node(id), Ok(Node::Analyser(_))),
            Endpoint::Destination => false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ContextState::Closed {
            Err(PartyError::GraphClosed)
        } else {
            Ok(())
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingContext for SoftwareContext {
    type Media = PcmPlayer;

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = ContextState::Running;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        for node in &self.nodes {
            if let Node::Source(transport) = node {
                transport.borrow_mut().source_attached = false;
            }
        }
        self.nodes.clear();
        self.edges.clear();
        self.state = ContextState::Closed;
        Ok(())
    }

    fn create_media_source(&mut self, media: &PcmPlayer) -> Result<NodeId> {
        self.ensure_open()?;
        {
            let mut transport = media.transport.borrow_mut();
            if transport.source_attached {
                return Err(PartyError::SourceAlreadyAttached(media.source.clone()));
            }
            transport.source_attached = true;
        }
        Ok(self.push(Node::Source(Rc::clone(&media.transport))))
    }

    fn create_analyser(&mut self, options: &AnalyserOptions) -> Result<NodeId> {
        self.ensure_open()?;
        Ok(self.push(Node::Analyser(AnalyserNode::new(options.clone()))))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.node(from)?;
        self.node(to)?;

        let endpoint = Endpoint::Node(to);
        if self.edges.contains(&(from, endpoint)) {
            return Err(PartyError::AlreadyConnected(from));
        }
        if self.is_source(from) && self.is_analyser_endpoint(endpoint) {
            let fed = self
                .edges
                .iter()
                .any(|(other, target)| *target == endpoint && self.is_source(*other));
            if fed {
                return Err(PartyError::AlreadyConnected(to));
            }
        }

        self.edges.push((from, endpoint));
        Ok(())
    }

    fn connect_to_destination(&mut self, from: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.node(from)?;
        if self.is_connected_to_destination(from) {
            return Err(PartyError::AlreadyConnected(from));
        }
        self.edges.push((from, Endpoint::Destination));
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.node(node)?;
        self.edges.retain(|(from, _)| *from != node);
        Ok(())
    }

    fn byte_frequency_data(&mut self, analyser: NodeId, out: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        if self.state != ContextState::Running {
            return Err(PartyError::NotReady("processing context is suspended".into()));
        }

        let input = self.edges.iter().find_map(|(from, to)| match self.node(*from) {
            Ok(Node::Source(transport)) if *to == Endpoint::Node(analyser) => {
                Some(Rc::clone(transport))
            }
            _ => None,
        });

        let Self { nodes, window, .. } = self;
        let Some(Node::Analyser(node)) = nodes.get_mut(analyser.raw() as usize) else {
            return Err(PartyError::UnknownNode(analyser));
        };

        window.resize(node.options().fft_size, 0.0);
        match input {
            Some(transport) => transport.borrow().fill_window(window.as_mut_slice()),
            None => window.fill(0.0),
        }
        node.process(window.as_slice(), out)
    }
}

impl std::fmt::Debug for SoftwareContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareContext")
            .field("state", &self.state)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges)
            .finish()
    }
}

/// Hands out [`SoftwareContext`]s and counts them.
#[derive(Debug, Default)]
pub struct SoftwareHost {
    contexts_created: usize,
    fail_next: bool,
}

impl SoftwareHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created
    }

    /// Makes the next context request fail, as a host without a usable
    /// output device would.
    pub fn fail_next_context(&mut self) {
        self.fail_next = true;
    }
}

impl AudioHost for SoftwareHost {
    type Media = PcmPlayer;
    type Context = SoftwareContext;

    fn create_context(&mut self) -> Result<SoftwareContext> {
        if std::mem::take(&mut self.fail_next) {
            return Err(PartyError::msg("no audio output device available"));
        }
        self.contexts_created += 1;
        Ok(SoftwareContext::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn ramp_player(clock: &ManualClock) -> PcmPlayer {
        // One second at 1 kHz, sample value = index / 1000.
        let samples = (0..1_000).map(|n| n as f32 / 1_000.0).collect();
        let track = PcmTrack::from_samples("ramp.wav", 1_000, samples);
        PcmPlayer::new(track, Rc::new(clock.clone()))
    }

    fn window(player: &PcmPlayer, len: usize) -> Vec<f32> {
        let mut out = vec![f32::NAN; len];
        player.transport.borrow().fill_window(&mut out);
        out
    }

    #[test]
    fn playhead_follows_the_clock() {
        let clock = ManualClock::new();
        let mut player = ramp_player(&clock);
        player.play().unwrap();
        clock.advance(ms(250));
        assert_eq!(player.position(), ms(250));

        player.pause();
        clock.advance(ms(500));
        assert_eq!(player.position(), ms(250));
        assert!(!player.is_playing());
        assert!(window(&player, 4).iter().all(|&value| value == 0.0));
    }

    #[test]
    fn window_ends_at_the_playhead() {
        let clock = ManualClock::new();
        let mut player = ramp_player(&clock);
        player.play().unwrap();

        clock.advance(ms(2));
        assert_eq!(window(&player, 4), vec![0.0, 0.0, 0.0, 0.001]);

        clock.advance(ms(98));
        assert_eq!(window(&player, 2), vec![0.098, 0.099]);
    }

    #[test]
    fn looping_wraps_around() {
        let clock = ManualClock::new();
        let mut player = ramp_player(&clock);
        player.set_looping(true);
        player.play().unwrap();

        clock.advance(ms(1_002));
        assert!(player.is_playing());
        assert_eq!(window(&player, 4), vec![0.998, 0.999, 0.0, 0.001]);
    }

    #[test]
    fn one_shot_playback_ends_and_restarts() {
        let clock = ManualClock::new();
        let mut player = ramp_player(&clock);
        player.play().unwrap();
        clock.advance(ms(1_500));
        assert!(!player.is_playing());
        assert!(window(&player, 4).iter().all(|&value| value == 0.0));

        player.play().unwrap();
        clock.advance(ms(10));
        assert_eq!(player.position(), ms(10));
    }

    #[test]
    fn blocked_autoplay_denies_playback() {
        let clock = ManualClock::new();
        let mut player = ramp_player(&clock);
        player.set_autoplay_blocked(true);
        let err = player.play().unwrap_err();
        assert!(matches!(err, PartyError::PlaybackDenied(_)));
        assert!(!player.is_playing());

        player.set_autoplay_blocked(false);
        player.play().unwrap();
        assert!(player.is_playing());
    }

    #[test]
    fn media_feeds_at_most_one_source_node() {
        let clock = ManualClock::new();
        let player = ramp_player(&clock);
        let mut context = SoftwareContext::new();
        context.create_media_source(&player).unwrap();

        let err = context.create_media_source(&player).unwrap_err();
        assert!(matches!(err, PartyError::SourceAlreadyAttached(_)));

        let mut other = SoftwareContext::new();
        assert!(other.create_media_source(&player).is_err());
        context.close().unwrap();
        assert!(other.create_media_source(&player).is_ok());
    }

    #[test]
    fn analyser_refuses_a_second_source() {
        let clock = ManualClock::new();
        let first = ramp_player(&clock);
        let second = ramp_player(&clock);
        let mut context = SoftwareContext::new();
        let a = context.create_media_source(&first).unwrap();
        let b = context.create_media_source(&second).unwrap();
        let analyser = context.create_analyser(&AnalyserOptions::default()).unwrap();

        context.connect(a, analyser).unwrap();
        assert!(matches!(
            context.connect(a, analyser),
            Err(PartyError::AlreadyConnected(_))
        ));
        assert!(matches!(
            context.connect(b, analyser),
            Err(PartyError::AlreadyConnected(_))
        ));
        assert_eq!(context.connected_sources(), 1);

        context.disconnect(a).unwrap();
        context.connect(b, analyser).unwrap();
        assert_eq!(context.connected_sources(), 1);
    }

    #[test]
    fn suspended_context_is_not_ready() {
        let mut context = SoftwareContext::new();
        let analyser = context.create_analyser(&AnalyserOptions::default()).unwrap();
        let mut out = vec![0u8; 256];
        context.byte_frequency_data(analyser, &mut out).unwrap();

        context.suspend();
        assert!(matches!(
            context.byte_frequency_data(analyser, &mut out),
            Err(PartyError::NotReady(_))
        ));
        context.resume().unwrap();
        assert!(context.byte_frequency_data(analyser, &mut out).is_ok());
    }

    #[test]
    fn closed_context_fails_fast() {
        let mut context = SoftwareContext::new();
        context.close().unwrap();
        assert_eq!(context.state(), ContextState::Closed);
        assert!(matches!(context.resume(), Err(PartyError::GraphClosed)));
        assert!(matches!(
            context.create_analyser(&AnalyserOptions::default()),
            Err(PartyError::GraphClosed)
        ));
        assert!(matches!(context.close(), Err(PartyError::GraphClosed)));
    }

    #[test]
    fn host_counts_contexts() {
        let mut host = SoftwareHost::new();
        let _first = host.create_context().unwrap();
        let _second = host.create_context().unwrap();
        assert_eq!(host.contexts_created(), 2);

        host.fail_next_context();
        assert!(matches!(host.create_context(), Err(PartyError::Message(_))));
        assert!(host.create_context().is_ok());
        assert_eq!(host.contexts_created(), 3);
    }

    #[test]
    fn decodes_stereo_wav_to_mono() {
        let path = std::env::temp_dir().join(format!(
            "party-picker-decode-{}.wav",
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16_384_i16).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let track = PcmTrack::from_wav_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(track.sample_rate(), 8_000);
        assert_eq!(track.len(), 100);
        assert_eq!(track.duration(), Duration::from_secs_f64(100.0 / 8_000.0));
        assert!(track.source().ends_with(".wav"));
    }
}
