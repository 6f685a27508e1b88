use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    host::ProcessingContext, AudioGraphHandle, BeatDetector, Color, FrequencySampler,
};

/// Monotonic time source shared by playback and the frame loop.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock measured from its creation. Clones share the origin.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Per-frame scheduling primitive: yields control until the next frame and
/// returns its timestamp.
pub trait FrameClock {
    fn next_frame(&mut self) -> Duration;
}

/// Sleeps the current thread to hold a fixed frame rate. Late frames are not
/// made up for.
#[derive(Debug, Clone)]
pub struct RealtimeFrames {
    clock: SystemClock,
    interval: Duration,
    deadline: Duration,
}

impl RealtimeFrames {
    pub fn new(clock: SystemClock, interval: Duration) -> Self {
        Self {
            deadline: clock.now(),
            clock,
            interval,
        }
    }
}

impl FrameClock for RealtimeFrames {
    fn next_frame(&mut self) -> Duration {
        self.deadline += self.interval;
        let now = self.clock.now();
        if self.deadline > now {
            std::thread::sleep(self.deadline - now);
        } else {
            self.deadline = now;
        }
        self.clock.now()
    }
}

/// Advances a [`ManualClock`] by a fixed step per frame.
#[derive(Debug, Clone)]
pub struct SimulatedFrames {
    clock: ManualClock,
    interval: Duration,
}

impl SimulatedFrames {
    pub fn new(clock: ManualClock, interval: Duration) -> Self {
        Self { clock, interval }
    }

    /// 60 frames per second.
    pub fn sixty_hz(clock: ManualClock) -> Self {
        Self::new(clock, Duration::from_micros(16_667))
    }
}

impl FrameClock for SimulatedFrames {
    fn next_frame(&mut self) -> Duration {
        self.clock.advance(self.interval);
        self.clock.now()
    }
}

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The loop is not running; no further tick should be scheduled.
    Stopped,
    /// Sampled and classified, no beat.
    Quiet,
    /// A beat fired and the color policy picked this color.
    Beat(Color),
}

#[derive(Debug, Default)]
struct LoopFlags {
    running: Cell<bool>,
    generation: Cell<u64>,
}

/// Shared stop switch of a [`Scheduler`]. Every start and every stop opens a
/// new generation; a tick only reports results of the generation it began in.
#[derive(Debug, Clone, Default)]
pub struct LoopControl {
    flags: Rc<LoopFlags>,
}

impl LoopControl {
    pub fn is_running(&self) -> bool {
        self.flags.running.get()
    }

    /// Idempotent.
    pub fn stop(&self) {
        if self.flags.running.replace(false) {
            self.bump();
        }
    }

    fn arm(&self) {
        self.flags.running.set(true);
        self.bump();
    }

    fn generation(&self) -> u64 {
        self.flags.generation.get()
    }

    fn bump(&self) {
        self.flags.generation.set(self.flags.generation.get() + 1);
    }
}

/// Ties the frame cadence to beat detection.
///
/// Each tick pulls one sample, runs one detector step and, on a beat, asks
/// the color callback for the next background.
pub struct Scheduler {
    sampler: FrequencySampler,
    detector: BeatDetector,
    on_beat: Option<Box<dyn FnMut() -> Color>>,
    control: LoopControl,
    ticks: u64,
}

impl Scheduler {
    pub fn new(sampler: FrequencySampler, detector: BeatDetector) -> Self {
        Self {
            sampler,
            detector,
            on_beat: None,
            control: LoopControl::default(),
            ticks: 0,
        }
    }

    /// Arms the loop with a fresh detector state.
    pub fn start(&mut self, on_beat: impl FnMut() -> Color + 'static) {
        self.detector.reset();
        self.on_beat = Some(Box::new(on_beat));
        self.control.arm();
        tracing::debug!("beat scheduler armed");
    }

    /// Safe to call at any time, any number of times.
    pub fn stop(&mut self) {
        if self.control.is_running() {
            tracing::debug!(ticks = self.ticks, "beat scheduler stopped");
        }
        self.control.stop();
        self.on_beat = None;
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Handle that can stop the loop from inside the color callback or from
    /// any other code on the same thread.
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs one frame. `graph` is `None` until the audio graph exists, which
    /// reads as an empty sample and never as a beat.
    pub fn tick<C: ProcessingContext>(
        &mut self,
        graph: Option<&mut AudioGraphHandle<C>>,
        now: Duration,
    ) -> Tick {
        if !self.control.is_running() {
            return Tick::Stopped;
        }

        let generation = self.control.generation();
        self.ticks += 1;

        let sample = self.sampler.sample(graph);
        if !self.detector.step(&sample, now) {
            return Tick::Quiet;
        }

        let Some(on_beat) = self.on_beat.as_mut() else {
            return Tick::Quiet;
        };
        let color = on_beat();

        if self.control.generation() != generation {
            tracing::debug!(%color, "loop stopped during the beat callback, dropping color");
            return Tick::Stopped;
        }
        Tick::Beat(color)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("sampler", &self.sampler)
            .field("detector", &self.detector)
            .field("running", &self.control.is_running())
            .field("ticks", &self.ticks)
            .finish()
    }
}
