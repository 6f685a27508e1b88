use std::{cell::RefCell, rc::Rc, time::Duration};

use crate::{
    host::AudioHost, Activation, AudioGraphLifecycle, Color, ColorPolicy, FrameClock, Result,
    Tick,
};

/// Whether party mode is on, as far as the UI is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartyModeState {
    #[default]
    Off,
    Running,
}

/// Owner of everything party mode needs: the audio graph lifecycle, the
/// current background and the policy choosing colors on beats.
pub struct PartyMode<H: AudioHost> {
    lifecycle: AudioGraphLifecycle<H>,
    state: PartyModeState,
    background: Color,
    policy: Rc<RefCell<dyn ColorPolicy>>,
}

impl<H: AudioHost> PartyMode<H> {
    pub fn new(
        lifecycle: AudioGraphLifecycle<H>,
        policy: impl ColorPolicy + 'static,
        background: Color,
    ) -> Self {
        Self {
            lifecycle,
            state: PartyModeState::Off,
            background,
            policy: Rc::new(RefCell::new(policy)),
        }
    }

    pub fn state(&self) -> PartyModeState {
        self.state
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Hand-off point for colors picked outside party mode.
    pub fn set_background(&mut self, color: Color) {
        self.background = color;
    }

    pub fn lifecycle(&self) -> &AudioGraphLifecycle<H> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut AudioGraphLifecycle<H> {
        &mut self.lifecycle
    }

    /// Turns party mode on. Calling it again while running retries playback,
    /// which is how a user gesture recovers from a denied start.
    pub fn start(&mut self) -> Result<Activation> {
        let policy = Rc::clone(&self.policy);
        let activation = self
            .lifecycle
            .activate(move || policy.borrow_mut().next_color())?;
        self.state = PartyModeState::Running;
        tracing::info!(?activation, "party mode on");
        Ok(activation)
    }

    /// Turns party mode off. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.lifecycle.deactivate()?;
        if self.state == PartyModeState::Running {
            tracing::info!(background = %self.background, "party mode off");
        }
        self.state = PartyModeState::Off;
        Ok(())
    }

    /// Flips between Off and Running, returning the new state.
    pub fn toggle(&mut self) -> Result<PartyModeState> {
        match self.state {
            PartyModeState::Off => {
                self.start()?;
            }
            PartyModeState::Running => self.stop()?,
        }
        Ok(self.state)
    }

    /// Runs one frame and applies the beat color, if any.
    ///
    /// A loop stopped through its [`crate::LoopControl`] while party mode is
    /// on switches party mode off, so playback never outlives the loop.
    pub fn frame(&mut self, now: Duration) -> Result<Option<Color>> {
        match self.lifecycle.tick(now)? {
            Tick::Beat(color) if self.state == PartyModeState::Running => {
                self.background = color;
                Ok(Some(color))
            }
            Tick::Stopped if self.state == PartyModeState::Running => {
                tracing::info!("beat loop stopped from outside, leaving party mode");
                self.stop()?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Drives up to `limit` frames from `frames` while party mode is on and
    /// calls `on_color` for every beat. Returns the number of beats.
    pub fn run<F: FrameClock>(
        &mut self,
        frames: &mut F,
        limit: usize,
        mut on_color: impl FnMut(Duration, Color),
    ) -> Result<usize> {
        let mut beats = 0;
        for _ in 0..limit {
            let running = self.state == PartyModeState::Running
                && self.lifecycle.scheduler().is_running();
            if !running {
                break;
            }
            let now = frames.next_frame();
            if let Some(color) = self.frame(now)? {
                beats += 1;
                on_color(now, color);
            }
        }
        Ok(beats)
    }

    /// Releases the audio graph for good.
    pub fn shutdown(&mut self) -> Result<()> {
        self.state = PartyModeState::Off;
        self.lifecycle.shutdown()
    }
}

impl<H: AudioHost> std::fmt::Debug for PartyMode<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyMode")
            .field("state", &self.state)
            .field("background", &self.background)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
