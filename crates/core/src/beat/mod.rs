use std::time::Duration;

use crate::{DetectorConfig, FrequencySample};

/// Rolling state carried from one tick to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeatDetectorState {
    pub last_volume: f32,
    pub cooling_down: bool,
}

/// Mean energy of the bass band; an empty band averages to zero.
pub fn bass_average(sample: &FrequencySample, bass_divisor: usize) -> f32 {
    let band = sample.bass_band(bass_divisor);
    if band.is_empty() {
        return 0.0;
    }

    let sum: u32 = band.iter().map(|&value| u32::from(value)).sum();
    sum as f32 / band.len() as f32
}

/// One detection step. Pure: the result depends only on the arguments.
///
/// A beat needs the bass average to rise more than `threshold` above the
/// tracked volume, to exceed `minimum_floor`, and the detector must not be
/// cooling down. A beat records the new volume and starts the cooldown;
/// otherwise a falling average pulls the tracked volume down with it.
pub fn detect(
    sample: &FrequencySample,
    state: BeatDetectorState,
    config: &DetectorConfig,
) -> (bool, BeatDetectorState) {
    let average = bass_average(sample, config.bass_divisor);
    let is_beat = average > state.last_volume + config.threshold
        && average > config.minimum_floor
        && !state.cooling_down;

    if is_beat {
        return (
            true,
            BeatDetectorState {
                last_volume: average,
                cooling_down: true,
            },
        );
    }

    let mut next = state;
    if average < state.last_volume {
        next.last_volume = average;
    }
    (false, next)
}

/// Stateful wrapper around [`detect`] that owns the cooldown timer.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: DetectorConfig,
    state: BeatDetectorState,
    cooldown_until: Option<Duration>,
}

impl BeatDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: BeatDetectorState::default(),
            cooldown_until: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> BeatDetectorState {
        self.state
    }

    /// Back to `{ last_volume: 0, cooling_down: false }` with no pending
    /// cooldown.
    pub fn reset(&mut self) {
        self.state = BeatDetectorState::default();
        self.cooldown_until = None;
    }

    /// Classifies `sample` observed at `now`.
    pub fn step(&mut self, sample: &FrequencySample, now: Duration) -> bool {
        if let Some(deadline) = self.cooldown_until {
            if now >= deadline {
                self.state.cooling_down = false;
                self.cooldown_until = None;
            }
        }

        let (is_beat, next) = detect(sample, self.state, &self.config);
        self.state = next;
        if is_beat {
            self.cooldown_until = Some(now + self.config.cooldown());
        }
        is_beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 32 bins whose bass band (first four bins) holds `bass`.
    fn sample(bass: [u8; 4]) -> FrequencySample {
        let mut bins = vec![200; 32];
        bins[..4].copy_from_slice(&bass);
        FrequencySample::from(bins)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn fires_on_a_rising_bass_band() {
        let config = DetectorConfig::default();
        let silence = sample([0, 0, 0, 0]);
        let (quiet, state) = detect(&silence, BeatDetectorState::default(), &config);
        assert!(!quiet);

        let (beat, state) = detect(&sample([50, 60, 55, 45]), state, &config);
        assert!(beat);
        assert!((state.last_volume - 52.5).abs() < 1e-6);
        assert!(state.cooling_down);
    }

    #[test]
    fn cooling_down_blocks_an_otherwise_valid_beat() {
        let config = DetectorConfig::default();
        let state = BeatDetectorState {
            last_volume: 0.0,
            cooling_down: true,
        };
        let (beat, next) = detect(&sample([50, 60, 55, 45]), state, &config);
        assert!(!beat);
        assert_eq!(next, state);
    }

    #[test]
    fn silence_never_fires() {
        let config = DetectorConfig {
            threshold: -100.0,
            minimum_floor: 30.0,
            ..Default::default()
        };
        for last_volume in [0.0, 5.0, 80.0, 255.0] {
            let state = BeatDetectorState {
                last_volume,
                cooling_down: false,
            };
            let (beat, _) = detect(&sample([0, 0, 0, 0]), state, &config);
            assert!(!beat, "fired from last_volume {last_volume}");
        }
    }

    #[test]
    fn floor_suppresses_quiet_rises() {
        let config = DetectorConfig::default();
        let quiet = sample([25, 25, 25, 25]);
        let (beat, state) = detect(&quiet, BeatDetectorState::default(), &config);
        assert!(!beat);
        assert_eq!(state.last_volume, 0.0);
    }

    #[test]
    fn falling_volume_is_tracked_exactly() {
        let config = DetectorConfig::default();
        let state = BeatDetectorState {
            last_volume: 120.0,
            cooling_down: true,
        };
        let (beat, next) = detect(&sample([40, 41, 42, 43]), state, &config);
        assert!(!beat);
        assert_eq!(next.last_volume, 41.5);
        assert!(next.cooling_down);
    }

    #[test]
    fn small_rise_keeps_the_tracked_volume() {
        let config = DetectorConfig::default();
        let state = BeatDetectorState {
            last_volume: 50.0,
            cooling_down: false,
        };
        let (beat, next) = detect(&sample([55, 55, 55, 55]), state, &config);
        assert!(!beat);
        assert_eq!(next.last_volume, 50.0);
    }

    #[test]
    fn empty_band_averages_to_zero() {
        assert_eq!(bass_average(&FrequencySample::empty(), 8), 0.0);
        assert_eq!(bass_average(&FrequencySample::from(vec![255; 7]), 8), 0.0);
    }

    #[test]
    fn detection_is_deterministic() {
        let config = DetectorConfig::default();
        let state = BeatDetectorState {
            last_volume: 12.0,
            cooling_down: false,
        };
        let input = sample([90, 10, 70, 30]);
        assert_eq!(detect(&input, state, &config), detect(&input, state, &config));
    }

    #[test]
    fn cooldown_window_suppresses_the_second_beat() {
        let mut detector = BeatDetector::new(DetectorConfig::default());
        assert!(!detector.step(&sample([0, 0, 0, 0]), ms(0)));
        assert!(detector.step(&sample([50, 60, 55, 45]), ms(16)));
        assert!(!detector.step(&sample([50, 60, 55, 45]), ms(33)));
        assert!(detector.state().cooling_down);

        // Still inside the window even though the rise is large.
        assert!(!detector.step(&sample([250, 250, 250, 250]), ms(150)));
    }

    #[test]
    fn cooldown_expires_after_the_window() {
        let mut detector = BeatDetector::new(DetectorConfig::default());
        assert!(detector.step(&sample([50, 60, 55, 45]), ms(0)));
        assert!(!detector.step(&sample([10, 10, 10, 10]), ms(100)));
        assert_eq!(detector.state().last_volume, 10.0);

        assert!(detector.step(&sample([90, 90, 90, 90]), ms(150)));
    }

    #[test]
    fn reset_clears_volume_and_cooldown() {
        let mut detector = BeatDetector::new(DetectorConfig::default());
        assert!(detector.step(&sample([50, 60, 55, 45]), ms(0)));
        detector.reset();
        assert_eq!(detector.state(), BeatDetectorState::default());
        assert!(detector.step(&sample([50, 60, 55, 45]), ms(10)));
    }
}
