use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{
    host::{ContextState, ProcessingContext},
    AudioConfig, AudioGraphHandle, Result,
};

/// Per-bin energy of one analyser read, 0 to 255, lowest frequency first.
///
/// Samples are produced fresh every tick and dropped after the beat
/// detector has looked at them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencySample {
    bins: Vec<u8>,
}

impl FrequencySample {
    /// The sample reported while the graph is not ready.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    /// Lowest `1 / divisor` of the bins.
    pub fn bass_band(&self, divisor: usize) -> &[u8] {
        &self.bins[..self.bins.len() / divisor.max(1)]
    }
}

impl From<Vec<u8>> for FrequencySample {
    fn from(bins: Vec<u8>) -> Self {
        Self { bins }
    }
}

/// Parameters of an analyser node. Fixed once the node exists.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl AnalyserOptions {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for AnalyserOptions {
    fn from(config: &AudioConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            smoothing: config.smoothing,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }
}

/// Pulls one [`FrequencySample`] per call from the analyser of a graph.
///
/// The sampler never holds on to the graph; callers lend it for the duration
/// of a single read.
#[derive(Debug, Clone)]
pub struct FrequencySampler {
    bin_count: usize,
}

impl FrequencySampler {
    pub fn new(bin_count: usize) -> Self {
        Self { bin_count }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Reads the analyser of `graph`. A missing graph, a context that is not
    /// running, or a host read failure all yield an empty sample so the
    /// caller can simply retry on the next frame.
    pub fn sample<C: ProcessingContext>(
        &self,
        graph: Option<&mut AudioGraphHandle<C>>,
    ) -> FrequencySample {
        let Some(graph) = graph else {
            return FrequencySample::empty();
        };

        if graph.context.state() != ContextState::Running {
            return FrequencySample::empty();
        }

        let mut bins = vec![0; self.bin_count];
        match graph.context.byte_frequency_data(graph.analyser, &mut bins) {
            Ok(()) => FrequencySample::from(bins),
            Err(err) => {
                tracing::debug!(%err, "analyser not ready, reporting an empty sample");
                FrequencySample::empty()
            }
        }
    }
}

/// Frequency analyser with Web Audio conventions: Blackman window,
/// magnitudes averaged over time, decibels mapped linearly onto bytes.
pub struct AnalyserNode {
    options: AnalyserOptions,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

impl AnalyserNode {
    pub fn new(options: AnalyserOptions) -> Self {
        let size = options.fft_size;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let window = (0..size).map(|index| blackman_value(index, size)).collect();

        Self {
            smoothed: vec![0.0; options.bin_count()],
            options,
            plan,
            input,
            spectrum,
            scratch,
            window,
        }
    }

    pub fn options(&self) -> &AnalyserOptions {
        &self.options
    }

    /// Analyses the most recent `fft_size` values of `time_domain` and
    /// writes one byte per bin into `out`. Shorter input is treated as
    /// preceded by silence; bytes past the bin count are zeroed.
    pub fn process(&mut self, time_domain: &[f32], out: &mut [u8]) -> Result<()> {
        let size = self.options.fft_size;
        let recent = &time_domain[time_domain.len().saturating_sub(size)..];
        let offset = size - recent.len();

        self.input.fill(0.0);
        for (index, value) in recent.iter().enumerate() {
            let slot = offset + index;
            self.input[slot] = value * self.window[slot];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = 1.0 / size as f32;
        let smoothing = self.options.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
            let next = smoothing * *smoothed + (1.0 - smoothing) * bin.norm() * scale;
            *smoothed = if next.is_finite() { next } else { 0.0 };
        }

        out.fill(0);
        let min = self.options.min_decibels;
        let range = self.options.max_decibels - min;
        for (byte, magnitude) in out.iter_mut().zip(&self.smoothed) {
            *byte = magnitude_to_byte(*magnitude, min, range);
        }
        Ok(())
    }
}

impl fmt::Debug for AnalyserNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserNode")
            .field("options", &self.options)
            .finish()
    }
}

fn magnitude_to_byte(magnitude: f32, min_decibels: f32, range: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }

    let decibels = 20.0 * magnitude.log10();
    let scaled = 255.0 / range * (decibels - min_decibels);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let phase = 2.0 * PI * index as f32 / len as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}
