use std::{fmt, sync::Arc};

use image::Rgb;
use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{
    frame::{self, Frame},
    LampError, Result,
};

/// Lowest frequency shown by the spectral visualisation.
pub const LOW_HZ: f32 = 100.0;
/// Highest frequency shown by the spectral visualisation.
pub const HIGH_HZ: f32 = 2000.0;

/// Inferno colour map sampled at nine evenly spaced stops.
const INFERNO: [[f32; 3]; 9] = [
    [0.0, 0.0, 4.0],
    [21.0, 11.0, 52.0],
    [66.0, 10.0, 104.0],
    [106.0, 23.0, 110.0],
    [147.0, 38.0, 103.0],
    [188.0, 55.0, 84.0],
    [221.0, 81.0, 58.0],
    [243.0, 120.0, 25.0],
    [252.0, 255.0, 164.0],
];

/// Maps an intensity in `[0, 1]` to an inferno colour.
pub fn inferno(value: f32) -> [u8; 3] {
    let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = value * (INFERNO.len() - 1) as f32;
    let index = (scaled.floor() as usize).min(INFERNO.len() - 2);
    let t = scaled - index as f32;
    let (a, b) = (INFERNO[index], INFERNO[index + 1]);
    [0, 1, 2].map(|c| (a[c] + (b[c] - a[c]) * t).round() as u8)
}

/// Turns blocks of mono samples into one display row each: magnitudes of
/// the 100 Hz - 2 kHz band, mirrored around the centre column.
pub struct SpectralAnalyzer {
    width: usize,
    sample_rate: u32,
    gain: f32,
    low_bin: usize,
    fft: FftResources,
}

impl SpectralAnalyzer {
    pub fn new(width: u32, sample_rate: u32, gain: f32) -> Result<Self> {
        let half = width as usize / 2;
        if half < 2 {
            return Err(LampError::msg(format!(
                "spectral display needs at least 4 columns, got {width}"
            )));
        }
        if sample_rate == 0 {
            return Err(LampError::msg("sample rate must be positive"));
        }

        let delta_f = (HIGH_HZ - LOW_HZ) / (half - 1) as f32;
        let size = (sample_rate as f32 / delta_f).ceil() as usize;
        let low_bin = (LOW_HZ / delta_f).floor() as usize;

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let fft = FftResources {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            width: width as usize,
            sample_rate,
            gain,
            low_bin,
            fft,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft.size
    }

    pub fn low_bin(&self) -> usize {
        self.low_bin
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Intensities in `[0, 1]` for every column, or `None` for a silent block.
    pub fn intensities(&mut self, samples: &[f32]) -> Result<Option<Vec<f32>>> {
        if samples.iter().all(|s| *s == 0.0) {
            return Ok(None);
        }

        let fft = &mut self.fft;
        let used = samples.len().min(fft.size);
        fft.input[..used].copy_from_slice(&samples[..used]);
        fft.input[used..].fill(0.0);
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let half = self.width / 2;
        let scale = self.gain / fft.size as f32;
        let band: Vec<f32> = (self.low_bin..self.low_bin + half)
            .map(|bin| {
                fft.spectrum
                    .get(bin)
                    .map(|c| (c.norm() * scale).clamp(0.0, 1.0))
                    .unwrap_or(0.0)
            })
            .collect();

        let mut line: Vec<f32> = band.iter().rev().chain(band.iter()).copied().collect();
        line.resize(self.width, 0.0);
        Ok(Some(line))
    }

    /// One coloured display row for the block, or `None` for silence.
    pub fn line(&mut self, samples: &[f32]) -> Result<Option<Vec<[u8; 3]>>> {
        Ok(self
            .intensities(samples)?
            .map(|values| values.into_iter().map(inferno).collect()))
    }
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("width", &self.width)
            .field("sample_rate", &self.sample_rate)
            .field("gain", &self.gain)
            .field("low_bin", &self.low_bin)
            .field("fft", &self.fft)
            .finish()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Scrolling spectrogram: the newest line is row 0, older rows move down
/// and fall off the bottom.
#[derive(Debug, Clone)]
pub struct ScrollCanvas {
    frame: Frame,
}

impl ScrollCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: frame::blank(width, height),
        }
    }

    pub fn push_line(&mut self, line: &[[u8; 3]]) {
        let row_bytes = self.frame.width() as usize * 3;
        let raw: &mut [u8] = &mut self.frame;
        let len = raw.len();
        if len > row_bytes {
            raw.copy_within(0..len - row_bytes, row_bytes);
        }
        for x in 0..self.frame.width() {
            let color = line.get(x as usize).copied().unwrap_or([0, 0, 0]);
            self.frame.put_pixel(x, 0, Rgb(color));
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}
