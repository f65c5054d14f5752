//! Sample rate conversion.
//!
//! `Decimator` is the streaming, allocation-free path used on the audio thread to feed
//! the wake word detector. `resample` converts whole clips (synthesized speech) off the
//! real-time path.

use anyhow::{anyhow, Context, Result};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Integer-factor downsampler with a two-stage Butterworth anti-alias filter.
pub struct Decimator {
    stages: [DirectForm2Transposed<f32>; 2],
    factor: usize,
    phase: usize,
}

impl Decimator {
    /// Creates a decimator from `input_rate` down to `input_rate / factor`.
    pub fn new(input_rate: u32, factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(anyhow!("decimation factor must be positive"));
        }
        // Cut off a little below the new Nyquist frequency
        let cutoff = input_rate as f32 / factor as f32 * 0.45;
        let coeffs = Coefficients::<f32>::from_params(
            Type::LowPass,
            input_rate.hz(),
            cutoff.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|e| anyhow!("Failed to create anti-alias filter: {:?}", e))?;

        Ok(Self {
            stages: [
                DirectForm2Transposed::<f32>::new(coeffs),
                DirectForm2Transposed::<f32>::new(coeffs),
            ],
            factor,
            phase: 0,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Filters `input` and hands every `factor`-th sample to `emit`.
    ///
    /// Phase is carried across calls, so block boundaries do not disturb the output rate.
    pub fn process(&mut self, input: &[i16], mut emit: impl FnMut(i16)) {
        for &sample in input {
            let mut x = f32::from(sample);
            for stage in self.stages.iter_mut() {
                x = stage.run(x);
            }
            if self.phase == 0 {
                emit(x.clamp(-32768.0, 32767.0) as i16);
            }
            self.phase = (self.phase + 1) % self.factor;
        }
    }

    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset_state();
        }
        self.phase = 0;
    }
}

/// Resamples a whole mono clip from `from_rate` to `to_rate`.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(anyhow!("invalid sample rates {} -> {}", from_rate, to_rate));
    }

    let input: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, input.len(), 1)
            .context("Resampler init failed")?;

    let output = resampler
        .process(&[&input], None)
        .context("Resampling failed")?;

    Ok(output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect())
}
