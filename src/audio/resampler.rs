//! Sample-rate conversion for the capture path.
//!
//! The capture graph runs at its native rate (typically 48 kHz) while the
//! recognition service expects 16 kHz. Conversion is linear interpolation
//! with a fractional read position carried across calls, so a continuous
//! input stream loses and duplicates nothing at block boundaries.

/// Linear-interpolation resampler for mono f32 audio.
pub struct LinearResampler {
    /// Input samples advanced per output sample.
    step: f64,
    /// Fractional read position into `pending`.
    pos: f64,
    /// Unconsumed input samples.
    pending: Vec<f32>,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
            pending: Vec::new(),
        }
    }

    /// Resample a block of mono samples at the input rate.
    ///
    /// Interpolation needs one sample of lookahead, so the last input
    /// sample of each call is held until the next call (or `flush`).
    pub fn resample(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        while (self.pos as usize) + 1 < self.pending.len() {
            let base = self.pos as usize;
            let frac = (self.pos - base as f64) as f32;
            let a = self.pending[base];
            let b = self.pending[base + 1];
            output.push(a + (b - a) * frac);
            self.pos += self.step;
        }

        // Retire fully consumed input, keeping the fractional remainder.
        let consumed = (self.pos as usize).min(self.pending.len());
        if consumed > 0 {
            self.pending.drain(..consumed);
            self.pos -= consumed as f64;
        }

        output
    }

    /// Drain the held lookahead sample at end of stream.
    pub fn flush(&mut self) -> Vec<f32> {
        let mut output = Vec::new();
        while (self.pos as usize) < self.pending.len() {
            let base = self.pos as usize;
            output.push(self.pending[base]);
            self.pos += self.step;
        }
        self.reset();
        output
    }

    /// Clear carried state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pos = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_count_tracks_ratio() {
        let mut resampler = LinearResampler::new(48000, 16000);

        // One second of input in uneven blocks.
        let mut produced = 0usize;
        let mut remaining = 48000usize;
        let mut block = 941usize;
        while remaining > 0 {
            let n = block.min(remaining);
            produced += resampler.resample(&vec![0.25; n]).len();
            remaining -= n;
            block = (block % 997) + 64;
        }
        produced += resampler.flush().len();

        // One second at 16 kHz, within one frame of tolerance.
        assert!(
            (produced as i64 - 16000).unsigned_abs() <= 320,
            "expected ~16000 samples, got {}",
            produced
        );
    }

    #[test]
    fn test_no_boundary_discontinuity() {
        // A ramp resampled in two halves must stay monotonic across the
        // block boundary.
        let ramp: Vec<f32> = (0..9600).map(|i| i as f32 / 9600.0).collect();
        let mut resampler = LinearResampler::new(48000, 16000);
        let mut output = resampler.resample(&ramp[..4800]);
        output.extend(resampler.resample(&ramp[4800..]));
        output.extend(resampler.flush());

        for pair in output.windows(2) {
            assert!(pair[1] >= pair[0], "ramp went backwards: {:?}", pair);
        }
    }

    #[test]
    fn test_identity_rate() {
        let mut resampler = LinearResampler::new(16000, 16000);
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut output = resampler.resample(&input);
        output.extend(resampler.flush());
        assert_eq!(output.len(), 100);
        for (i, sample) in output.iter().enumerate() {
            assert!((sample - i as f32).abs() < 1e-3);
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut resampler = LinearResampler::new(48000, 16000);
        resampler.resample(&[1.0; 100]);
        resampler.reset();
        assert!(resampler.flush().is_empty());
    }
}
