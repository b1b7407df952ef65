// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `psychohaptic` module estimates how much quantization noise each wavelet sub-band can
//! hide.
//!
//! For a block of time-domain samples the model returns, per sub-band, the signal energy and
//! the signal-to-mask ratio (SMR). The mask is the pointwise maximum of a fixed perceptual
//! threshold curve and a spreading function applied to the detected spectral peaks.

use num_complex::Complex;

use haptika_core::dsp::fft::Fft;
use haptika_core::dsp::wavelet::Codebook;

/// dB factor of energy ratios.
const LOG_FACTOR: f64 = 10.0;

/// dB factor of the magnitude spectrum.
const SPECT_FACTOR: f64 = 20.0;

/// Peaks below the spectrum maximum by more than this many dB are ignored.
const MIN_PEAK_HEIGHT_DIFF: f64 = 40.0;

/// Minimum prominence of a retained peak, in dB.
const MIN_PEAK_PROMINENCE: f64 = 10.0;

/// Spreading function level drop at the peak frequency.
const MASK_A: f64 = 20.0;

/// Spreading function tilt reference frequency.
const MASK_B: f64 = 20000.0;

/// Spreading function curvature.
const MASK_C: f64 = 1200.0;

/// Perceptual threshold curve gain.
const THRES_A: f64 = 62.0;

/// Perceptual threshold curve log-frequency offset.
const THRES_B: f64 = 1000.0;

/// Perceptual threshold curve frequency scale.
const THRES_C: f64 = 1.0;

/// Perceptual threshold curve floor, in dB.
const THRES_E: f64 = 70.0;

/// The per-sub-band result of the model.
pub struct ModelResult {
    /// Signal-to-mask ratio per sub-band, in dB.
    pub smr: Vec<f64>,
    /// Signal energy per sub-band.
    pub band_energy: Vec<f64>,
}

struct Peaks {
    locations: Vec<usize>,
    heights: Vec<f64>,
}

impl Peaks {
    fn empty() -> Self {
        Peaks { locations: Vec::new(), heights: Vec::new() }
    }

    fn len(&self) -> usize {
        self.locations.len()
    }
}

/// The psychohaptic masking model for blocks of a fixed length and sample rate.
pub struct PsychohapticModel {
    bl: usize,
    book: Codebook,
    fft: Fft,
    /// Frequency of each spectral bin, in Hz.
    freqs: Vec<f64>,
    /// Perceptual threshold per spectral bin, in the linear domain.
    percthres: Vec<f64>,
}

impl PsychohapticModel {
    /// Instantiate the model for blocks of `bl` samples at `fs` Hz.
    pub fn new(bl: usize, fs: u32) -> Self {
        let step = f64::from(fs) / ((2 * bl - 1) as f64);
        let freqs: Vec<f64> = (0..bl).map(|i| i as f64 * step).collect();

        let percthres = perceptual_threshold(&freqs);

        PsychohapticModel { bl, book: Codebook::new(bl), fft: Fft::new(2 * bl), freqs, percthres }
    }

    /// Computes the per-sub-band SMR and signal energy of one block.
    pub fn smr(&self, block: &[f64]) -> ModelResult {
        debug_assert!(block.len() == self.bl);

        // Zero-padded FFT of twice the block length; keep the first bl bins in dB.
        let mut buf = vec![Complex::new(0.0, 0.0); 2 * self.bl];
        for (slot, &sample) in buf.iter_mut().zip(block) {
            slot.re = sample;
        }

        self.fft.transform(&mut buf);

        let correction = 2.0f64.sqrt();
        let spect: Vec<f64> = buf[..self.bl]
            .iter()
            .map(|a| SPECT_FACTOR * (correction * a.re).abs().log10())
            .collect();

        let globalmask = self.global_masking_threshold(&spect);

        let mut smr = Vec::with_capacity(self.book.len());
        let mut band_energy = Vec::with_capacity(self.book.len());

        for b in 0..self.book.len() {
            let mut energy = 0.0;
            let mut mask_energy = 0.0;

            for i in self.book.band(b) {
                energy += 10f64.powf(spect[i] / SPECT_FACTOR);
                mask_energy += globalmask[i];
            }

            band_energy.push(energy);
            smr.push(LOG_FACTOR * (energy / mask_energy).log10());
        }

        ModelResult { smr, band_energy }
    }

    /// The pointwise maximum of the perceptual threshold and the peak spreading mask, in the
    /// linear domain.
    fn global_masking_threshold(&self, spect: &[f64]) -> Vec<f64> {
        let min_peak_height = find_max(spect) - MIN_PEAK_HEIGHT_DIFF;
        let peaks = self.find_peaks(spect, MIN_PEAK_PROMINENCE, min_peak_height);

        match self.peak_mask(&peaks) {
            None => self.percthres.clone(),
            Some(mask) => mask
                .iter()
                .zip(&self.percthres)
                .map(|(&m, &t)| 10f64.powf(m / SPECT_FACTOR) + t)
                .collect(),
        }
    }

    /// The spreading function of every retained peak, folded by pointwise maximum, in dB.
    fn peak_mask(&self, peaks: &Peaks) -> Option<Vec<f64>> {
        if peaks.len() == 0 {
            return None;
        }

        let mut mask = vec![f64::NEG_INFINITY; self.bl];

        for (&loc, &height) in peaks.locations.iter().zip(&peaks.heights) {
            let f_peak = self.freqs[loc];

            let level = height - MASK_A + (MASK_A / MASK_B) * f_peak;
            let curvature = -MASK_C / (f_peak * f_peak);

            for (slot, &f) in mask.iter_mut().zip(&self.freqs) {
                let df = f - f_peak;
                let val = level + curvature * df * df;

                if val > *slot {
                    *slot = val;
                }
            }
        }

        Some(mask)
    }

    fn find_peaks(&self, spectrum: &[f64], min_prominence: f64, min_height: f64) -> Peaks {
        if spectrum.is_empty() || spectrum.iter().all(|v| !v.is_finite()) {
            return Peaks::empty();
        }

        let all = find_all_peak_locations(spectrum);
        if all.len() == 0 {
            return all;
        }

        let tall = filter_peak_criterion(&all, min_height);
        if tall.len() == 0 {
            return tall;
        }

        let prominences = peak_prominence(spectrum, &tall);
        let kept = filter_peak_criterion(&prominences, min_prominence);

        // Report spectrum heights, not prominences.
        let heights = kept.locations.iter().map(|&loc| spectrum[loc]).collect();

        Peaks { locations: kept.locations, heights }
    }
}

/// The fixed perceptual threshold curve: quadratic in log-frequency, clamped at 1 in the
/// linear domain at high frequency.
fn perceptual_threshold(freqs: &[f64]) -> Vec<f64> {
    let temp = THRES_A / THRES_B.log10().powi(2);

    let mut thres = vec![0.0; freqs.len()];

    let mut i = 0;
    while i < freqs.len() {
        let db = (temp * (THRES_C * freqs[i] + THRES_B).log10().powi(2)).abs() - THRES_E;
        thres[i] = 10f64.powf(db / SPECT_FACTOR);

        if thres[i] >= 1.0 {
            thres[i] = 1.0;
            break;
        }

        i += 1;
    }

    // Limit values at high frequencies.
    i += 1;
    while i < freqs.len() {
        thres[i] = thres[i - 1];
        i += 1;
    }

    thres
}

/// Local maxima, with plateaus resolving to their midpoint.
fn find_all_peak_locations(x: &[f64]) -> Peaks {
    let mut peaks = Peaks::empty();

    let i_max = x.len().saturating_sub(1);
    let mut i = 1;

    while i < i_max {
        if x[i - 1] < x[i] {
            if x[i + 1] < x[i] {
                peaks.locations.push(i);
                peaks.heights.push(x[i]);
            }
            else if x[i + 1] == x[i] {
                let mut i_plateau = i + 1;
                while i_plateau < x.len() && x[i_plateau] == x[i] {
                    i_plateau += 1;
                }

                let falls_off = i_plateau < x.len() && x[i_plateau] < x[i];

                if falls_off || i_plateau >= x.len() {
                    let i_peak = ((i + i_plateau) / 2).min(x.len() - 1);
                    peaks.locations.push(i_peak);
                    peaks.heights.push(x[i]);
                    i = i_plateau;
                }
            }
        }

        i += 1;
    }

    peaks
}

/// Valley-based prominence of each peak.
fn peak_prominence(spectrum: &[f64], input: &Peaks) -> Peaks {
    let num_peaks = input.len();

    let mut prominences = Peaks {
        locations: input.locations.clone(),
        heights: vec![0.0; num_peaks],
    };

    for i in 0..num_peaks {
        // Search left for the lowest valley before a higher peak.
        let mut j_min = 0;
        for k in (0..i).rev() {
            if input.heights[k] > input.heights[i] {
                j_min = input.locations[k];
                break;
            }
        }

        let mut left_valley = f64::NEG_INFINITY;
        if input.locations[i] > 0 {
            let mut min_val = input.heights[i];
            for j in (j_min..input.locations[i]).rev() {
                if spectrum[j] <= min_val {
                    min_val = spectrum[j];
                    left_valley = spectrum[j];
                }
            }
        }

        // Search right for the lowest valley before a higher peak.
        let mut j_max = spectrum.len() - 1;
        for k in i + 1..num_peaks {
            if input.heights[k] > input.heights[i] {
                j_max = input.locations[k];
                break;
            }
        }

        let mut right_valley = f64::NEG_INFINITY;
        if input.locations[i] < j_max {
            let mut min_val = input.heights[i];
            for j in input.locations[i] + 1..=j_max {
                if spectrum[j] <= min_val {
                    min_val = spectrum[j];
                    right_valley = spectrum[j];
                }
            }
        }

        prominences.heights[i] = input.heights[i] - left_valley.max(right_valley);
    }

    prominences
}

fn filter_peak_criterion(input: &Peaks, min_value: f64) -> Peaks {
    let mut output = Peaks::empty();

    for (&loc, &height) in input.locations.iter().zip(&input.heights) {
        if height >= min_value {
            output.locations.push(loc);
            output.heights.push(height);
        }
    }

    output
}

fn find_max(data: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;

    for &v in data {
        if v > max {
            max = v;
        }
    }

    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64;

    #[test]
    fn verify_sine_block_smr_shape() {
        let bl = 128;
        let fs = 8000;

        let model = PsychohapticModel::new(bl, fs);

        // A 250 Hz tone lands in the low sub-bands.
        let block: Vec<f64> = (0..bl)
            .map(|i| (2.0 * f64::consts::PI * 250.0 * (i as f64) / f64::from(fs)).sin())
            .collect();

        let result = model.smr(&block);

        assert_eq!(result.smr.len(), 6);
        assert_eq!(result.band_energy.len(), 6);

        // The energy of a low-frequency tone concentrates in the low sub-bands.
        let low: f64 = result.band_energy[..3].iter().sum();
        let high = result.band_energy[5];
        assert!(low > high);
    }

    #[test]
    fn verify_peak_detection() {
        // Two sharp peaks over a low floor.
        let mut spectrum = vec![-60.0f64; 64];
        spectrum[10] = 0.0;
        spectrum[40] = -5.0;

        let model = PsychohapticModel::new(64, 8000);
        let peaks = model.find_peaks(&spectrum, MIN_PEAK_PROMINENCE, -40.0);

        assert_eq!(peaks.locations, vec![10, 40]);
    }

    #[test]
    fn verify_plateau_peak_resolves_to_midpoint() {
        let mut spectrum = vec![-60.0f64; 32];
        spectrum[8] = -1.0;
        spectrum[9] = -1.0;
        spectrum[10] = -1.0;

        let peaks = find_all_peak_locations(&spectrum);

        assert_eq!(peaks.locations, vec![9]);
    }

    #[test]
    fn verify_silent_block_has_no_peaks() {
        let model = PsychohapticModel::new(64, 8000);

        let spectrum = vec![f64::NEG_INFINITY; 64];
        let peaks = model.find_peaks(&spectrum, MIN_PEAK_PROMINENCE, -40.0);

        assert_eq!(peaks.len(), 0);
    }

    #[test]
    fn verify_threshold_clamps_at_high_frequency() {
        let model = PsychohapticModel::new(256, 8000);

        assert!(model.percthres.last().copied().unwrap() <= 1.0);
        assert!(model.percthres[0] < model.percthres[255]);
    }
}
