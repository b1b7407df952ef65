// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `encoder` module orchestrates the per-block wavelet encode path: DWT, psychohaptic
//! masking, the bit-allocation loop, scalar quantization, and the SPIHT bitplane coder.

use log::debug;
use smallvec::SmallVec;

use haptika_core::dsp::wavelet::{num_levels, Codebook, Wavelet};
use haptika_core::errors::{range_error, Result};
use haptika_core::model::{Band, BandType, Effect};

use crate::psychohaptic::PsychohapticModel;
use crate::spiht;
use crate::spiht::MAX_BITS;

/// One wavelet-coded block.
pub struct EncodedBlock {
    /// The SPIHT bitstream, including the block header.
    pub bitstream: Vec<u8>,
    /// The quantized maximum wavelet coefficient.
    pub scalar: f64,
    /// The largest per-sub-band allocation depth.
    pub maxbits: u32,
}

/// A psychohaptic wavelet encoder for blocks of a fixed length and sample rate.
pub struct WaveletEncoder {
    bl: usize,
    fs: u32,
    book: Codebook,
    wavelet: Wavelet,
    model: PsychohapticModel,
}

impl WaveletEncoder {
    /// Instantiate an encoder for blocks of `bl` samples at `fs` Hz.
    ///
    /// `bl` must be a power-of-two of at least 8 samples.
    pub fn try_new(bl: usize, fs: u32) -> Result<WaveletEncoder> {
        if !bl.is_power_of_two() || bl < 8 {
            return range_error("block length must be a power-of-two of at least 8");
        }
        if fs == 0 {
            return range_error("sample rate must be non-zero");
        }

        Ok(WaveletEncoder {
            bl,
            fs,
            book: Codebook::new(bl),
            wavelet: Wavelet::new(bl, num_levels(bl)),
            model: PsychohapticModel::new(bl, fs),
        })
    }

    /// Encodes a whole signal into a `WaveletWave` band.
    ///
    /// The signal is split into contiguous blocks of the encoder's block length, the last one
    /// zero-padded, and one effect is emitted per block at `block_index * block_length`.
    pub fn encode_signal(
        &mut self,
        sig_time: &[f64],
        bit_budget: u32,
        f_cutoff: u32,
        timescale: u32,
    ) -> Result<Band> {
        let num_blocks = (sig_time.len() + self.bl - 1) / self.bl;
        let block_length = (self.bl as u64 * u64::from(timescale) / u64::from(self.fs)) as i32;

        let mut band = Band::new(BandType::WaveletWave, f_cutoff as i32, self.fs as i32);
        band.window_length = Some(block_length);
        band.block_length = Some(block_length);

        let mut block_time = vec![0.0; self.bl];

        for b in 0..num_blocks {
            let start = b * self.bl;
            let end = (start + self.bl).min(sig_time.len());

            block_time[..end - start].copy_from_slice(&sig_time[start..end]);
            block_time[end - start..].fill(0.0);

            let encoded = self.encode_block(&block_time, bit_budget)?;

            let mut effect = Effect {
                position: b as i32 * block_length,
                wavelet_bitstream: encoded.bitstream,
                wavelet_scalar: encoded.scalar,
                wavelet_maxbits: encoded.maxbits as i32,
                ..Default::default()
            };
            effect.id = b as i16;

            band.effects.push(effect);
        }

        debug!("encoded {} wavelet blocks of {} samples", num_blocks, self.bl);

        Ok(band)
    }

    /// Encodes one block of `bl` time-domain samples within `bit_budget` bits.
    pub fn encode_block(&mut self, block_time: &[f64], bit_budget: u32) -> Result<EncodedBlock> {
        debug_assert!(block_time.len() == self.bl);

        let num_bands = self.book.len();
        let levels = self.book.levels() as u32;

        let mut block_dwt = vec![0.0; self.bl];
        self.wavelet.dwt(block_time, &mut block_dwt);

        let pm_result = self.model.smr(block_time);

        let wavmax = block_dwt.iter().fold(0.0f64, |max, &v| max.max(v.abs()));
        let (qwavmax, _) = spiht::quantize_wavmax(wavmax);

        let mut quant = vec![0.0; self.bl];
        let mut bitalloc: SmallVec<[u32; 8]> = SmallVec::from_elem(0, num_bands);

        // With nothing allocated yet, the quantization noise of a sub-band is its own energy.
        let mut noise: SmallVec<[f64; 8]> = SmallVec::with_capacity(num_bands);
        for b in 0..num_bands {
            noise.push(self.book.band(b).map(|i| block_dwt[i] * block_dwt[i]).sum());
        }

        let budget = bit_budget.min(num_bands as u32 * MAX_BITS);
        let mut allocated = 0;

        let mut mnr: SmallVec<[f64; 8]> = SmallVec::from_elem(0.0, num_bands);

        while allocated < budget {
            // Mask-to-noise ratio per sub-band; saturated sub-bands never win the argmin.
            for b in 0..num_bands {
                let snr = 10.0 * (pm_result.band_energy[b] / noise[b]).log10();
                mnr[b] = if bitalloc[b] >= MAX_BITS { f64::INFINITY } else { snr - pm_result.smr[b] };
            }

            let index = find_min_index(&mnr);
            let top = num_bands - 1;

            if allocated - bitalloc[top] >= MAX_BITS * levels {
                // Every sub-band below the top one is saturated; dump the remaining budget
                // into the top sub-band and finish.
                let previous = bitalloc[top];
                bitalloc[top] = budget - MAX_BITS * levels;
                allocated += bitalloc[top] - previous;
            }
            else {
                bitalloc[index] += 1;
                allocated += 1;
            }

            uniform_quant(&block_dwt, self.book.band(index), qwavmax, bitalloc[index], &mut quant);

            noise[index] = self
                .book
                .band(index)
                .map(|i| (block_dwt[i] - quant[i]).powi(2))
                .sum();
        }

        // The budget dump above may leave the top sub-band quantized at a stale depth; one
        // final pass settles every sub-band at its final allocation.
        for b in 0..num_bands {
            uniform_quant(&block_dwt, self.book.band(b), qwavmax, bitalloc[b], &mut quant);
        }

        let maxbits = bitalloc.iter().copied().max().unwrap_or(0);

        // Scale the quantized coefficients to integers.
        let intmax = f64::from(1u32 << maxbits);
        let mut block_intquant = vec![0i32; self.bl];

        if qwavmax != 0.0 {
            let multiplicator = intmax / qwavmax;
            for (int, &q) in block_intquant.iter_mut().zip(&quant) {
                *int = (q * multiplicator).round() as i32;
            }
        }

        let bitstream = spiht::encode(&block_intquant, maxbits, qwavmax, bit_budget)?;

        Ok(EncodedBlock { bitstream, scalar: qwavmax, maxbits })
    }
}

/// Uniform dead-zone scalar quantizer over one sub-band.
///
/// The step is `max / 2^bits`, magnitudes round half away from zero and clamp at
/// `(2^bits - 1)` steps, signs are preserved.
fn uniform_quant(
    input: &[f64],
    range: std::ops::Range<usize>,
    max: f64,
    bits: u32,
    out: &mut [f64],
) {
    let delta = max / f64::from(1u32 << bits);
    let max_q = delta * f64::from((1u32 << bits) - 1);

    for i in range {
        if max == 0.0 {
            out[i] = 0.0;
        }
        else {
            let sign = if input[i] < 0.0 { -1.0 } else { 1.0 };
            let q = sign * delta * (input[i].abs() / delta + 0.5).floor();

            out[i] = if q.abs() > max_q { sign * max_q } else { q };
        }
    }
}

/// The index of the smallest element, ties resolving to the lowest index.
fn find_min_index(data: &[f64]) -> usize {
    let mut min = data[0];
    let mut index = 0;

    for (i, &v) in data.iter().enumerate().skip(1) {
        if v < min {
            min = v;
            index = i;
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder;
    use std::f64;

    #[test]
    fn verify_transient_dirac() {
        let bl = 128;
        let mut block = vec![0.0; bl];
        block[0] = 1.0;

        let mut encoder = WaveletEncoder::try_new(bl, 8000).unwrap();
        let encoded = encoder.encode_block(&block, 90).unwrap();

        let recovered = decoder::decode_block(&encoded.bitstream, bl).unwrap();

        assert!(recovered[0] >= 0.95);

        let tail_rms =
            (recovered[1..].iter().map(|v| v * v).sum::<f64>() / (bl - 1) as f64).sqrt();
        assert!(tail_rms <= 0.1);
    }

    #[test]
    fn verify_full_budget_roundtrip_error() {
        let bl = 128;
        let fs = 8000;

        let block: Vec<f64> = (0..bl)
            .map(|i| {
                let t = i as f64 / f64::from(fs);
                0.6 * (2.0 * f64::consts::PI * 150.0 * t).sin()
                    + 0.3 * (2.0 * f64::consts::PI * 640.0 * t).sin()
            })
            .collect();

        let mut encoder = WaveletEncoder::try_new(bl, fs).unwrap();

        let budget = bl as u32 * MAX_BITS;
        let encoded = encoder.encode_block(&block, budget).unwrap();

        let recovered = decoder::decode_block(&encoded.bitstream, bl).unwrap();

        let num: f64 = block.iter().zip(&recovered).map(|(x, y)| (x - y).powi(2)).sum();
        let den: f64 = block.iter().map(|x| x * x).sum();

        assert!(num / den <= 1e-3);
    }

    #[test]
    fn verify_error_decreases_with_budget() {
        let bl = 128;
        let fs = 8000;

        let block: Vec<f64> = (0..bl)
            .map(|i| (2.0 * f64::consts::PI * 440.0 * (i as f64) / f64::from(fs)).sin())
            .collect();

        let mut encoder = WaveletEncoder::try_new(bl, fs).unwrap();

        let mut last_err = f64::INFINITY;

        for budget in [48u32, 90, 180, 480, 1920] {
            let encoded = encoder.encode_block(&block, budget).unwrap();
            let recovered = decoder::decode_block(&encoded.bitstream, bl).unwrap();

            let err: f64 = block.iter().zip(&recovered).map(|(x, y)| (x - y).powi(2)).sum();

            assert!(err <= last_err);
            last_err = err;
        }
    }

    #[test]
    fn verify_encode_signal_blocks() {
        let fs = 8000;
        let bl = 128;

        // 300 samples span three blocks, the last zero-padded.
        let sig: Vec<f64> = (0..300)
            .map(|i| (2.0 * f64::consts::PI * 200.0 * (i as f64) / f64::from(fs)).sin())
            .collect();

        let mut encoder = WaveletEncoder::try_new(bl, fs).unwrap();
        let band = encoder.encode_signal(&sig, 512, 20, 1000).unwrap();

        assert_eq!(band.band_type, BandType::WaveletWave);
        assert_eq!(band.upper_frequency_limit, 8000);
        assert_eq!(band.lower_frequency_limit, 20);
        assert_eq!(band.block_length, Some(16));
        assert_eq!(band.effects.len(), 3);

        assert_eq!(band.effects[0].position, 0);
        assert_eq!(band.effects[1].position, 16);
        assert_eq!(band.effects[2].position, 32);

        assert!(band.effects.iter().all(|e| !e.wavelet_bitstream.is_empty()));
    }

    #[test]
    fn verify_zero_signal_block() {
        let bl = 64;
        let block = vec![0.0; bl];

        let mut encoder = WaveletEncoder::try_new(bl, 8000).unwrap();
        let encoded = encoder.encode_block(&block, 200).unwrap();

        let recovered = decoder::decode_block(&encoded.bitstream, bl).unwrap();
        assert!(recovered.iter().all(|&v| v == 0.0));
    }
}
