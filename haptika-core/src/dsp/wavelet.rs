// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `wavelet` module implements the dyadic Discrete Wavelet Transform (DWT) and its exact
//! inverse.
//!
//! The filter bank is the symmetric biorthogonal 5/3 pair implemented by lifting with
//! whole-point reflection at the block boundary. Lifting makes the inverse transform the exact
//! mirror of the forward one, so `inv_dwt(dwt(x)) == x` up to floating-point rounding.

use smallvec::SmallVec;

/// The number of decomposition levels used for a block of `block_length` samples.
///
/// The coarsest approximation band is always 4 samples long.
pub fn num_levels(block_length: usize) -> u32 {
    debug_assert!(block_length >= 8 && block_length.is_power_of_two());
    (block_length / 4).ilog2()
}

/// A `Codebook` describes the sub-band partition of a DWT coefficient vector.
///
/// For `L` decomposition levels there are `L + 1` sub-bands: the approximation band, then the
/// detail bands from coarsest to finest. The first two bands are `block_length >> L` samples
/// long and every following band doubles.
#[derive(Clone, Debug)]
pub struct Codebook {
    book: SmallVec<[usize; 8]>,
    cumulative: SmallVec<[usize; 9]>,
}

impl Codebook {
    /// Build the codebook for a block of `block_length` samples.
    pub fn new(block_length: usize) -> Self {
        let levels = num_levels(block_length) as usize;

        let mut book = SmallVec::with_capacity(levels + 1);
        let mut cumulative = SmallVec::with_capacity(levels + 2);

        book.push(block_length >> levels);
        book.push(block_length >> levels);

        cumulative.push(0);
        cumulative.push(book[0]);
        cumulative.push(book[1] << 1);

        for k in 2..levels + 1 {
            book.push(book[k - 1] << 1);
            cumulative.push(cumulative[k] << 1);
        }

        Codebook { book, cumulative }
    }

    /// The number of sub-bands.
    pub fn len(&self) -> usize {
        self.book.len()
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_empty()
    }

    /// The number of decomposition levels.
    pub fn levels(&self) -> usize {
        self.book.len() - 1
    }

    /// The length of sub-band `b`.
    pub fn band_len(&self, b: usize) -> usize {
        self.book[b]
    }

    /// The coefficient index range of sub-band `b`.
    pub fn band(&self, b: usize) -> std::ops::Range<usize> {
        self.cumulative[b]..self.cumulative[b + 1]
    }
}

/// A dyadic 5/3 wavelet transform for blocks of a fixed power-of-two length.
pub struct Wavelet {
    levels: u32,
    scratch: Vec<f64>,
}

impl Wavelet {
    /// Instantiate a `Wavelet` for blocks of `block_length` samples decomposed over `levels`
    /// levels.
    pub fn new(block_length: usize, levels: u32) -> Self {
        assert!(block_length.is_power_of_two() && block_length >= 8);
        assert!(levels >= 1 && levels <= num_levels(block_length));

        Wavelet { levels, scratch: vec![0.0; block_length] }
    }

    /// Computes the forward transform of `input` into `output`.
    ///
    /// The output layout is `[approximation | detail L | detail L-1 | .. | detail 1]`, matching
    /// the [`Codebook`] partition.
    pub fn dwt(&mut self, input: &[f64], output: &mut [f64]) {
        assert!(input.len() == self.scratch.len() && output.len() == input.len());

        output.copy_from_slice(input);

        let mut len = output.len();

        for _ in 0..self.levels {
            self.analyze(output, len);
            len >>= 1;
        }
    }

    /// Computes the inverse transform of `input` into `output`.
    pub fn inv_dwt(&mut self, input: &[f64], output: &mut [f64]) {
        assert!(input.len() == self.scratch.len() && output.len() == input.len());

        output.copy_from_slice(input);

        let mut len = output.len() >> (self.levels - 1);

        for _ in 0..self.levels {
            self.synthesize(output, len);
            len <<= 1;
        }
    }

    /// One analysis step over `buf[..len]`: split into approximation and detail halves.
    fn analyze(&mut self, buf: &mut [f64], len: usize) {
        let half = len / 2;

        let (approx, detail) = self.scratch[..len].split_at_mut(half);

        for i in 0..half {
            approx[i] = buf[2 * i];
            detail[i] = buf[2 * i + 1];
        }

        // Predict: subtract the even-sample interpolation from each odd sample. The final odd
        // sample reflects across the block edge.
        for i in 0..half {
            let right = if i + 1 < half { approx[i + 1] } else { approx[half - 1] };
            detail[i] -= 0.5 * (approx[i] + right);
        }

        // Update: fold a quarter of the neighbouring details back into each even sample.
        for i in 0..half {
            let left = if i > 0 { detail[i - 1] } else { detail[0] };
            approx[i] += 0.25 * (left + detail[i]);
        }

        buf[..len].copy_from_slice(&self.scratch[..len]);
    }

    /// One synthesis step over `buf[..len]`: the exact mirror of `analyze`.
    fn synthesize(&mut self, buf: &mut [f64], len: usize) {
        let half = len / 2;

        self.scratch[..len].copy_from_slice(&buf[..len]);

        let (approx, detail) = self.scratch[..len].split_at_mut(half);

        // Undo update.
        for i in 0..half {
            let left = if i > 0 { detail[i - 1] } else { detail[0] };
            approx[i] -= 0.25 * (left + detail[i]);
        }

        // Undo predict.
        for i in 0..half {
            let right = if i + 1 < half { approx[i + 1] } else { approx[half - 1] };
            detail[i] += 0.5 * (approx[i] + right);
        }

        for i in 0..half {
            buf[2 * i] = approx[i];
            buf[2 * i + 1] = detail[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn verify_codebook() {
        let book = Codebook::new(128);

        // L = log2(128 / 4) = 5, so 6 sub-bands: 4, 4, 8, 16, 32, 64.
        assert_eq!(book.len(), 6);
        assert_eq!(book.levels(), 5);

        let lens: Vec<usize> = (0..book.len()).map(|b| book.band_len(b)).collect();
        assert_eq!(lens, &[4, 4, 8, 16, 32, 64]);

        assert_eq!(book.band(0), 0..4);
        assert_eq!(book.band(5), 64..128);
    }

    #[test]
    fn verify_perfect_reconstruction() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);

        for &bl in &[8usize, 32, 128, 512] {
            let levels = num_levels(bl);
            let mut wavelet = Wavelet::new(bl, levels);

            let input: Vec<f64> = (0..bl).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let mut coeffs = vec![0.0; bl];
            let mut output = vec![0.0; bl];

            wavelet.dwt(&input, &mut coeffs);
            wavelet.inv_dwt(&coeffs, &mut output);

            for (x, y) in input.iter().zip(&output) {
                assert!((x - y).abs() <= 1e-10);
            }
        }
    }

    #[test]
    fn verify_dc_signal_concentrates() {
        let bl = 128;
        let mut wavelet = Wavelet::new(bl, num_levels(bl));

        let input = vec![1.0; bl];
        let mut coeffs = vec![0.0; bl];

        wavelet.dwt(&input, &mut coeffs);

        let book = Codebook::new(bl);

        // A constant signal has zero detail coefficients everywhere.
        for i in book.band(1).start..bl {
            assert!(coeffs[i].abs() < 1e-12);
        }

        for i in book.band(0) {
            assert!((coeffs[i] - 1.0).abs() < 1e-12);
        }
    }
}
