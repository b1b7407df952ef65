// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fft` module implements the forward Fast Fourier Transform (FFT).

use std::f64;

use num_complex::Complex;

/// A forward FFT of a fixed power-of-two length.
pub struct Fft {
    twiddles: Vec<Complex<f64>>,
    n: usize,
}

impl Fft {
    /// Instantiate an FFT of length `n`, where `n` is a power-of-two.
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two(), "fft length must be a power-of-two");

        // One twiddle factor per butterfly of the final stage covers all earlier stages since
        // their twiddles are a stride-2^k subset.
        let mut twiddles = Vec::with_capacity(n / 2);

        for k in 0..n / 2 {
            let theta = -2.0 * f64::consts::PI * (k as f64) / (n as f64);
            twiddles.push(Complex::new(theta.cos(), theta.sin()));
        }

        Fft { twiddles, n }
    }

    /// The length of the transform.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Computes the forward transform of `buf` in-place.
    pub fn transform(&self, buf: &mut [Complex<f64>]) {
        assert!(buf.len() == self.n);

        // Decimation-in-time requires the input in bit-reversed order.
        let shift = self.n.leading_zeros() + 1;

        for i in 0..self.n {
            let j = i.reverse_bits() >> shift;
            if j > i {
                buf.swap(i, j);
            }
        }

        let mut len = 2;

        while len <= self.n {
            let half = len / 2;
            let stride = self.n / len;

            for base in (0..self.n).step_by(len) {
                for k in 0..half {
                    let w = self.twiddles[k * stride];

                    let even = buf[base + k];
                    let odd = buf[base + k + half] * w;

                    buf[base + k] = even + odd;
                    buf[base + k + half] = even - odd;
                }
            }

            len <<= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct O(n^2) evaluation of the DFT.
    fn dft_analytical(x: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let n = x.len();
        let mut out = vec![Complex::new(0.0, 0.0); n];

        for (k, item) in out.iter_mut().enumerate() {
            for (j, &xj) in x.iter().enumerate() {
                let theta = -2.0 * f64::consts::PI * ((k * j) as f64) / (n as f64);
                *item += xj * Complex::new(theta.cos(), theta.sin());
            }
        }

        out
    }

    #[test]
    fn verify_fft() {
        let n = 64;

        let mut buf: Vec<Complex<f64>> =
            (0..n).map(|i| Complex::new((i as f64 * 0.7).sin(), 0.0)).collect();

        let expected = dft_analytical(&buf);

        let fft = Fft::new(n);
        fft.transform(&mut buf);

        for (actual, expected) in buf.iter().zip(&expected) {
            assert!((actual - expected).norm() < 1e-9);
        }
    }
}
