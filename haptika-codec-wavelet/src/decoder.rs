// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `decoder` module implements the inverse wavelet path: SPIHT decode, coefficient
//! rescaling, and the inverse DWT.

use haptika_core::dsp::wavelet::{num_levels, Wavelet};
use haptika_core::errors::{inconsistent_error, Result};
use haptika_core::model::{Band, BandType};

use crate::spiht;

/// Decodes one wavelet block bitstream into `block_length` time-domain samples.
pub fn decode_block(bitstream: &[u8], block_length: usize) -> Result<Vec<f64>> {
    if !block_length.is_power_of_two() || block_length < 8 {
        return inconsistent_error("wavelet block length is not a power-of-two");
    }

    let decoded = spiht::decode(bitstream, block_length)?;

    // Undo the integer scaling of the encoder.
    let scale = decoded.scalar / f64::from(1u32 << decoded.maxbits);

    let coeffs: Vec<f64> = decoded.coefficients.iter().map(|&c| f64::from(c) * scale).collect();

    let mut wavelet = Wavelet::new(block_length, num_levels(block_length));
    let mut block_time = vec![0.0; block_length];

    wavelet.inv_dwt(&coeffs, &mut block_time);

    Ok(block_time)
}

/// Decodes every block of a `WaveletWave` band into one contiguous signal.
pub fn decode_band(band: &Band, timescale: u32) -> Result<Vec<f64>> {
    if band.band_type != BandType::WaveletWave {
        return inconsistent_error("not a wavelet band");
    }

    let Some(block_length) = band.block_length
    else {
        return inconsistent_error("wavelet band without block length");
    };

    let Some(bl) = band.wavelet_block_samples(timescale)
    else {
        return inconsistent_error("wavelet band without block length");
    };

    if !bl.is_power_of_two() || bl < 8 {
        return inconsistent_error("wavelet block length is not a power-of-two");
    }

    let mut sig_rec = vec![0.0; band.effects.len() * bl];

    for effect in &band.effects {
        if effect.position % block_length != 0 {
            return inconsistent_error("wavelet effect not block-aligned");
        }

        let block_index = (effect.position / block_length) as usize;

        let start = block_index * bl;
        if start + bl > sig_rec.len() {
            sig_rec.resize(start + bl, 0.0);
        }

        let block_time = decode_block(&effect.wavelet_bitstream, bl)?;
        sig_rec[start..start + bl].copy_from_slice(&block_time);
    }

    Ok(sig_rec)
}
