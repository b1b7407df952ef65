// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `spiht` module implements the Set Partitioning In Hierarchical Trees bitplane coder
//! over a one-dimensional wavelet coefficient tree.
//!
//! Coefficients are organized as a temporal orientation tree: the coarsest band `[0, r)` holds
//! the roots, root `i` has the single child `i + r`, and every node `j >= r` has the children
//! `2j` and `2j + 1`. Every bit emitted by the sorting and refinement passes is routed through
//! the adaptive arithmetic coder in [`crate::arith`].

use haptika_core::dsp::wavelet;
use haptika_core::errors::{budget_error, range_error, truncated_error, Result};
use haptika_core::io::{BitReaderLtr, BitWriterLtr, ReadBitsLtr};

use crate::arith::{ArithDecoder, ArithEncoder};
use crate::arith::{CTX_REFINEMENT, CTX_SIGN, CTX_SIGNIFICANCE, CTX_SET};

/// The largest bit depth the allocation loop may assign to one sub-band.
pub const MAX_BITS: u32 = 15;

/// The size of the raw block header preceding the range-coded stream: an 8-bit quantized
/// maximum, a 4-bit allocation depth, a 5-bit initial bitplane and a 16-bit symbol budget.
pub const HEADER_BITS: u32 = 8 + 4 + 5 + 16;

/// A block decoded by [`decode`].
pub struct DecodedBlock {
    /// The reconstructed integer coefficients.
    pub coefficients: Vec<i32>,
    /// The dequantization scalar (the quantized maximum wavelet coefficient).
    pub scalar: f64,
    /// The allocation depth the block was coded at.
    pub maxbits: u32,
}

/// Quantizes the maximum wavelet coefficient to its 8-bit header representation.
///
/// Two modes cover the dynamic range: magnitudes below 1 use 7 fraction bits, larger
/// magnitudes use a 3.4 fixed-point split offset by 1. Quantization rounds up so the
/// dequantized maximum never clips the coefficients it scales.
pub fn quantize_wavmax(wavmax: f64) -> (f64, u8) {
    let (mode, integer_part, frac_bits) = quant_mode(wavmax);

    let quantized = max_quant(wavmax - integer_part, mode_max(mode), frac_bits) + integer_part;
    let code = ((quantized - integer_part) * f64::from(1 << frac_bits)).round() as u8;

    (quantized, (u8::from(mode == 1) << 7) | (code & 0x7f))
}

/// Recovers the quantized maximum wavelet coefficient from its 8-bit header representation.
pub fn dequantize_wavmax(bits: u8) -> f64 {
    let code = f64::from(bits & 0x7f);

    if bits & 0x80 == 0 {
        code / 128.0
    }
    else {
        1.0 + code / 16.0
    }
}

fn quant_mode(wavmax: f64) -> (u8, f64, u32) {
    if wavmax < 1.0 {
        (0, 0.0, 7)
    }
    else {
        (1, 1.0, 4)
    }
}

fn mode_max(mode: u8) -> f64 {
    // The largest representable fraction in either mode: 127/128 or 127/16.
    match mode {
        0 => 127.0 / 128.0,
        _ => 127.0 / 16.0,
    }
}

fn max_quant(value: f64, max: f64, frac_bits: u32) -> f64 {
    let mut q = value;

    if q >= max {
        q = max * 0.999;
    }

    let delta = f64::from(1 << frac_bits).recip();
    (q.abs() / delta).ceil() * delta
}

/// Signals that the symbol budget was exhausted mid-pass. Not an error: both coder halves
/// terminate on the same symbol.
struct Exhausted;

struct SymbolBudget {
    used: u32,
    max: u32,
}

impl SymbolBudget {
    fn take(&mut self) -> std::result::Result<(), Exhausted> {
        if self.used < self.max {
            self.used += 1;
            Ok(())
        }
        else {
            Err(Exhausted)
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum SetKind {
    /// The entry stands for all descendants of its node.
    A,
    /// The entry stands for the descendants of its node minus its direct children.
    B,
}

#[derive(Copy, Clone)]
struct SetEntry {
    node: usize,
    kind: SetKind,
}

/// The first child and child count of node `i`, if it has any.
#[inline(always)]
fn child_range(i: usize, roots: usize, len: usize) -> Option<(usize, usize)> {
    if i < roots {
        Some((i + roots, 1))
    }
    else if 2 * i < len {
        Some((2 * i, 2))
    }
    else {
        None
    }
}

/// Whether node `i` has grandchildren; both coder halves gate Type-B entries on this.
#[inline(always)]
fn has_grandchildren(i: usize, roots: usize, len: usize) -> bool {
    match child_range(i, roots, len) {
        Some((first, _)) => child_range(first, roots, len).is_some(),
        None => false,
    }
}

/// Per-node maxima over strict descendants and over descendants-of-children, used by the
/// encoder for set significance tests.
fn descendant_maxima(c: &[i32], roots: usize) -> (Vec<u32>, Vec<u32>) {
    let len = c.len();

    let mut desc = vec![0u32; len];
    let mut grand = vec![0u32; len];

    for j in (roots..len).rev() {
        if let Some((first, count)) = child_range(j, roots, len) {
            for k in first..first + count {
                desc[j] = desc[j].max(c[k].unsigned_abs()).max(desc[k]);
                grand[j] = grand[j].max(desc[k]);
            }
        }
    }

    for i in 0..roots {
        let child = i + roots;
        desc[i] = c[child].unsigned_abs().max(desc[child]);
        grand[i] = desc[child];
    }

    (desc, grand)
}

/// Encodes a block of signed integer coefficients within `budget` total bits.
///
/// `maxbits` is the allocation depth the block was quantized at and `wavmax` the quantized
/// maximum wavelet coefficient; both travel in the block header. The budget counts the header
/// plus every SPIHT symbol routed through the arithmetic coder.
pub fn encode(c: &[i32], maxbits: u32, wavmax: f64, budget: u32) -> Result<Vec<u8>> {
    if budget < HEADER_BITS {
        return budget_error();
    }

    if maxbits > MAX_BITS {
        return range_error("allocation depth above maximum");
    }

    let len = c.len();
    if !len.is_power_of_two() || len < 8 {
        return range_error("block length must be a power-of-two of at least 8");
    }

    let roots = len >> wavelet::num_levels(len);

    let max_abs = c.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);

    // Initial bitplane, offset by one so 0 encodes an all-zero block.
    let n_store = if max_abs == 0 { 0 } else { 32 - max_abs.leading_zeros() };
    let budget = budget.min(u16::MAX as u32);

    let (_, wavmax_code) = quantize_wavmax(wavmax);

    let mut header = BitWriterLtr::new();
    header.write_bits_leq32(u32::from(wavmax_code), 8)?;
    header.write_bits_leq32(maxbits, 4)?;
    header.write_bits_leq32(n_store, 5)?;
    header.write_bits_leq32(budget, 16)?;

    let mut coder = ArithEncoder::new();
    let mut budget = SymbolBudget { used: HEADER_BITS, max: budget };

    let (desc, grand) = descendant_maxima(c, roots);

    let mut lip: Vec<usize> = (0..roots).collect();
    let mut lis: Vec<SetEntry> =
        (0..roots).map(|i| SetEntry { node: i, kind: SetKind::A }).collect();
    let mut lsp: Vec<usize> = Vec::new();

    let emit = |coder: &mut ArithEncoder,
                    budget: &mut SymbolBudget,
                    ctx: usize,
                    bit: bool|
     -> std::result::Result<(), Exhausted> {
        budget.take()?;
        coder.encode_bit(ctx, bit);
        Ok(())
    };

    let mut passes = || -> std::result::Result<(), Exhausted> {
        let mut n = n_store as i32 - 1;

        while n >= 0 {
            let threshold = 1u32 << n;
            let lsp_start = lsp.len();

            // Sorting pass over the insignificant pixels.
            let mut i = 0;
            while i < lip.len() {
                let px = lip[i];
                let sig = c[px].unsigned_abs() >= threshold;

                emit(&mut coder, &mut budget, CTX_SIGNIFICANCE, sig)?;

                if sig {
                    emit(&mut coder, &mut budget, CTX_SIGN, c[px] < 0)?;
                    lsp.push(px);
                    lip.remove(i);
                }
                else {
                    i += 1;
                }
            }

            // Sorting pass over the insignificant sets. The list grows at the tail while
            // iterating; new entries are examined within the same pass.
            let mut j = 0;
            while j < lis.len() {
                let entry = lis[j];

                match entry.kind {
                    SetKind::A => {
                        let sig = desc[entry.node] >= threshold;

                        emit(&mut coder, &mut budget, CTX_SET, sig)?;

                        if sig {
                            let (first, count) = child_range(entry.node, roots, len).unwrap();

                            for k in first..first + count {
                                let s = c[k].unsigned_abs() >= threshold;

                                emit(&mut coder, &mut budget, CTX_SIGNIFICANCE, s)?;

                                if s {
                                    emit(&mut coder, &mut budget, CTX_SIGN, c[k] < 0)?;
                                    lsp.push(k);
                                }
                                else {
                                    lip.push(k);
                                }
                            }

                            if has_grandchildren(entry.node, roots, len) {
                                lis.push(SetEntry { node: entry.node, kind: SetKind::B });
                            }

                            lis.remove(j);
                        }
                        else {
                            j += 1;
                        }
                    }
                    SetKind::B => {
                        let sig = grand[entry.node] >= threshold;

                        emit(&mut coder, &mut budget, CTX_SET, sig)?;

                        if sig {
                            let (first, count) = child_range(entry.node, roots, len).unwrap();

                            for k in first..first + count {
                                lis.push(SetEntry { node: k, kind: SetKind::A });
                            }

                            lis.remove(j);
                        }
                        else {
                            j += 1;
                        }
                    }
                }
            }

            // Refinement pass over pixels significant before this pass started.
            for &px in &lsp[..lsp_start] {
                let bit = (c[px].unsigned_abs() >> n) & 1 == 1;
                emit(&mut coder, &mut budget, CTX_REFINEMENT, bit)?;
            }

            n -= 1;
        }

        Ok(())
    };

    // Budget exhaustion terminates the passes; it is the expected stop condition.
    let _ = passes();

    let mut buf = header.into_bytes();
    buf.extend_from_slice(&coder.finish());

    Ok(buf)
}

/// Decodes a block of `block_length` signed integer coefficients.
///
/// The decoder replays the encoder's pass structure symbol for symbol, terminating on the
/// identical budget or bitplane condition.
pub fn decode(buf: &[u8], block_length: usize) -> Result<DecodedBlock> {
    if !block_length.is_power_of_two() || block_length < 8 {
        return range_error("block length must be a power-of-two of at least 8");
    }

    let mut header = BitReaderLtr::new(buf);

    let wavmax_code = header.read_bits_leq32(8)? as u8;
    let maxbits = header.read_bits_leq32(4)?;
    let n_store = header.read_bits_leq32(5)?;
    let budget = header.read_bits_leq32(16)?;

    if n_store > MAX_BITS + 1 {
        return range_error("initial bitplane above allocation depth");
    }

    let scalar = dequantize_wavmax(wavmax_code);

    let header_bytes = (HEADER_BITS as usize + 7) / 8;
    if buf.len() < header_bytes {
        return truncated_error();
    }

    let mut coder = ArithDecoder::new(&buf[header_bytes..]);
    let mut budget = SymbolBudget { used: HEADER_BITS, max: budget };

    let len = block_length;
    let roots = len >> wavelet::num_levels(len);

    let mut c = vec![0i32; len];

    let mut lip: Vec<usize> = (0..roots).collect();
    let mut lis: Vec<SetEntry> =
        (0..roots).map(|i| SetEntry { node: i, kind: SetKind::A }).collect();
    let mut lsp: Vec<usize> = Vec::new();

    let take = |coder: &mut ArithDecoder<'_>,
                    budget: &mut SymbolBudget,
                    ctx: usize|
     -> std::result::Result<bool, Exhausted> {
        budget.take()?;
        Ok(coder.decode_bit(ctx))
    };

    let mut passes = || -> std::result::Result<(), Exhausted> {
        let mut n = n_store as i32 - 1;

        while n >= 0 {
            let step = 1i32 << n;

            // A pixel found significant at this plane lies in [step, 2 * step); reconstruct at
            // the interval midpoint so truncated streams minimize squared error. The low bits
            // decoded by later refinement passes recenter the estimate, converging on the
            // exact integer once every plane is coded.
            let mid = step + (step >> 1);

            let lsp_start = lsp.len();

            let mut i = 0;
            while i < lip.len() {
                let px = lip[i];

                if take(&mut coder, &mut budget, CTX_SIGNIFICANCE)? {
                    let negative = take(&mut coder, &mut budget, CTX_SIGN)?;
                    c[px] = if negative { -mid } else { mid };
                    lsp.push(px);
                    lip.remove(i);
                }
                else {
                    i += 1;
                }
            }

            let mut j = 0;
            while j < lis.len() {
                let entry = lis[j];

                match entry.kind {
                    SetKind::A => {
                        if take(&mut coder, &mut budget, CTX_SET)? {
                            let (first, count) = child_range(entry.node, roots, len).unwrap();

                            for k in first..first + count {
                                if take(&mut coder, &mut budget, CTX_SIGNIFICANCE)? {
                                    let negative = take(&mut coder, &mut budget, CTX_SIGN)?;
                                    c[k] = if negative { -mid } else { mid };
                                    lsp.push(k);
                                }
                                else {
                                    lip.push(k);
                                }
                            }

                            if has_grandchildren(entry.node, roots, len) {
                                lis.push(SetEntry { node: entry.node, kind: SetKind::B });
                            }

                            lis.remove(j);
                        }
                        else {
                            j += 1;
                        }
                    }
                    SetKind::B => {
                        if take(&mut coder, &mut budget, CTX_SET)? {
                            let (first, count) = child_range(entry.node, roots, len).unwrap();

                            for k in first..first + count {
                                lis.push(SetEntry { node: k, kind: SetKind::A });
                            }

                            lis.remove(j);
                        }
                        else {
                            j += 1;
                        }
                    }
                }
            }

            // Each refinement bit halves the uncertainty interval of an already-significant
            // pixel and recenters the estimate on the new midpoint.
            for &px in &lsp[..lsp_start] {
                let sign = c[px].signum();
                let half = step >> 1;

                if take(&mut coder, &mut budget, CTX_REFINEMENT)? {
                    c[px] += sign * half;
                }
                else {
                    c[px] -= sign * if half > 0 { half } else { step };
                }
            }

            n -= 1;
        }

        Ok(())
    };

    let _ = passes();

    Ok(DecodedBlock { coefficients: c, scalar, maxbits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn verify_wavmax_quantization() {
        // Mode 0: 7 fraction bits below 1.0.
        let (q, code) = quantize_wavmax(0.5);
        assert!(code & 0x80 == 0);
        assert!(q >= 0.5 && q - 0.5 < 1.0 / 128.0 + 1e-12);
        assert!((dequantize_wavmax(code) - q).abs() < 1e-12);

        // Mode 1: 3.4 fixed point offset by 1 at or above 1.0.
        let (q, code) = quantize_wavmax(3.3);
        assert!(code & 0x80 != 0);
        assert!(q >= 3.3 && q - 3.3 < 1.0 / 16.0 + 1e-12);
        assert!((dequantize_wavmax(code) - q).abs() < 1e-12);
    }

    #[test]
    fn verify_budget_too_small() {
        let block = [0i32; 32];
        assert!(matches!(
            encode(&block, 4, 0.5, HEADER_BITS - 1),
            Err(haptika_core::errors::Error::BudgetTooSmall)
        ));
    }

    #[test]
    fn verify_roundtrip_exact_with_full_budget() {
        let mut rng = SmallRng::seed_from_u64(0x5f1e);

        for _ in 0..20 {
            let bl = 128usize;

            // A sparse block shaped like quantized wavelet coefficients.
            let block: Vec<i32> = (0..bl)
                .map(|i| {
                    if rng.gen_bool(0.2) {
                        rng.gen_range(-(1 << 10)..(1 << 10)) >> (i / 32)
                    }
                    else {
                        0
                    }
                })
                .collect();

            let buf = encode(&block, 12, 0.75, u16::MAX as u32).unwrap();
            let decoded = decode(&buf, bl).unwrap();

            assert_eq!(decoded.coefficients, block);
            assert_eq!(decoded.maxbits, 12);
        }
    }

    #[test]
    fn verify_truncated_budget_degrades_monotonically(){
        let mut rng = SmallRng::seed_from_u64(0x0dd);

        let bl = 128usize;
        let block: Vec<i32> =
            (0..bl).map(|_| if rng.gen_bool(0.3) { rng.gen_range(-2048..2048) } else { 0 }).collect();

        let mut last_err = f64::INFINITY;

        for budget in [64u32, 128, 256, 1024, 4096] {
            let buf = encode(&block, 11, 0.9, budget).unwrap();
            let decoded = decode(&buf, bl).unwrap();

            let err: f64 = block
                .iter()
                .zip(&decoded.coefficients)
                .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
                .sum();

            assert!(err <= last_err);
            last_err = err;
        }

        assert_eq!(last_err, 0.0);
    }

    #[test]
    fn verify_all_zero_block() {
        let block = [0i32; 64];

        let buf = encode(&block, 0, 0.0, 256).unwrap();
        let decoded = decode(&buf, 64).unwrap();

        assert!(decoded.coefficients.iter().all(|&v| v == 0));
    }
}
