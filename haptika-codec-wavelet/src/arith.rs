// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `arith` module implements the adaptive binary range coder behind the SPIHT bitplane
//! coder.
//!
//! The coder is a 32-bit range coder renormalizing on the 24 high bits, with carry-aware byte
//! output and a 5-byte end-of-stream flush. Probabilities are 12-bit and adapt with a shift of
//! 5 per coded symbol.

/// Number of bits of an adaptive probability.
const PROB_BITS: u32 = 12;

/// Initial probability: both symbols equally likely.
const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Adaption rate.
const PROB_MOVE_BITS: u32 = 5;

/// Renormalization threshold.
const RANGE_TOP: u32 = 1 << 24;

/// Context for pixel significance bits.
pub const CTX_SIGNIFICANCE: usize = 0;
/// Context for sign bits.
pub const CTX_SIGN: usize = 1;
/// Context for refinement bits.
pub const CTX_REFINEMENT: usize = 2;
/// Context for set (descendant) significance bits.
pub const CTX_SET: usize = 3;

/// The number of adaptive contexts.
pub const NUM_CONTEXTS: usize = 4;

#[derive(Clone)]
struct Contexts {
    probs: [u16; NUM_CONTEXTS],
}

impl Contexts {
    fn new() -> Self {
        Contexts { probs: [PROB_INIT; NUM_CONTEXTS] }
    }

    /// The probability that the next symbol in `ctx` is a 0, in 1/4096 units.
    #[inline(always)]
    fn prob(&self, ctx: usize) -> u32 {
        u32::from(self.probs[ctx])
    }

    #[inline(always)]
    fn update(&mut self, ctx: usize, bit: bool) {
        let p = self.probs[ctx];
        self.probs[ctx] = if bit {
            p - (p >> PROB_MOVE_BITS)
        }
        else {
            p + (((1 << PROB_BITS) - p) >> PROB_MOVE_BITS)
        };
    }
}

/// The encoding half of the range coder. Bytes accumulate in an owned buffer.
pub struct ArithEncoder {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    contexts: Contexts,
    buf: Vec<u8>,
}

impl Default for ArithEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArithEncoder {
    pub fn new() -> Self {
        ArithEncoder {
            low: 0,
            range: u32::MAX,
            cache: 0,
            cache_size: 1,
            contexts: Contexts::new(),
            buf: Vec::new(),
        }
    }

    /// Encode one bit in the given context.
    pub fn encode_bit(&mut self, ctx: usize, bit: bool) {
        let bound = (self.range >> PROB_BITS) * self.contexts.prob(ctx);

        if !bit {
            self.range = bound;
        }
        else {
            self.low += u64::from(bound);
            self.range -= bound;
        }

        self.contexts.update(ctx, bit);

        while self.range < RANGE_TOP {
            self.shift_low();
            self.range <<= 8;
        }
    }

    /// Flush the coder state and return the encoded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..5 {
            self.shift_low();
        }
        self.buf
    }

    fn shift_low(&mut self) {
        if (self.low as u32) < 0xff00_0000 || (self.low >> 32) != 0 {
            let carry = (self.low >> 32) as u8;
            let mut byte = self.cache;

            loop {
                self.buf.push(byte.wrapping_add(carry));
                byte = 0xff;

                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }

            self.cache = (self.low >> 24) as u8;
        }

        self.cache_size += 1;
        self.low = (self.low as u32 as u64) << 8;
    }
}

/// The decoding half of the range coder, reading from a byte slice.
///
/// A decoder past the end of its input keeps producing symbols from zero bytes; the caller
/// bounds the symbol count.
pub struct ArithDecoder<'a> {
    code: u32,
    range: u32,
    contexts: Contexts,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArithDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        let mut decoder =
            ArithDecoder { code: 0, range: u32::MAX, contexts: Contexts::new(), buf, pos: 0 };

        // The first output byte of the encoder is always 0 and only aligns the carry cache.
        decoder.next_byte();
        for _ in 0..4 {
            decoder.code = (decoder.code << 8) | u32::from(decoder.next_byte());
        }

        decoder
    }

    /// Decode one bit in the given context.
    pub fn decode_bit(&mut self, ctx: usize) -> bool {
        let bound = (self.range >> PROB_BITS) * self.contexts.prob(ctx);

        let bit = if self.code < bound {
            self.range = bound;
            false
        }
        else {
            self.code -= bound;
            self.range -= bound;
            true
        };

        self.contexts.update(ctx, bit);

        while self.range < RANGE_TOP {
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(self.next_byte());
        }

        bit
    }

    #[inline(always)]
    fn next_byte(&mut self) -> u8 {
        let byte = self.buf.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn verify_roundtrip_random_bits() {
        let mut rng = SmallRng::seed_from_u64(0xa51c);

        // Skewed distributions per context exercise probability adaption.
        let skew = [0.9, 0.5, 0.2, 0.75];

        let bits: Vec<(usize, bool)> = (0..10_000)
            .map(|_| {
                let ctx = rng.gen_range(0..NUM_CONTEXTS);
                (ctx, rng.gen_bool(skew[ctx]))
            })
            .collect();

        let mut encoder = ArithEncoder::new();
        for &(ctx, bit) in &bits {
            encoder.encode_bit(ctx, bit);
        }

        let buf = encoder.finish();
        let mut decoder = ArithDecoder::new(&buf);

        for &(ctx, bit) in &bits {
            assert_eq!(decoder.decode_bit(ctx), bit);
        }
    }

    #[test]
    fn verify_skewed_bits_compress() {
        let mut rng = SmallRng::seed_from_u64(0xbea7);

        let bits: Vec<bool> = (0..8_192).map(|_| rng.gen_bool(0.02)).collect();

        let mut encoder = ArithEncoder::new();
        for &bit in &bits {
            encoder.encode_bit(CTX_SIGNIFICANCE, bit);
        }

        let buf = encoder.finish();

        // A heavily skewed source must compress well below 1 bit per symbol.
        assert!(buf.len() < bits.len() / 8 / 2);

        let mut decoder = ArithDecoder::new(&buf);
        for &bit in &bits {
            assert_eq!(decoder.decode_bit(CTX_SIGNIFICANCE), bit);
        }
    }
}
