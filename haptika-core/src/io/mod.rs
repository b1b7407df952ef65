// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable bit-level I/O.
//!
//! All serialized haptic data is big-endian and MSB-first. A [`BitReaderLtr`] consumes a
//! `&[u8]`; a [`BitWriterLtr`] produces a `Vec<u8>`. Byte-oriented fields (strings, whole-byte
//! integers) are byte-aligned within the bit stream by padding with 0 bits.

mod bit;

pub use bit::{BitReaderLtr, BitWriterLtr, FiniteBitStream, ReadBitsLtr};
