// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Haptika
//!
//! Haptika is a pure Rust encoder/decoder core for the MPEG haptics coding standard: an
//! in-memory model of a haptic experience, a psychohaptic wavelet codec, the HMPG binary
//! interchange format, and the MIHS streaming packetizer.
//!
//! The individual pieces live in their own crates and are re-exported here:
//!
//! | Module | Contents |
//! |----------|--------------|
//! | [`core`] | the data model, errors, bit I/O, checksums, DSP |
//! | [`codec`] | the SPIHT + psychohaptic wavelet block codec |
//! | [`hmpg`] | the `.hmpg` whole-file binary format |
//! | [`mihs`] | the `.mpg` streaming unit format |

pub use haptika_codec_wavelet as codec;
pub use haptika_core as core;
pub use haptika_format_hmpg as hmpg;
pub use haptika_format_mihs as mihs;

pub use haptika_format_hmpg::{read_hmpg, write_hmpg};
pub use haptika_format_mihs::{read_mihs, write_mihs};
