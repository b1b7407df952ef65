// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `common` module defines the MIHS unit and NAL unit framing shared by the packetizer
//! and the reassembly reader.

use haptika_core::checksum::{Crc16, Crc32, Monitor};
use haptika_core::errors::{range_error, truncated_error, Result};
use haptika_core::io::{BitReaderLtr, BitWriterLtr, ReadBitsLtr};

/// The default packet window, in milliseconds.
pub const DEFAULT_PACKET_MS: u32 = 128;

/// Serialized size of a MIHS unit header.
pub const UNIT_HEADER_LEN: usize = 11;

/// Serialized size of a NAL unit header.
pub const NAL_HEADER_LEN: usize = 5;

/// The four kinds of MIHS units.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MihsUnitType {
    /// Stream metadata; emitted exactly once at stream start.
    Initialization,
    /// Sample-bearing access units of one packet window.
    Temporal,
    /// Spatial-field access units of one packet window.
    Spatial,
    /// An empty window; carries only a sync point.
    Silent,
}

impl MihsUnitType {
    pub fn from_tag(tag: u8) -> Result<MihsUnitType> {
        match tag {
            0 => Ok(MihsUnitType::Initialization),
            1 => Ok(MihsUnitType::Temporal),
            2 => Ok(MihsUnitType::Spatial),
            3 => Ok(MihsUnitType::Silent),
            _ => range_error("unknown mihs unit type tag"),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            MihsUnitType::Initialization => 0,
            MihsUnitType::Temporal => 1,
            MihsUnitType::Spatial => 2,
            MihsUnitType::Silent => 3,
        }
    }
}

/// The NAL unit types carried inside MIHS units.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NalType {
    MetadataHaptics,
    MetadataPerception,
    MetadataChannel,
    MetadataBand,
    EffectLibrary,
    Data,
    Crc16,
    Crc32,
}

impl NalType {
    pub fn from_tag(tag: u8) -> Result<NalType> {
        match tag {
            0 => Ok(NalType::MetadataHaptics),
            1 => Ok(NalType::MetadataPerception),
            2 => Ok(NalType::MetadataChannel),
            3 => Ok(NalType::MetadataBand),
            4 => Ok(NalType::EffectLibrary),
            5 => Ok(NalType::Data),
            6 => Ok(NalType::Crc16),
            7 => Ok(NalType::Crc32),
            _ => range_error("unknown nal unit type tag"),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            NalType::MetadataHaptics => 0,
            NalType::MetadataPerception => 1,
            NalType::MetadataChannel => 2,
            NalType::MetadataBand => 3,
            NalType::EffectLibrary => 4,
            NalType::Data => 5,
            NalType::Crc16 => 6,
            NalType::Crc32 => 7,
        }
    }

    pub fn is_crc(self) -> bool {
        matches!(self, NalType::Crc16 | NalType::Crc32)
    }
}

/// Whether an access unit can be decoded without prior state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuType {
    /// Random access unit.
    Rau,
    /// Dependent access unit.
    Dau,
}

/// The fixed-size header of one MIHS unit.
#[derive(Copy, Clone, Debug)]
pub struct UnitHeader {
    pub unit_type: MihsUnitType,
    /// Resynchronization point marker.
    pub sync: bool,
    /// Window start, in timescale ticks.
    pub timestamp: u32,
    /// Window length, in timescale ticks.
    pub duration: u32,
    pub nal_count: u16,
}

impl UnitHeader {
    pub fn write(&self, writer: &mut BitWriterLtr) -> Result<()> {
        writer.write_bits_leq32(u32::from(self.unit_type.to_tag()), 4)?;
        writer.write_bit(self.sync)?;
        writer.write_bits_leq32(0, 3)?;
        writer.write_bits_leq32(self.timestamp, 32)?;
        writer.write_bits_leq32(self.duration, 32)?;
        writer.write_bits_leq32(u32::from(self.nal_count), 16)?;
        Ok(())
    }

    pub fn read(reader: &mut BitReaderLtr<'_>) -> Result<UnitHeader> {
        let unit_type = MihsUnitType::from_tag(reader.read_bits_leq32(4)? as u8)?;
        let sync = reader.read_bit()?;
        reader.ignore_bits(3)?;
        let timestamp = reader.read_bits_leq32(32)?;
        let duration = reader.read_bits_leq32(32)?;
        let nal_count = reader.read_bits_leq32(16)? as u16;

        Ok(UnitHeader { unit_type, sync, timestamp, duration, nal_count })
    }
}

/// One NAL unit: a typed, length-prefixed payload.
#[derive(Clone, Debug)]
pub struct Nal {
    pub nal_type: NalType,
    pub level: u8,
    pub payload: Vec<u8>,
}

impl Nal {
    pub fn new(nal_type: NalType, payload: Vec<u8>) -> Self {
        Nal { nal_type, level: 0, payload }
    }

    /// The serialized size of this NAL, header included.
    pub fn len(&self) -> usize {
        NAL_HEADER_LEN + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Appends the serialized NAL to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.payload.len() > 0xff_ffff {
            return range_error("nal payload exceeds 24-bit length");
        }

        let mut header = BitWriterLtr::new();
        header.write_bits_leq32(u32::from(self.nal_type.to_tag()), 4)?;
        header.write_bits_leq32(u32::from(self.level) & 0xf, 4)?;
        header.write_bits_leq32(0, 8)?;
        header.write_bits_leq32(self.payload.len() as u32, 24)?;

        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&self.payload);

        Ok(())
    }

    /// Parses one NAL from the start of `buf`, returning it and the bytes consumed.
    pub fn read_from(buf: &[u8]) -> Result<(Nal, usize)> {
        if buf.len() < NAL_HEADER_LEN {
            return truncated_error();
        }

        let mut reader = BitReaderLtr::new(&buf[..NAL_HEADER_LEN]);

        let nal_type = NalType::from_tag(reader.read_bits_leq32(4)? as u8)?;
        let level = reader.read_bits_leq32(4)? as u8;
        reader.ignore_bits(8)?;
        let payload_len = reader.read_bits_leq32(24)? as usize;

        if buf.len() < NAL_HEADER_LEN + payload_len {
            return truncated_error();
        }

        let payload = buf[NAL_HEADER_LEN..NAL_HEADER_LEN + payload_len].to_vec();

        Ok((Nal { nal_type, level, payload }, NAL_HEADER_LEN + payload_len))
    }
}

/// Builds the CRC tail NAL over the serialized NAL bytes of a unit.
pub fn crc_nal(unit_bytes: &[u8], wide: bool) -> Nal {
    if wide {
        let mut crc = Crc32::new(0);
        crc.process_buf_bytes(unit_bytes);
        Nal::new(NalType::Crc32, crc.crc().to_be_bytes().to_vec())
    }
    else {
        let mut crc = Crc16::new(0);
        crc.process_buf_bytes(unit_bytes);
        Nal::new(NalType::Crc16, crc.crc().to_be_bytes().to_vec())
    }
}

/// Verifies a CRC tail NAL against the serialized NAL bytes preceding it.
pub fn verify_crc(nal: &Nal, unit_bytes: &[u8]) -> bool {
    match nal.nal_type {
        NalType::Crc16 => {
            let mut crc = Crc16::new(0);
            crc.process_buf_bytes(unit_bytes);
            nal.payload.len() == 2
                && crc.crc() == u16::from_be_bytes([nal.payload[0], nal.payload[1]])
        }
        NalType::Crc32 => {
            let mut crc = Crc32::new(0);
            crc.process_buf_bytes(unit_bytes);
            nal.payload.len() == 4
                && crc.crc()
                    == u32::from_be_bytes([
                        nal.payload[0],
                        nal.payload[1],
                        nal.payload[2],
                        nal.payload[3],
                    ])
        }
        _ => false,
    }
}
