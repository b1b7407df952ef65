// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `reader` module reassembles a haptic experience from a MIHS unit stream.
//!
//! The reader is a state machine: the Initialization unit builds the experience shell and a
//! band arena keyed by stream band id; every following Data NAL appends effects or keyframes
//! into its band. A unit's CRC is verified before any of its NALs touch reader state, so a
//! corrupted unit can be dropped and the stream resumed at the next sync point.

use std::collections::HashMap;

use log::{debug, warn};

use haptika_core::errors::{crc_error, inconsistent_error, truncated_error, Result};
use haptika_core::io::{BitReaderLtr, ReadBitsLtr};
use haptika_core::model::{
    ActuatorType, Avatar, AvatarType, Band, BandType, BodyPartMask, Channel, CurveType,
    Direction, Haptic, Perception, PerceptionModality, ReferenceDevice,
};

use haptika_format_hmpg::bands as hmpg_bands;

use crate::common::{verify_crc, MihsUnitType, Nal, UnitHeader, NalType, UNIT_HEADER_LEN};

/// The reassembly state machine.
#[derive(Default)]
pub struct StreamReader {
    haptic: Haptic,
    initialized: bool,
    /// Stream perception id to index.
    perceptions: HashMap<i16, usize>,
    /// Stream band id to `(perception, channel, band)` indices.
    bands: HashMap<u16, (usize, usize, usize)>,
    /// `(band id, stream effect id)` to effect index, for continuation NALs.
    effects: HashMap<(u16, u16), usize>,
    /// The current stream time, from the last unit header.
    time: u32,
}

impl StreamReader {
    pub fn new() -> Self {
        StreamReader::default()
    }

    /// The experience assembled so far.
    pub fn haptic(&self) -> &Haptic {
        &self.haptic
    }

    /// The stream time reached so far: the end of the last unit's window, in timescale ticks.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Validates and returns the assembled experience.
    pub fn finish(self) -> Result<Haptic> {
        if !self.initialized {
            return inconsistent_error("stream ended before an initialization unit");
        }

        self.haptic.validate()?;
        Ok(self.haptic)
    }

    /// Parses one MIHS unit from the front of `buf`, returning the bytes consumed.
    ///
    /// On `CrcMismatch` the reader state is untouched; the caller may skip the unit and
    /// continue with the next one.
    pub fn read_unit(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < UNIT_HEADER_LEN {
            return truncated_error();
        }

        let mut header_reader = BitReaderLtr::new(&buf[..UNIT_HEADER_LEN]);
        let header = UnitHeader::read(&mut header_reader)?;

        // Collect the unit's NALs before touching any state.
        let mut nals: Vec<Nal> = Vec::with_capacity(usize::from(header.nal_count));
        let mut offset = UNIT_HEADER_LEN;
        let mut crc_start = offset;

        for _ in 0..header.nal_count {
            let (nal, consumed) = Nal::read_from(&buf[offset..])?;

            if !nal.nal_type.is_crc() {
                crc_start = offset + consumed;
            }

            offset += consumed;
            nals.push(nal);
        }

        // The CRC NAL covers every preceding NAL of the unit.
        if let Some(crc) = nals.last().filter(|nal| nal.nal_type.is_crc()) {
            if !verify_crc(crc, &buf[UNIT_HEADER_LEN..crc_start]) {
                warn!("crc mismatch in {:?} unit at t={}", header.unit_type, header.timestamp);
                return crc_error();
            }
        }

        match header.unit_type {
            MihsUnitType::Initialization => self.apply_initialization(&nals)?,
            MihsUnitType::Temporal | MihsUnitType::Spatial => self.apply_windowed(&nals)?,
            MihsUnitType::Silent => {
                debug!("silent window at t={} for {}", header.timestamp, header.duration);
            }
        }

        self.time = header.timestamp.saturating_add(header.duration);

        Ok(offset)
    }

    fn apply_initialization(&mut self, nals: &[Nal]) -> Result<()> {
        if self.initialized {
            return inconsistent_error("repeated initialization unit");
        }

        for nal in nals {
            match nal.nal_type {
                NalType::MetadataHaptics => self.read_metadata_haptics(&nal.payload)?,
                NalType::MetadataPerception => self.read_metadata_perception(&nal.payload)?,
                NalType::EffectLibrary => self.read_effect_library(&nal.payload)?,
                NalType::MetadataChannel => self.read_metadata_channel(&nal.payload)?,
                NalType::MetadataBand => self.read_metadata_band(&nal.payload)?,
                NalType::Crc16 | NalType::Crc32 => (),
                NalType::Data => {
                    return inconsistent_error("data nal inside an initialization unit");
                }
            }
        }

        self.initialized = true;
        Ok(())
    }

    fn apply_windowed(&mut self, nals: &[Nal]) -> Result<()> {
        if !self.initialized {
            return inconsistent_error("data unit before initialization");
        }

        for nal in nals {
            match nal.nal_type {
                NalType::Data => self.read_data(&nal.payload)?,
                NalType::Crc16 | NalType::Crc32 => (),
                _ => return inconsistent_error("metadata nal inside a windowed unit"),
            }
        }

        Ok(())
    }

    fn read_metadata_haptics(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        self.haptic.version = reader.read_string_z()?;
        self.haptic.date = reader.read_string_z()?;
        self.haptic.description = reader.read_string_z()?;
        self.haptic.timescale = reader.read_bits_leq32(32)?;

        let avatar_count = reader.read_bits_leq32(16)?;
        for _ in 0..avatar_count {
            let id = reader.read_bits_leq32(16)? as u16 as i16;
            let lod = reader.read_bits_leq32(32)? as i32;
            let avatar_type = AvatarType::from_tag(reader.read_bits_leq32(16)? as u16)?;

            let mesh_uri =
                if reader.read_bit()? { Some(reader.read_string_z()?) } else { None };
            reader.realign();

            self.haptic.avatars.push(Avatar { id, lod, avatar_type, mesh_uri });
        }

        Ok(())
    }

    fn read_metadata_perception(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        let id = reader.read_bits_leq32(16)? as u16 as i16;
        let modality = PerceptionModality::from_tag(reader.read_bits_leq32(16)? as u16)?;
        let description = reader.read_string_z()?;
        let avatar_id = reader.read_bits_leq32(32)? as i32;

        let has_unit_exponent = reader.read_bit()?;
        let has_perception_unit_exponent = reader.read_bit()?;

        let mut perception = Perception::new(id, avatar_id, &description, modality);

        if has_unit_exponent {
            perception.unit_exponent = Some(reader.read_bits_leq32(8)? as u8 as i8);
        }
        if has_perception_unit_exponent {
            perception.perception_unit_exponent = Some(reader.read_bits_leq32(8)? as u8 as i8);
        }
        reader.realign();

        let device_count = reader.read_bits_leq32(16)?;
        for _ in 0..device_count {
            perception.reference_devices.push(read_reference_device_raw(&mut reader)?);
        }

        // Channel count; channels arrive in their own metadata NALs.
        let _ = reader.read_bits_leq32(16)?;

        if self.perceptions.contains_key(&id) {
            return inconsistent_error("duplicate perception id in stream metadata");
        }

        self.perceptions.insert(id, self.haptic.perceptions.len());
        self.haptic.perceptions.push(perception);

        Ok(())
    }

    fn read_effect_library(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        let perception_id = reader.read_bits_leq32(16)? as u16 as i16;
        let count = reader.read_bits_leq32(16)?;

        let index = match self.perceptions.get(&perception_id) {
            Some(&index) => index,
            None => return inconsistent_error("library for an undeclared perception"),
        };

        for _ in 0..count {
            self.haptic.perceptions[index]
                .effect_library
                .push(hmpg_bands::read_library_effect(&mut reader)?);
        }

        Ok(())
    }

    fn read_metadata_channel(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        let perception_id = reader.read_bits_leq32(16)? as u16 as i16;
        let id = reader.read_bits_leq32(16)? as u16 as i16;
        let description = reader.read_string_z()?;

        let device_id = reader.read_bits_leq32(16)? as u16 as i16;

        let mut channel = Channel::new(id, &description);
        channel.reference_device_id = if device_id < 0 { None } else { Some(device_id) };

        channel.gain = f32::from_bits(reader.read_bits_leq32(32)?);
        channel.mixing_weight = f32::from_bits(reader.read_bits_leq32(32)?);
        channel.body_part_mask = BodyPartMask::from_bits_retain(reader.read_bits_leq32(32)?);

        let optional_mask = reader.read_bits_leq32(8)?;

        let frequency_sampling = reader.read_bits_leq32(32)?;
        if frequency_sampling > 0 {
            channel.frequency_sampling = Some(frequency_sampling);
            channel.sample_count = Some(reader.read_bits_leq32(32)?);
        }

        if optional_mask & 0x1 != 0 {
            channel.direction = Some(read_direction(&mut reader)?);
        }
        if optional_mask & 0x2 != 0 {
            channel.actuator_resolution = Some(read_direction(&mut reader)?);
        }
        if optional_mask & 0x4 != 0 {
            channel.body_part_target = Some(reader.read_bits_leq32(32)?);
        }
        if optional_mask & 0x8 != 0 {
            channel.actuator_target = Some(read_direction(&mut reader)?);
        }

        let vertex_count = reader.read_bits_leq32(16)?;
        for _ in 0..vertex_count {
            channel.vertices.push(reader.read_bits_leq32(32)? as i32);
        }

        // Band count; bands arrive in their own metadata NALs.
        let _ = reader.read_bits_leq32(16)?;

        let index = match self.perceptions.get(&perception_id) {
            Some(&index) => index,
            None => return inconsistent_error("channel for an undeclared perception"),
        };

        self.haptic.perceptions[index].channels.push(channel);

        Ok(())
    }

    fn read_metadata_band(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        let perception_id = reader.read_bits_leq32(16)? as u16 as i16;
        let channel_id = reader.read_bits_leq32(16)? as u16 as i16;
        let band_id = reader.read_bits_leq32(16)? as u16;

        let band_type = BandType::from_tag(reader.read_bits_leq32(16)? as u16)?;
        let curve_type = CurveType::from_tag(reader.read_bits_leq32(16)? as u16)?;

        let (window_length, block_length) = if band_type == BandType::WaveletWave {
            let window = reader.read_bits_leq32(32)? as i32;
            let block = reader.read_bits_leq32(32)? as i32;
            (Some(window), Some(block))
        }
        else {
            (None, None)
        };

        let lower = reader.read_bits_leq32(32)? as i32;
        let upper = reader.read_bits_leq32(32)? as i32;

        let perception_index = match self.perceptions.get(&perception_id) {
            Some(&index) => index,
            None => return inconsistent_error("band for an undeclared perception"),
        };

        let perception = &mut self.haptic.perceptions[perception_index];

        let channel_index = match perception.channels.iter().position(|c| c.id == channel_id) {
            Some(index) => index,
            None => return inconsistent_error("band for an undeclared channel"),
        };

        if self.bands.contains_key(&band_id) {
            return inconsistent_error("duplicate band id in stream metadata");
        }

        let mut band = Band::new(band_type, lower, upper);
        band.curve_type = curve_type;
        band.window_length = window_length;
        band.block_length = block_length;

        let channel = &mut perception.channels[channel_index];
        let band_index = channel.bands.len();
        channel.bands.push(band);

        self.bands.insert(band_id, (perception_index, channel_index, band_index));

        Ok(())
    }

    fn read_data(&mut self, payload: &[u8]) -> Result<()> {
        let mut reader = BitReaderLtr::new(payload);

        // The RAU/DAU flag; access units in this stream are always independently decodable.
        let _rau = reader.read_bit()?;
        reader.ignore_bits(7)?;

        let perception_id = reader.read_bits_leq32(16)? as u16 as i16;
        let channel_id = reader.read_bits_leq32(16)? as u16 as i16;
        let band_id = reader.read_bits_leq32(16)? as u16;
        let _timestamp = reader.read_bits_leq32(32)?;
        let effect_count = reader.read_bits_leq32(16)?;

        let &(pi, ci, bi) = match self.bands.get(&band_id) {
            Some(indices) => indices,
            None => return inconsistent_error("data nal for an undeclared band"),
        };

        if self.haptic.perceptions[pi].id != perception_id
            || self.haptic.perceptions[pi].channels[ci].id != channel_id
        {
            return inconsistent_error("data nal ids disagree with stream metadata");
        }

        for _ in 0..effect_count {
            reader.realign();
            let stream_id = reader.read_bits_leq32(16)? as u16;

            let mut effect = hmpg_bands::read_library_effect(&mut reader)?;

            let band = &mut self.haptic.perceptions[pi].channels[ci].bands[bi];

            if band.band_type == BandType::WaveletWave {
                reader.realign();

                let len = reader.read_varint()? as usize;
                if len == 0 {
                    return inconsistent_error("wavelet effect with empty bitstream");
                }

                let mut bitstream = vec![0u8; len];
                for byte in bitstream.iter_mut() {
                    *byte = reader.read_bits_leq32(8)? as u8;
                }

                effect.wavelet_bitstream = bitstream;
            }

            match self.effects.get(&(band_id, stream_id)) {
                Some(&index) => {
                    // A continuation of an effect already begun in an earlier window.
                    let existing = &mut band.effects[index];

                    if existing.position != effect.position {
                        return inconsistent_error("continuation changes effect position");
                    }

                    existing.keyframes.extend(effect.keyframes);
                }
                None => {
                    // Within a band, effects must arrive in non-decreasing position order.
                    if let Some(last) = band.effects.last() {
                        if effect.position < last.position {
                            return inconsistent_error("effects out of order within band");
                        }
                    }

                    let index = band.effects.len();
                    band.effects.push(effect);
                    self.effects.insert((band_id, stream_id), index);
                }
            }
        }

        Ok(())
    }
}

fn read_direction(reader: &mut BitReaderLtr<'_>) -> Result<Direction> {
    let x = reader.read_bits_leq32(8)? as u8 as i8;
    let y = reader.read_bits_leq32(8)? as u8 as i8;
    let z = reader.read_bits_leq32(8)? as u8 as i8;
    Ok(Direction::new(x, y, z))
}

fn read_reference_device_raw(reader: &mut BitReaderLtr<'_>) -> Result<ReferenceDevice> {
    reader.realign();

    let id = reader.read_bits_leq32(16)? as u16 as i16;
    let name = reader.read_string_z()?;

    let mask = reader.read_bits_leq32(13)?;

    let mut device = ReferenceDevice::new(id, &name);

    if mask & (1 << 12) != 0 {
        device.body_part_mask = Some(reader.read_bits_leq32(32)?);
    }

    let fields: [&mut Option<f32>; 11] = [
        &mut device.maximum_frequency,
        &mut device.minimum_frequency,
        &mut device.resonance_frequency,
        &mut device.maximum_amplitude,
        &mut device.impedance,
        &mut device.maximum_voltage,
        &mut device.maximum_current,
        &mut device.maximum_displacement,
        &mut device.weight,
        &mut device.size,
        &mut device.custom,
    ];

    for (i, field) in fields.into_iter().enumerate() {
        if mask & (1 << (11 - i)) != 0 {
            *field = Some(f32::from_bits(reader.read_bits_leq32(32)?));
        }
    }

    if mask & 1 != 0 {
        device.device_type = Some(ActuatorType::from_tag(reader.read_bits_leq32(32)? as u8)?);
    }

    reader.realign();

    Ok(device)
}

/// Reassembles a whole experience from a flat MIHS byte stream.
pub fn read_mihs(buf: &[u8]) -> Result<Haptic> {
    let mut reader = StreamReader::new();
    let mut offset = 0;

    while offset < buf.len() {
        offset += reader.read_unit(&buf[offset..])?;
    }

    reader.finish()
}
