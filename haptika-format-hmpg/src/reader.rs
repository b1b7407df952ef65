// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `reader` module parses the HMPG binary layout back into a haptic experience tree.

use log::debug;

use haptika_core::errors::{version_error, Result};
use haptika_core::io::{BitReaderLtr, ReadBitsLtr};
use haptika_core::model::{
    ActuatorType, Avatar, AvatarType, BodyPartMask, Channel, Direction, Haptic, Perception,
    PerceptionModality, ReferenceDevice, FORMAT_VERSION,
};

use crate::bands;
use crate::{
    MAX_AMPLITUDE, MAX_CUSTOM, MAX_FREQUENCY, MAX_GAIN, MAX_IMPEDANCE, MAX_PHYSICAL,
};

/// Parses HMPG bytes into a haptic experience tree and validates it.
pub fn read_hmpg(buf: &[u8]) -> Result<Haptic> {
    let mut reader = BitReaderLtr::new(buf);

    let version = reader.read_string_z()?;
    if version != FORMAT_VERSION {
        return version_error("unsupported hmpg version string");
    }

    let date = reader.read_string_z()?;
    let description = reader.read_string_z()?;
    let timescale = reader.read_bits_leq32(32)?;

    let mut haptic = Haptic { version, date, description, timescale, ..Default::default() };

    let avatar_count = reader.read_bits_leq32(16)?;
    for _ in 0..avatar_count {
        haptic.avatars.push(read_avatar(&mut reader)?);
    }

    let perception_count = reader.read_bits_leq32(16)?;

    // Channel headers carry their band counts; bodies follow after all metadata.
    let mut band_counts: Vec<Vec<u16>> = Vec::with_capacity(perception_count as usize);

    for _ in 0..perception_count {
        let (perception, counts) = read_perception(&mut reader)?;
        haptic.perceptions.push(perception);
        band_counts.push(counts);
    }

    for (perception, counts) in haptic.perceptions.iter_mut().zip(&band_counts) {
        for (channel, &band_count) in perception.channels.iter_mut().zip(counts) {
            for _ in 0..band_count {
                let (mut band, effect_count) = bands::read_band_header(&mut reader)?;
                bands::read_band_body(&mut band, effect_count, &mut reader)?;
                channel.bands.push(band);
            }
        }
    }

    debug!(
        "read hmpg: {} avatars, {} perceptions",
        haptic.avatars.len(),
        haptic.perceptions.len()
    );

    haptic.validate()?;

    Ok(haptic)
}

fn read_avatar(reader: &mut BitReaderLtr<'_>) -> Result<Avatar> {
    let id = reader.read_bits_leq32(16)? as u16 as i16;
    let lod = reader.read_bits_leq32(32)? as i32;
    let avatar_type = AvatarType::from_tag(reader.read_bits_leq32(16)? as u16)?;

    let mesh_uri =
        if avatar_type == AvatarType::Custom { Some(reader.read_string_z()?) } else { None };

    Ok(Avatar { id, lod, avatar_type, mesh_uri })
}

fn read_perception(reader: &mut BitReaderLtr<'_>) -> Result<(Perception, Vec<u16>)> {
    let id = reader.read_bits_leq32(16)? as u16 as i16;
    let modality = PerceptionModality::from_tag(reader.read_bits_leq32(16)? as u16)?;
    let description = reader.read_string_z()?;
    let avatar_id = reader.read_bits_leq32(32)? as i32;

    let unit_exponent = exponent_from_wire(reader.read_bits_leq32(8)? as u8 as i8);
    let perception_unit_exponent = exponent_from_wire(reader.read_bits_leq32(8)? as u8 as i8);

    let mut perception = Perception::new(id, avatar_id, &description, modality);
    perception.unit_exponent = unit_exponent;
    perception.perception_unit_exponent = perception_unit_exponent;

    let library_count = reader.read_bits_leq32(16)?;
    for _ in 0..library_count {
        perception.effect_library.push(bands::read_library_effect(reader)?);
    }

    let device_count = reader.read_bits_leq32(16)?;
    for _ in 0..device_count {
        perception.reference_devices.push(read_reference_device(reader)?);
    }

    let channel_count = reader.read_bits_leq32(16)?;
    let mut band_counts = Vec::with_capacity(channel_count as usize);

    for _ in 0..channel_count {
        let (channel, band_count) = read_channel(reader)?;
        perception.channels.push(channel);
        band_counts.push(band_count);
    }

    Ok((perception, band_counts))
}

/// A zero exponent travels as the neutral sentinel.
fn exponent_from_wire(value: i8) -> Option<i8> {
    if value == 0 {
        None
    }
    else {
        Some(value)
    }
}

/// Reads one reference device record.
pub fn read_reference_device(reader: &mut BitReaderLtr<'_>) -> Result<ReferenceDevice> {
    reader.realign();

    let id = reader.read_bits_leq32(16)? as u16 as i16;
    let name = reader.read_string_z()?;

    let mask = reader.read_bits_leq32(13)?;

    let mut device = ReferenceDevice::new(id, &name);

    if mask & (1 << 12) != 0 {
        device.body_part_mask = Some(reader.read_bits_leq32(32)?);
    }
    if mask & (1 << 11) != 0 {
        device.maximum_frequency = Some(reader.read_f32_quant(0.0, MAX_FREQUENCY, 32)?);
    }
    if mask & (1 << 10) != 0 {
        device.minimum_frequency = Some(reader.read_f32_quant(0.0, MAX_FREQUENCY, 32)?);
    }
    if mask & (1 << 9) != 0 {
        device.resonance_frequency = Some(reader.read_f32_quant(0.0, MAX_FREQUENCY, 32)?);
    }
    if mask & (1 << 8) != 0 {
        device.maximum_amplitude = Some(reader.read_f32_quant(0.0, MAX_AMPLITUDE, 32)?);
    }
    if mask & (1 << 7) != 0 {
        device.impedance = Some(reader.read_f32_quant(0.0, MAX_IMPEDANCE, 32)?);
    }
    if mask & (1 << 6) != 0 {
        device.maximum_voltage = Some(reader.read_f32_quant(0.0, MAX_PHYSICAL, 32)?);
    }
    if mask & (1 << 5) != 0 {
        device.maximum_current = Some(reader.read_f32_quant(0.0, MAX_PHYSICAL, 32)?);
    }
    if mask & (1 << 4) != 0 {
        device.maximum_displacement = Some(reader.read_f32_quant(0.0, MAX_PHYSICAL, 32)?);
    }
    if mask & (1 << 3) != 0 {
        device.weight = Some(reader.read_f32_quant(0.0, MAX_PHYSICAL, 32)?);
    }
    if mask & (1 << 2) != 0 {
        device.size = Some(reader.read_f32_quant(0.0, MAX_PHYSICAL, 32)?);
    }
    if mask & (1 << 1) != 0 {
        device.custom = Some(reader.read_f32_quant(-MAX_CUSTOM, MAX_CUSTOM, 32)?);
    }
    if mask & 1 != 0 {
        device.device_type = Some(ActuatorType::from_tag(reader.read_bits_leq32(32)? as u8)?);
    }

    reader.realign();

    Ok(device)
}

/// Reads one channel header, returning the channel and its band count.
pub fn read_channel(reader: &mut BitReaderLtr<'_>) -> Result<(Channel, u16)> {
    let id = reader.read_bits_leq32(16)? as u16 as i16;
    let description = reader.read_string_z()?;

    let device_id = reader.read_bits_leq32(16)? as u16 as i16;

    let mut channel = Channel::new(id, &description);
    channel.reference_device_id = if device_id < 0 { None } else { Some(device_id) };

    channel.gain = reader.read_f32_quant(-MAX_GAIN, MAX_GAIN, 32)?;
    channel.mixing_weight = reader.read_f32_quant(0.0, 1.0, 32)?;
    channel.body_part_mask = BodyPartMask::from_bits_retain(reader.read_bits_leq32(32)?);

    let optional_mask = reader.read_bits_leq32(8)?;

    let frequency_sampling = reader.read_bits_leq32(32)?;

    if frequency_sampling > 0 {
        channel.frequency_sampling = Some(frequency_sampling);
        channel.sample_count = Some(reader.read_bits_leq32(32)?);
    }

    if optional_mask & 0x1 != 0 {
        channel.direction = Some(read_direction(reader)?);
    }
    if optional_mask & 0x2 != 0 {
        channel.actuator_resolution = Some(read_direction(reader)?);
    }
    if optional_mask & 0x4 != 0 {
        channel.body_part_target = Some(reader.read_bits_leq32(32)?);
    }
    if optional_mask & 0x8 != 0 {
        channel.actuator_target = Some(read_direction(reader)?);
    }

    let vertex_count = reader.read_bits_leq32(32)?;
    for _ in 0..vertex_count {
        channel.vertices.push(reader.read_bits_leq32(32)? as i32);
    }

    let band_count = reader.read_bits_leq32(16)? as u16;

    Ok((channel, band_count))
}

fn read_direction(reader: &mut BitReaderLtr<'_>) -> Result<Direction> {
    let x = reader.read_bits_leq32(8)? as u8 as i8;
    let y = reader.read_bits_leq32(8)? as u8 as i8;
    let z = reader.read_bits_leq32(8)? as u8 as i8;
    Ok(Direction::new(x, y, z))
}
