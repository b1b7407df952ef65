// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `writer` module serializes a whole haptic experience into the HMPG binary layout.

use log::debug;

use haptika_core::errors::Result;
use haptika_core::io::BitWriterLtr;
use haptika_core::model::{
    Avatar, AvatarType, Channel, Haptic, Perception, ReferenceDevice,
};

use crate::bands;
use crate::{
    MAX_AMPLITUDE, MAX_CUSTOM, MAX_FREQUENCY, MAX_GAIN, MAX_IMPEDANCE, MAX_PHYSICAL,
};

/// Serializes `haptic` into HMPG bytes.
///
/// The tree is validated first; timeline effects must already be linearized for band bodies
/// to serialize, so callers typically run [`Haptic::linearize_timelines`] beforehand.
pub fn write_hmpg(haptic: &Haptic) -> Result<Vec<u8>> {
    haptic.validate()?;

    let mut writer = BitWriterLtr::new();

    write_header(haptic, &mut writer)?;

    writer.write_bits_leq32(haptic.avatars.len() as u32, 16)?;
    for avatar in &haptic.avatars {
        write_avatar(avatar, &mut writer)?;
    }

    writer.write_bits_leq32(haptic.perceptions.len() as u32, 16)?;
    for perception in &haptic.perceptions {
        write_perception(perception, &mut writer)?;
    }

    // Body: every band of every channel of every perception, in declaration order.
    for perception in &haptic.perceptions {
        for channel in &perception.channels {
            for band in &channel.bands {
                bands::write_band_header(band, &mut writer)?;
                bands::write_band_body(band, &mut writer)?;
            }
        }
    }

    let buf = writer.into_bytes();
    debug!("wrote {} byte hmpg body", buf.len());

    Ok(buf)
}

fn write_header(haptic: &Haptic, writer: &mut BitWriterLtr) -> Result<()> {
    writer.write_string_z(&haptic.version);
    writer.write_string_z(&haptic.date);
    writer.write_string_z(&haptic.description);
    writer.write_bits_leq32(haptic.timescale, 32)?;
    Ok(())
}

fn write_avatar(avatar: &Avatar, writer: &mut BitWriterLtr) -> Result<()> {
    writer.write_bits_leq32(avatar.id as u16 as u32, 16)?;
    writer.write_bits_leq32(avatar.lod as u32, 32)?;
    writer.write_bits_leq32(u32::from(avatar.avatar_type.to_tag()), 16)?;

    if avatar.avatar_type == AvatarType::Custom {
        writer.write_string_z(avatar.mesh_uri.as_deref().unwrap_or(""));
    }

    Ok(())
}

fn write_perception(perception: &Perception, writer: &mut BitWriterLtr) -> Result<()> {
    writer.write_bits_leq32(perception.id as u16 as u32, 16)?;
    writer.write_bits_leq32(u32::from(perception.modality.to_tag()), 16)?;
    writer.write_string_z(&perception.description);
    writer.write_bits_leq32(perception.avatar_id as u32, 32)?;

    writer.write_bits_leq32(perception.unit_exponent.unwrap_or(0) as u8 as u32, 8)?;
    writer.write_bits_leq32(perception.perception_unit_exponent.unwrap_or(0) as u8 as u32, 8)?;

    writer.write_bits_leq32(perception.effect_library.len() as u32, 16)?;
    for effect in &perception.effect_library {
        bands::write_library_effect(effect, writer)?;
    }

    writer.write_bits_leq32(perception.reference_devices.len() as u32, 16)?;
    for device in &perception.reference_devices {
        write_reference_device(device, writer)?;
    }

    writer.write_bits_leq32(perception.channels.len() as u32, 16)?;
    for channel in &perception.channels {
        write_channel(channel, writer)?;
    }

    Ok(())
}

/// Writes one reference device: id, name, then a 13-bit option mask with one bit per optional
/// field in declaration order, then one 32-bit word per present field.
pub fn write_reference_device(device: &ReferenceDevice, writer: &mut BitWriterLtr) -> Result<()> {
    writer.pad_to_byte();

    writer.write_bits_leq32(device.id as u16 as u32, 16)?;
    writer.write_string_z(&device.name);

    let mask = (u32::from(device.body_part_mask.is_some()) << 12)
        | (u32::from(device.maximum_frequency.is_some()) << 11)
        | (u32::from(device.minimum_frequency.is_some()) << 10)
        | (u32::from(device.resonance_frequency.is_some()) << 9)
        | (u32::from(device.maximum_amplitude.is_some()) << 8)
        | (u32::from(device.impedance.is_some()) << 7)
        | (u32::from(device.maximum_voltage.is_some()) << 6)
        | (u32::from(device.maximum_current.is_some()) << 5)
        | (u32::from(device.maximum_displacement.is_some()) << 4)
        | (u32::from(device.weight.is_some()) << 3)
        | (u32::from(device.size.is_some()) << 2)
        | (u32::from(device.custom.is_some()) << 1)
        | u32::from(device.device_type.is_some());

    writer.write_bits_leq32(mask, 13)?;

    if let Some(body_part_mask) = device.body_part_mask {
        writer.write_bits_leq32(body_part_mask, 32)?;
    }
    if let Some(frequency) = device.maximum_frequency {
        writer.write_f32_quant(frequency, 0.0, MAX_FREQUENCY, 32)?;
    }
    if let Some(frequency) = device.minimum_frequency {
        writer.write_f32_quant(frequency, 0.0, MAX_FREQUENCY, 32)?;
    }
    if let Some(frequency) = device.resonance_frequency {
        writer.write_f32_quant(frequency, 0.0, MAX_FREQUENCY, 32)?;
    }
    if let Some(amplitude) = device.maximum_amplitude {
        writer.write_f32_quant(amplitude, 0.0, MAX_AMPLITUDE, 32)?;
    }
    if let Some(impedance) = device.impedance {
        writer.write_f32_quant(impedance, 0.0, MAX_IMPEDANCE, 32)?;
    }
    if let Some(voltage) = device.maximum_voltage {
        writer.write_f32_quant(voltage, 0.0, MAX_PHYSICAL, 32)?;
    }
    if let Some(current) = device.maximum_current {
        writer.write_f32_quant(current, 0.0, MAX_PHYSICAL, 32)?;
    }
    if let Some(displacement) = device.maximum_displacement {
        writer.write_f32_quant(displacement, 0.0, MAX_PHYSICAL, 32)?;
    }
    if let Some(weight) = device.weight {
        writer.write_f32_quant(weight, 0.0, MAX_PHYSICAL, 32)?;
    }
    if let Some(size) = device.size {
        writer.write_f32_quant(size, 0.0, MAX_PHYSICAL, 32)?;
    }
    if let Some(custom) = device.custom {
        writer.write_f32_quant(custom, -MAX_CUSTOM, MAX_CUSTOM, 32)?;
    }
    if let Some(device_type) = device.device_type {
        writer.write_bits_leq32(u32::from(device_type.to_tag()), 32)?;
    }

    writer.pad_to_byte();

    Ok(())
}

/// Writes one channel header, including its band count. Band bodies follow in the file body.
pub fn write_channel(channel: &Channel, writer: &mut BitWriterLtr) -> Result<()> {
    writer.write_bits_leq32(channel.id as u16 as u32, 16)?;
    writer.write_string_z(&channel.description);

    // -1 is the unset sentinel.
    let device_id = channel.reference_device_id.unwrap_or(-1);
    writer.write_bits_leq32(device_id as u16 as u32, 16)?;

    writer.write_f32_quant(channel.gain, -MAX_GAIN, MAX_GAIN, 32)?;
    writer.write_f32_quant(channel.mixing_weight, 0.0, 1.0, 32)?;
    writer.write_bits_leq32(channel.body_part_mask.bits(), 32)?;

    let optional_mask = u32::from(channel.direction.is_some())
        | (u32::from(channel.actuator_resolution.is_some()) << 1)
        | (u32::from(channel.body_part_target.is_some()) << 2)
        | (u32::from(channel.actuator_target.is_some()) << 3);

    writer.write_bits_leq32(optional_mask, 8)?;

    let frequency_sampling = channel.frequency_sampling.unwrap_or(0);
    writer.write_bits_leq32(frequency_sampling, 32)?;

    if frequency_sampling > 0 {
        writer.write_bits_leq32(channel.sample_count.unwrap_or(0), 32)?;
    }

    if let Some(direction) = channel.direction {
        writer.write_bits_leq32(direction.x as u8 as u32, 8)?;
        writer.write_bits_leq32(direction.y as u8 as u32, 8)?;
        writer.write_bits_leq32(direction.z as u8 as u32, 8)?;
    }
    if let Some(resolution) = channel.actuator_resolution {
        writer.write_bits_leq32(resolution.x as u8 as u32, 8)?;
        writer.write_bits_leq32(resolution.y as u8 as u32, 8)?;
        writer.write_bits_leq32(resolution.z as u8 as u32, 8)?;
    }
    if let Some(target) = channel.body_part_target {
        writer.write_bits_leq32(target, 32)?;
    }
    if let Some(target) = channel.actuator_target {
        writer.write_bits_leq32(target.x as u8 as u32, 8)?;
        writer.write_bits_leq32(target.y as u8 as u32, 8)?;
        writer.write_bits_leq32(target.z as u8 as u32, 8)?;
    }

    writer.write_bits_leq32(channel.vertices.len() as u32, 32)?;
    for &vertex in &channel.vertices {
        writer.write_bits_leq32(vertex as u32, 32)?;
    }

    writer.write_bits_leq32(channel.bands.len() as u32, 16)?;

    Ok(())
}
