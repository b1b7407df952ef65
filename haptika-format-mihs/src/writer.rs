// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `writer` module packetizes a haptic experience into a MIHS unit stream.
//!
//! One Initialization unit opens the stream. Every following packet window emits a Temporal
//! unit for the sample-bearing perceptions, a Spatial unit for the field perceptions, or a
//! Silent unit when the window is empty. Data NALs within a unit are stable-sorted by
//! timestamp, and every unit is closed by a CRC NAL.

use std::collections::HashMap;

use log::debug;

use haptika_core::errors::{range_error, Result};
use haptika_core::io::BitWriterLtr;
use haptika_core::model::{
    Band, BandType, Channel, Effect, Haptic, Keyframe, Perception, ReferenceDevice,
};

use haptika_format_hmpg::bands as hmpg_bands;

use crate::common::{crc_nal, AuType, MihsUnitType, Nal, NalType, UnitHeader};

/// One band's place in the experience tree, flattened for packetization.
struct BandRef {
    band_id: u16,
    perception: usize,
    channel: usize,
    band: usize,
    spatial: bool,
}

/// The per-stream packetizer state: the effect-id allocator and the RAU bookkeeping. Both are
/// reset at stream start.
struct StreamWriter {
    next_effect_id: u16,
    effect_ids: HashMap<(u16, usize), u16>,
    started_bands: Vec<bool>,
}

impl StreamWriter {
    fn new(num_bands: usize) -> Self {
        StreamWriter {
            next_effect_id: 0,
            effect_ids: HashMap::new(),
            started_bands: vec![false; num_bands],
        }
    }

    /// The monotonically increasing per-stream id of an effect, allocated on first emission.
    fn effect_id(&mut self, band_id: u16, effect_index: usize) -> u16 {
        if let Some(&id) = self.effect_ids.get(&(band_id, effect_index)) {
            return id;
        }

        let id = self.next_effect_id;
        self.next_effect_id = self.next_effect_id.wrapping_add(1);
        self.effect_ids.insert((band_id, effect_index), id);
        id
    }
}

/// Packetizes `haptic` into a flat MIHS byte stream with the given packet window, in
/// milliseconds.
pub fn write_mihs(haptic: &Haptic, packet_ms: u32) -> Result<Vec<u8>> {
    if packet_ms == 0 {
        return range_error("packet duration must be at least 1 ms");
    }

    haptic.validate()?;

    let mut haptic = haptic.clone();
    haptic.linearize_timelines();

    let packet_ticks =
        ((u64::from(packet_ms) * u64::from(haptic.timescale) + 999) / 1000).max(1) as u32;

    let band_refs = collect_bands(&haptic)?;
    let mut swriter = StreamWriter::new(band_refs.len());

    let mut out = Vec::new();

    write_initialization_unit(&haptic, &band_refs, &mut out)?;

    let duration = haptic.duration().max(0) as u32;

    let mut t = 0u32;
    loop {
        let mut temporal: Vec<(u32, Nal)> = Vec::new();
        let mut spatial: Vec<(u32, Nal)> = Vec::new();

        for band_ref in &band_refs {
            let band = &haptic.perceptions[band_ref.perception].channels[band_ref.channel].bands
                [band_ref.band];
            let perception_id =
                haptic.perceptions[band_ref.perception].id;
            let channel_id =
                haptic.perceptions[band_ref.perception].channels[band_ref.channel].id;

            if let Some((ts, nal)) = packetize_band(
                band,
                band_ref,
                perception_id,
                channel_id,
                t,
                packet_ticks,
                &mut swriter,
            )? {
                if band_ref.spatial {
                    spatial.push((ts, nal));
                }
                else {
                    temporal.push((ts, nal));
                }
            }
        }

        if temporal.is_empty() && spatial.is_empty() {
            write_unit(MihsUnitType::Silent, true, t, packet_ticks, Vec::new(), &mut out)?;
        }
        else {
            // The ordering guarantee: a time-monotone interleaving of all bands. The sort is
            // stable, so ties preserve source band order.
            if !temporal.is_empty() {
                temporal.sort_by_key(|&(ts, _)| ts);
                let nals = temporal.into_iter().map(|(_, nal)| nal).collect();
                write_unit(MihsUnitType::Temporal, false, t, packet_ticks, nals, &mut out)?;
            }

            if !spatial.is_empty() {
                spatial.sort_by_key(|&(ts, _)| ts);
                let nals = spatial.into_iter().map(|(_, nal)| nal).collect();
                write_unit(MihsUnitType::Spatial, false, t, packet_ticks, nals, &mut out)?;
            }
        }

        t = t.saturating_add(packet_ticks);
        if t > duration {
            break;
        }
    }

    debug!("packetized {} ticks into {} bytes", duration, out.len());

    Ok(out)
}

fn collect_bands(haptic: &Haptic) -> Result<Vec<BandRef>> {
    let mut refs = Vec::new();

    for (pi, perception) in haptic.perceptions.iter().enumerate() {
        for (ci, channel) in perception.channels.iter().enumerate() {
            for (bi, _) in channel.bands.iter().enumerate() {
                if refs.len() > usize::from(u16::MAX) {
                    return range_error("too many bands for one stream");
                }

                refs.push(BandRef {
                    band_id: refs.len() as u16,
                    perception: pi,
                    channel: ci,
                    band: bi,
                    spatial: perception.modality.is_spatial(),
                });
            }
        }
    }

    Ok(refs)
}

/// Serializes the NALs of one unit, appends the CRC tail NAL, and frames the whole unit.
fn write_unit(
    unit_type: MihsUnitType,
    sync: bool,
    timestamp: u32,
    duration: u32,
    nals: Vec<Nal>,
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut body = Vec::new();
    for nal in &nals {
        nal.write_to(&mut body)?;
    }

    // Initialization units checksum with the wide CRC; windowed units with the short one.
    let crc = crc_nal(&body, unit_type == MihsUnitType::Initialization);

    let header = UnitHeader {
        unit_type,
        sync,
        timestamp,
        duration,
        nal_count: (nals.len() + 1) as u16,
    };

    let mut writer = BitWriterLtr::new();
    header.write(&mut writer)?;

    out.extend_from_slice(&writer.into_bytes());
    out.extend_from_slice(&body);
    crc.write_to(out)?;

    Ok(())
}

fn write_initialization_unit(
    haptic: &Haptic,
    band_refs: &[BandRef],
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut nals = Vec::new();

    nals.push(metadata_haptics_nal(haptic)?);

    for perception in &haptic.perceptions {
        nals.push(metadata_perception_nal(perception)?);
        nals.push(effect_library_nal(perception)?);

        for channel in &perception.channels {
            nals.push(metadata_channel_nal(perception.id, channel)?);
        }
    }

    for band_ref in band_refs {
        let perception = &haptic.perceptions[band_ref.perception];
        let channel = &perception.channels[band_ref.channel];
        let band = &channel.bands[band_ref.band];

        nals.push(metadata_band_nal(perception.id, channel.id, band_ref.band_id, band)?);
    }

    write_unit(MihsUnitType::Initialization, true, 0, 0, nals, out)
}

fn metadata_haptics_nal(haptic: &Haptic) -> Result<Nal> {
    let mut writer = BitWriterLtr::new();

    writer.write_string_z(&haptic.version);
    writer.write_string_z(&haptic.date);
    writer.write_string_z(&haptic.description);
    writer.write_bits_leq32(haptic.timescale, 32)?;

    writer.write_bits_leq32(haptic.avatars.len() as u32, 16)?;
    for avatar in &haptic.avatars {
        writer.write_bits_leq32(avatar.id as u16 as u32, 16)?;
        writer.write_bits_leq32(avatar.lod as u32, 32)?;
        writer.write_bits_leq32(u32::from(avatar.avatar_type.to_tag()), 16)?;

        writer.write_bit(avatar.mesh_uri.is_some())?;
        if let Some(ref uri) = avatar.mesh_uri {
            writer.write_string_z(uri);
        }
        writer.pad_to_byte();
    }

    Ok(Nal::new(NalType::MetadataHaptics, writer.into_bytes()))
}

fn metadata_perception_nal(perception: &Perception) -> Result<Nal> {
    let mut writer = BitWriterLtr::new();

    writer.write_bits_leq32(perception.id as u16 as u32, 16)?;
    writer.write_bits_leq32(u32::from(perception.modality.to_tag()), 16)?;
    writer.write_string_z(&perception.description);
    writer.write_bits_leq32(perception.avatar_id as u32, 32)?;

    writer.write_bit(perception.unit_exponent.is_some())?;
    writer.write_bit(perception.perception_unit_exponent.is_some())?;
    if let Some(exponent) = perception.unit_exponent {
        writer.write_bits_leq32(exponent as u8 as u32, 8)?;
    }
    if let Some(exponent) = perception.perception_unit_exponent {
        writer.write_bits_leq32(exponent as u8 as u32, 8)?;
    }
    writer.pad_to_byte();

    writer.write_bits_leq32(perception.reference_devices.len() as u32, 16)?;
    for device in &perception.reference_devices {
        write_reference_device_raw(device, &mut writer)?;
    }

    writer.write_bits_leq32(perception.channels.len() as u32, 16)?;

    Ok(Nal::new(NalType::MetadataPerception, writer.into_bytes()))
}

/// Reference devices in stream metadata keep raw IEEE-754 fields so reassembly is exact.
fn write_reference_device_raw(device: &ReferenceDevice, writer: &mut BitWriterLtr) -> Result<()> {
    writer.pad_to_byte();

    writer.write_bits_leq32(device.id as u16 as u32, 16)?;
    writer.write_string_z(&device.name);

    let fields = [
        device.maximum_frequency,
        device.minimum_frequency,
        device.resonance_frequency,
        device.maximum_amplitude,
        device.impedance,
        device.maximum_voltage,
        device.maximum_current,
        device.maximum_displacement,
        device.weight,
        device.size,
        device.custom,
    ];

    let mut mask = u32::from(device.body_part_mask.is_some()) << 12;
    for (i, field) in fields.iter().enumerate() {
        mask |= u32::from(field.is_some()) << (11 - i);
    }
    mask |= u32::from(device.device_type.is_some());

    writer.write_bits_leq32(mask, 13)?;

    if let Some(body_part_mask) = device.body_part_mask {
        writer.write_bits_leq32(body_part_mask, 32)?;
    }
    for field in fields.iter().flatten() {
        writer.write_bits_leq32(field.to_bits(), 32)?;
    }
    if let Some(device_type) = device.device_type {
        writer.write_bits_leq32(u32::from(device_type.to_tag()), 32)?;
    }

    writer.pad_to_byte();

    Ok(())
}

fn effect_library_nal(perception: &Perception) -> Result<Nal> {
    let mut writer = BitWriterLtr::new();

    writer.write_bits_leq32(perception.id as u16 as u32, 16)?;
    writer.write_bits_leq32(perception.effect_library.len() as u32, 16)?;

    for effect in &perception.effect_library {
        hmpg_bands::write_library_effect(effect, &mut writer)?;
    }

    Ok(Nal::new(NalType::EffectLibrary, writer.into_bytes()))
}

/// Channel metadata keeps raw IEEE-754 gains and weights so reassembly is exact.
fn metadata_channel_nal(perception_id: i16, channel: &Channel) -> Result<Nal> {
    let mut writer = BitWriterLtr::new();

    writer.write_bits_leq32(perception_id as u16 as u32, 16)?;
    writer.write_bits_leq32(channel.id as u16 as u32, 16)?;
    writer.write_string_z(&channel.description);

    let device_id = channel.reference_device_id.unwrap_or(-1);
    writer.write_bits_leq32(device_id as u16 as u32, 16)?;

    writer.write_bits_leq32(channel.gain.to_bits(), 32)?;
    writer.write_bits_leq32(channel.mixing_weight.to_bits(), 32)?;
    writer.write_bits_leq32(channel.body_part_mask.bits(), 32)?;

    let optional_mask = u32::from(channel.direction.is_some())
        | (u32::from(channel.actuator_resolution.is_some()) << 1)
        | (u32::from(channel.body_part_target.is_some()) << 2)
        | (u32::from(channel.actuator_target.is_some()) << 3);

    writer.write_bits_leq32(optional_mask, 8)?;

    writer.write_bits_leq32(channel.frequency_sampling.unwrap_or(0), 32)?;
    if channel.frequency_sampling.unwrap_or(0) > 0 {
        writer.write_bits_leq32(channel.sample_count.unwrap_or(0), 32)?;
    }

    for direction in [channel.direction, channel.actuator_resolution] {
        if let Some(d) = direction {
            writer.write_bits_leq32(d.x as u8 as u32, 8)?;
            writer.write_bits_leq32(d.y as u8 as u32, 8)?;
            writer.write_bits_leq32(d.z as u8 as u32, 8)?;
        }
    }
    if let Some(target) = channel.body_part_target {
        writer.write_bits_leq32(target, 32)?;
    }
    if let Some(target) = channel.actuator_target {
        writer.write_bits_leq32(target.x as u8 as u32, 8)?;
        writer.write_bits_leq32(target.y as u8 as u32, 8)?;
        writer.write_bits_leq32(target.z as u8 as u32, 8)?;
    }

    writer.write_bits_leq32(channel.vertices.len() as u32, 16)?;
    for &vertex in &channel.vertices {
        writer.write_bits_leq32(vertex as u32, 32)?;
    }

    writer.write_bits_leq32(channel.bands.len() as u32, 16)?;

    Ok(Nal::new(NalType::MetadataChannel, writer.into_bytes()))
}

fn metadata_band_nal(
    perception_id: i16,
    channel_id: i16,
    band_id: u16,
    band: &Band,
) -> Result<Nal> {
    let mut writer = BitWriterLtr::new();

    writer.write_bits_leq32(perception_id as u16 as u32, 16)?;
    writer.write_bits_leq32(channel_id as u16 as u32, 16)?;
    writer.write_bits_leq32(u32::from(band_id), 16)?;

    writer.write_bits_leq32(u32::from(band.band_type.to_tag()), 16)?;
    writer.write_bits_leq32(u32::from(band.curve_type.to_tag()), 16)?;

    if band.band_type == BandType::WaveletWave {
        writer.write_bits_leq32(band.window_length.unwrap_or(0) as u32, 32)?;
        writer.write_bits_leq32(band.block_length.unwrap_or(0) as u32, 32)?;
    }

    writer.write_bits_leq32(band.lower_frequency_limit as u32, 32)?;
    writer.write_bits_leq32(band.upper_frequency_limit as u32, 32)?;

    Ok(Nal::new(NalType::MetadataBand, writer.into_bytes()))
}

/// Builds the Data NAL of one band for the window `[t, t + d)`, if the band has any content
/// there.
fn packetize_band(
    band: &Band,
    band_ref: &BandRef,
    perception_id: i16,
    channel_id: i16,
    t: u32,
    d: u32,
    swriter: &mut StreamWriter,
) -> Result<Option<(u32, Nal)>> {
    let window_end = t.saturating_add(d);

    // Slice each effect into the window: whole effects for atomic band types, keyframe runs
    // for envelope types.
    let mut content: Vec<(usize, Effect)> = Vec::new();

    for (index, effect) in band.effects.iter().enumerate() {
        let position = effect.position.max(0) as u32;

        match band.band_type {
            BandType::Transient | BandType::WaveletWave => {
                if position >= t && position < window_end {
                    content.push((index, effect.clone()));
                }
            }
            BandType::Curve | BandType::VectorialWave => {
                let keyframes: Vec<Keyframe> = effect
                    .keyframes
                    .iter()
                    .filter(|keyframe| {
                        let at = position
                            .saturating_add(keyframe.relative_position.unwrap_or(0).max(0) as u32);
                        at >= t && at < window_end
                    })
                    .cloned()
                    .collect();

                if !keyframes.is_empty() {
                    let mut sliced = effect.clone();
                    sliced.keyframes = keyframes;
                    content.push((index, sliced));
                }
            }
        }
    }

    if content.is_empty() {
        return Ok(None);
    }

    let timestamp = content
        .iter()
        .map(|(_, effect)| {
            let position = effect.position.max(0) as u32;
            let first = effect
                .keyframes
                .first()
                .and_then(|k| k.relative_position)
                .unwrap_or(0)
                .max(0) as u32;
            position.saturating_add(first).max(t)
        })
        .min()
        .unwrap_or(t);

    let au_type = if swriter.started_bands[usize::from(band_ref.band_id)] {
        AuType::Dau
    }
    else {
        swriter.started_bands[usize::from(band_ref.band_id)] = true;
        AuType::Rau
    };

    let mut writer = BitWriterLtr::new();

    writer.write_bit(au_type == AuType::Rau)?;
    writer.write_bits_leq32(0, 7)?;

    writer.write_bits_leq32(perception_id as u16 as u32, 16)?;
    writer.write_bits_leq32(channel_id as u16 as u32, 16)?;
    writer.write_bits_leq32(u32::from(band_ref.band_id), 16)?;
    writer.write_bits_leq32(timestamp, 32)?;
    writer.write_bits_leq32(content.len() as u32, 16)?;

    for (index, effect) in &content {
        let stream_id = swriter.effect_id(band_ref.band_id, *index);

        writer.pad_to_byte();
        writer.write_bits_leq32(u32::from(stream_id), 16)?;

        hmpg_bands::write_library_effect(effect, &mut writer)?;

        if band.band_type == BandType::WaveletWave {
            writer.pad_to_byte();
            writer.write_varint(effect.wavelet_bitstream.len() as u32)?;
            writer.write_buf_bytes(&effect.wavelet_bitstream);
        }
    }

    Ok(Some((timestamp, Nal::new(NalType::Data, writer.into_bytes()))))
}
