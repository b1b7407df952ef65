// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The MIHS streaming format: a packetizer slicing a haptic experience into time-ordered
//! access units, and the reassembly state machine that rebuilds the experience on the far
//! side.

pub mod common;
pub mod reader;
pub mod writer;

pub use common::{AuType, MihsUnitType, Nal, NalType, UnitHeader, DEFAULT_PACKET_MS};
pub use reader::{read_mihs, StreamReader};
pub use writer::write_mihs;

#[cfg(test)]
mod tests {
    use super::*;
    use super::common::{NAL_HEADER_LEN, UNIT_HEADER_LEN};
    use haptika_core::errors::Error;
    use haptika_core::io::{BitReaderLtr, ReadBitsLtr};
    use haptika_core::model::{
        Band, BandType, BaseSignal, Channel, CurveType, Effect, Haptic, Keyframe, Perception,
        PerceptionModality, ReferenceDevice,
    };

    fn transient_effect(position: i32, amplitude: f32) -> Effect {
        let mut effect = Effect::new_basis(position, 0.0, BaseSignal::Sine);
        effect.keyframes.push(Keyframe::new(Some(0), Some(amplitude), Some(100)));
        effect
    }

    /// A haptic with two transient bands holding one effect each, at 50 ms and 75 ms.
    fn two_band_haptic() -> Haptic {
        let mut haptic = Haptic::new("two bands");

        let mut perception = Perception::new(0, 0, "vibes", PerceptionModality::Vibration);
        let mut channel = Channel::new(0, "main");

        let mut band_a = Band::new(BandType::Transient, 0, 1000);
        band_a.effects.push(transient_effect(50, 0.5));

        let mut band_b = Band::new(BandType::Transient, 0, 1000);
        band_b.effects.push(transient_effect(75, 0.25));

        channel.bands.push(band_a);
        channel.bands.push(band_b);
        perception.channels.push(channel);
        haptic.perceptions.push(perception);
        haptic
    }

    /// Splits a stream into raw per-unit byte ranges.
    fn unit_ranges(buf: &[u8]) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let start = offset;

            let mut reader = BitReaderLtr::new(&buf[offset..offset + UNIT_HEADER_LEN]);
            let header = UnitHeader::read(&mut reader).unwrap();

            offset += UNIT_HEADER_LEN;
            for _ in 0..header.nal_count {
                let (_, consumed) = Nal::read_from(&buf[offset..]).unwrap();
                offset += consumed;
            }

            ranges.push(start..offset);
        }

        ranges
    }

    fn parse_unit(buf: &[u8]) -> (UnitHeader, Vec<Nal>) {
        let mut reader = BitReaderLtr::new(&buf[..UNIT_HEADER_LEN]);
        let header = UnitHeader::read(&mut reader).unwrap();

        let mut nals = Vec::new();
        let mut offset = UNIT_HEADER_LEN;

        for _ in 0..header.nal_count {
            let (nal, consumed) = Nal::read_from(&buf[offset..]).unwrap();
            nals.push(nal);
            offset += consumed;
        }

        (header, nals)
    }

    #[test]
    fn verify_packetization_order() {
        let haptic = two_band_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);
        let (first, _) = parse_unit(&buf[ranges[0].clone()]);
        assert_eq!(first.unit_type, MihsUnitType::Initialization);

        // One temporal unit covering [0, 100) with both effects, in timestamp order.
        let (header, nals) = parse_unit(&buf[ranges[1].clone()]);
        assert_eq!(header.unit_type, MihsUnitType::Temporal);

        let data: Vec<&Nal> = nals.iter().filter(|n| n.nal_type == NalType::Data).collect();
        assert_eq!(data.len(), 2);

        let timestamps: Vec<u32> = data
            .iter()
            .map(|nal| {
                let mut reader = BitReaderLtr::new(&nal.payload);
                reader.ignore_bits(8).unwrap();
                reader.ignore_bits(48).unwrap();
                reader.read_bits_leq32(32).unwrap()
            })
            .collect();

        assert_eq!(timestamps, vec![50, 75]);

        assert_eq!(nals.last().unwrap().nal_type, NalType::Crc16);
    }

    #[test]
    fn verify_initialization_has_no_data_nals() {
        let haptic = two_band_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);
        let (header, nals) = parse_unit(&buf[ranges[0].clone()]);

        assert_eq!(header.unit_type, MihsUnitType::Initialization);
        assert!(header.sync);
        assert!(nals.iter().all(|nal| nal.nal_type != NalType::Data));
        assert_eq!(nals.last().unwrap().nal_type, NalType::Crc32);
    }

    #[test]
    fn verify_crc_corruption_leaves_reader_unchanged() {
        let haptic = two_band_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);

        let mut reader = StreamReader::new();
        let consumed = reader.read_unit(&buf[ranges[0].clone()]).unwrap();
        assert_eq!(consumed, ranges[0].len());

        // Flip one bit inside the temporal unit's payload, just ahead of the CRC trailer.
        let mut corrupted = buf[ranges[1].clone()].to_vec();
        let flip_at = corrupted.len() - NAL_HEADER_LEN - 2 - 4;
        corrupted[flip_at] ^= 0x01;

        let bands_before: Vec<usize> = reader.haptic().perceptions[0].channels[0]
            .bands
            .iter()
            .map(|b| b.effects.len())
            .collect();

        assert!(matches!(reader.read_unit(&corrupted), Err(Error::CrcMismatch)));

        // The decoder buffer is unchanged; the clean unit still applies.
        let bands_after: Vec<usize> = reader.haptic().perceptions[0].channels[0]
            .bands
            .iter()
            .map(|b| b.effects.len())
            .collect();
        assert_eq!(bands_before, bands_after);

        reader.read_unit(&buf[ranges[1].clone()]).unwrap();

        let haptic = reader.finish().unwrap();
        assert_eq!(haptic.perceptions[0].channels[0].bands[0].effects.len(), 1);
    }

    #[test]
    fn verify_silent_windows() {
        let mut haptic = Haptic::new("late effect");

        let mut perception = Perception::new(0, 0, "vibes", PerceptionModality::Vibration);
        let mut channel = Channel::new(0, "main");

        let mut band = Band::new(BandType::Transient, 0, 1000);
        band.effects.push(transient_effect(500, 1.0));
        channel.bands.push(band);

        perception.channels.push(channel);
        haptic.perceptions.push(perception);

        let buf = write_mihs(&haptic, 100).unwrap();
        let ranges = unit_ranges(&buf);

        let kinds: Vec<MihsUnitType> = ranges
            .iter()
            .map(|range| parse_unit(&buf[range.clone()]).0.unit_type)
            .collect();

        // Initialization, five empty windows, then the window holding the effect.
        assert_eq!(kinds[0], MihsUnitType::Initialization);
        assert_eq!(kinds[1..6], [MihsUnitType::Silent; 5]);
        assert_eq!(kinds[6], MihsUnitType::Temporal);

        // Silent units carry the sync flag and a timestamp for resynchronization.
        let (header, nals) = parse_unit(&buf[ranges[3].clone()]);
        assert!(header.sync);
        assert_eq!(header.timestamp, 200);
        assert_eq!(nals.len(), 1);

        assert_eq!(read_mihs(&buf).unwrap(), haptic);
    }

    /// A richer experience: library, reference devices, a multi-window curve band, a
    /// vectorial band and a wavelet band across two channels.
    fn rich_haptic() -> Haptic {
        let mut haptic = Haptic::new("rich experience");
        haptic.date = "2025-03-10".to_string();

        let mut perception = Perception::new(2, 0, "main", PerceptionModality::Vibration);

        let mut library_effect = Effect::new_basis(0, 0.25, BaseSignal::Triangle);
        library_effect.id = 9;
        library_effect.keyframes.push(Keyframe::new(Some(0), Some(0.75), Some(60)));
        perception.effect_library.push(library_effect);

        let mut device = ReferenceDevice::new(1, "erm-9");
        device.maximum_voltage = Some(12.0);
        device.weight = Some(0.02);
        perception.reference_devices.push(device);

        let mut channel = Channel::new(0, "palm");
        channel.gain = 0.7;
        channel.mixing_weight = 0.9;

        // A curve spanning three 100 ms windows.
        let mut curve = Band::new(BandType::Curve, 0, 80);
        curve.curve_type = CurveType::Linear;
        let mut envelope = Effect::new_basis(40, 0.0, BaseSignal::Sine);
        for (at, level) in [(0, 0.0f32), (90, 0.5), (170, 0.25), (230, 0.0)] {
            envelope.keyframes.push(Keyframe::new(Some(at), Some(level), None));
        }
        curve.effects.push(envelope);
        channel.bands.push(curve);

        let mut vectorial = Band::new(BandType::VectorialWave, 80, 400);
        let mut wave = Effect::new_basis(120, 1.5, BaseSignal::Square);
        wave.keyframes.push(Keyframe::new(Some(0), Some(1.0), Some(200)));
        wave.keyframes.push(Keyframe::new(Some(45), None, Some(250)));
        vectorial.effects.push(wave);
        channel.bands.push(vectorial);

        perception.channels.push(channel);

        let mut wavelet_channel = Channel::new(1, "wrist");
        let mut wavelet = Band::new(BandType::WaveletWave, 400, 8000);
        wavelet.window_length = Some(16);
        wavelet.block_length = Some(16);
        for b in 0..4i32 {
            wavelet.effects.push(Effect {
                id: b as i16,
                position: b * 16,
                wavelet_bitstream: vec![0x5a ^ b as u8; 40],
                ..Default::default()
            });
        }
        wavelet_channel.bands.push(wavelet);
        perception.channels.push(wavelet_channel);

        haptic.perceptions.push(perception);

        // A spatial perception rides in Spatial units.
        let mut texture = Perception::new(3, 0, "surface", PerceptionModality::Texture);
        let mut texture_channel = Channel::new(0, "patch");
        texture_channel.vertices.push(4);

        let mut band = Band::new(BandType::Curve, 0, 50);
        let mut field = Effect::new_basis(0, 0.0, BaseSignal::Sine);
        field.keyframes.push(Keyframe::new(Some(0), Some(0.1), None));
        field.keyframes.push(Keyframe::new(Some(60), Some(0.9), None));
        band.effects.push(field);
        texture_channel.bands.push(band);

        texture.channels.push(texture_channel);
        haptic.perceptions.push(texture);

        haptic
    }

    #[test]
    fn verify_reassembly_is_exact() {
        let haptic = rich_haptic();

        for packet_ms in [1u32, 50, 100, 1000] {
            let buf = write_mihs(&haptic, packet_ms).unwrap();
            let reassembled = read_mihs(&buf).unwrap();

            assert_eq!(reassembled, haptic, "packet_ms = {}", packet_ms);
        }
    }

    #[test]
    fn verify_spatial_units_carry_spatial_perceptions() {
        let haptic = rich_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);
        let kinds: Vec<MihsUnitType> = ranges
            .iter()
            .map(|range| parse_unit(&buf[range.clone()]).0.unit_type)
            .collect();

        assert!(kinds.contains(&MihsUnitType::Spatial));
        assert!(kinds.contains(&MihsUnitType::Temporal));
    }

    #[test]
    fn verify_rau_then_dau() {
        let haptic = rich_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);

        // Collect (band_id, rau) for every data NAL across the stream in order.
        let mut flags: Vec<(u16, bool)> = Vec::new();

        for range in &ranges {
            let (_, nals) = parse_unit(&buf[range.clone()]);
            for nal in nals.iter().filter(|n| n.nal_type == NalType::Data) {
                let mut reader = BitReaderLtr::new(&nal.payload);
                let rau = reader.read_bit().unwrap();
                reader.ignore_bits(7).unwrap();
                reader.ignore_bits(32).unwrap();
                let band_id = reader.read_bits_leq32(16).unwrap() as u16;
                flags.push((band_id, rau));
            }
        }

        let mut seen: std::collections::HashSet<u16> = std::collections::HashSet::new();
        for (band_id, rau) in flags {
            // The first access unit of every band is a RAU; later ones are DAUs.
            assert_eq!(rau, seen.insert(band_id));
        }
    }

    #[test]
    fn verify_stream_without_initialization_rejected() {
        let haptic = two_band_haptic();
        let buf = write_mihs(&haptic, 100).unwrap();

        let ranges = unit_ranges(&buf);

        let mut reader = StreamReader::new();
        assert!(matches!(
            reader.read_unit(&buf[ranges[1].clone()]),
            Err(Error::Inconsistent(_))
        ));
    }
}
