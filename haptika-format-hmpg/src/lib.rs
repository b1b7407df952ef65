// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The HMPG binary haptic interchange format.
//!
//! HMPG is the bit-packed, big-endian counterpart of the readable HJIF form: a header of
//! experience strings, the avatar and perception metadata, then one serialized body per band.
//! Floats travel as unsigned integers quantized over an advertised range, except effect
//! amplitudes which keep their raw IEEE-754 encoding.

pub mod bands;
pub mod reader;
pub mod writer;

pub use reader::read_hmpg;
pub use writer::write_hmpg;

/// Advertised quantization range of channel gains.
pub(crate) const MAX_GAIN: f32 = 100.0;

/// Advertised quantization range of device frequencies, in Hz.
pub(crate) const MAX_FREQUENCY: f32 = 10000.0;

/// Advertised quantization range of device amplitudes.
pub(crate) const MAX_AMPLITUDE: f32 = 1000.0;

/// Advertised quantization range of device impedances, in ohms.
pub(crate) const MAX_IMPEDANCE: f32 = 10000.0;

/// Advertised quantization range of the remaining physical device fields.
pub(crate) const MAX_PHYSICAL: f32 = 1000.0;

/// Advertised quantization range of the custom device field.
pub(crate) const MAX_CUSTOM: f32 = 10000.0;

#[cfg(test)]
mod tests {
    use super::*;
    use haptika_core::io::{BitReaderLtr, BitWriterLtr, ReadBitsLtr};
    use haptika_core::model::{
        Avatar, AvatarType, Band, BandType, BaseSignal, BodyPartMask, Channel, CurveType,
        Direction, Effect, Haptic, Keyframe, Perception, PerceptionModality, ReferenceDevice,
    };

    fn full_haptic() -> Haptic {
        let mut haptic = Haptic::new("roundtrip experience");
        haptic.date = "2025-06-01".to_string();

        haptic.avatars.push(Avatar::new(0, 2, AvatarType::Vibration));

        let mut custom = Avatar::new(1, 0, AvatarType::Custom);
        custom.mesh_uri = Some("meshes/hand.obj".to_string());
        haptic.avatars.push(custom);

        let mut perception = Perception::new(0, 0, "main", PerceptionModality::Vibration);

        let mut library_effect = Effect::new_basis(0, 0.5, BaseSignal::Square);
        library_effect.id = 7;
        library_effect.keyframes.push(Keyframe::new(Some(0), Some(1.0), Some(200)));
        perception.effect_library.push(library_effect);

        let mut device = ReferenceDevice::new(0, "lra-x1");
        device.maximum_frequency = Some(500.0);
        device.resonance_frequency = Some(170.0);
        device.device_type = Some(haptika_core::model::ActuatorType::Lra);
        perception.reference_devices.push(device);

        let mut channel = Channel::new(0, "left palm");
        channel.reference_device_id = Some(0);
        channel.gain = 0.8;
        channel.mixing_weight = 1.0;
        channel.body_part_mask = BodyPartMask::LEFT_HAND_PALM;
        channel.frequency_sampling = Some(8000);
        channel.sample_count = Some(4096);
        channel.direction = Some(Direction::new(0, 0, 127));
        channel.vertices.push(12);
        channel.vertices.push(77);

        let mut curve = Band::new(BandType::Curve, 0, 72);
        curve.curve_type = CurveType::Cubic;
        let mut effect = Effect::new_basis(40, 0.0, BaseSignal::Sine);
        effect.keyframes.push(Keyframe::new(Some(0), Some(0.0), None));
        effect.keyframes.push(Keyframe::new(Some(60), Some(0.25), None));
        curve.effects.push(effect);
        channel.bands.push(curve);

        let mut vectorial = Band::new(BandType::VectorialWave, 72, 300);
        let mut effect = Effect::new_basis(100, 0.0, BaseSignal::Sine);
        effect.keyframes.push(Keyframe::new(Some(0), None, Some(120)));
        vectorial.effects.push(effect);
        channel.bands.push(vectorial);

        let mut transient = Band::new(BandType::Transient, 0, 1000);
        let mut hit = Effect::new_basis(10, 0.0, BaseSignal::Sine);
        hit.keyframes.push(Keyframe::new(Some(0), Some(0.9), Some(85)));
        transient.effects.push(hit);
        channel.bands.push(transient);

        perception.channels.push(channel);
        haptic.perceptions.push(perception);
        haptic
    }

    #[test]
    fn verify_whole_file_roundtrip() {
        let haptic = full_haptic();

        let buf = write_hmpg(&haptic).unwrap();
        let decoded = read_hmpg(&buf).unwrap();

        // Strings, structure, presence and integer fields are exact.
        assert_eq!(decoded.version, haptic.version);
        assert_eq!(decoded.date, haptic.date);
        assert_eq!(decoded.timescale, haptic.timescale);
        assert_eq!(decoded.avatars, haptic.avatars);

        let original = &haptic.perceptions[0];
        let recovered = &decoded.perceptions[0];

        assert_eq!(recovered.id, original.id);
        assert_eq!(recovered.modality, original.modality);
        assert_eq!(recovered.effect_library, original.effect_library);

        // Quantized floats round-trip within one step of their 32-bit grid.
        let device = &recovered.reference_devices[0];
        assert!((device.maximum_frequency.unwrap() - 500.0).abs() < 1e-3);
        assert!((device.resonance_frequency.unwrap() - 170.0).abs() < 1e-3);
        assert_eq!(device.device_type, original.reference_devices[0].device_type);
        assert_eq!(device.minimum_frequency, None);

        let channel = &recovered.channels[0];
        let original_channel = &original.channels[0];

        assert!((channel.gain - original_channel.gain).abs() < 1e-4);
        assert_eq!(channel.body_part_mask, original_channel.body_part_mask);
        assert_eq!(channel.direction, original_channel.direction);
        assert_eq!(channel.vertices, original_channel.vertices);
        assert_eq!(channel.bands.len(), original_channel.bands.len());

        // Curve and transient bands carry raw IEEE floats and round-trip exactly.
        assert_eq!(channel.bands[0], original_channel.bands[0]);
        assert_eq!(channel.bands[2], original_channel.bands[2]);

        // The vectorial band quantizes amplitudes only; this one has none set.
        assert_eq!(channel.bands[1], original_channel.bands[1]);
    }

    #[test]
    fn verify_bad_version_rejected() {
        let haptic = full_haptic();
        let mut buf = write_hmpg(&haptic).unwrap();

        // Corrupt the version string.
        buf[0] = b'9';

        assert!(matches!(
            read_hmpg(&buf),
            Err(haptika_core::errors::Error::BadVersion(_))
        ));
    }

    #[test]
    fn verify_truncated_file_rejected() {
        let haptic = full_haptic();
        let buf = write_hmpg(&haptic).unwrap();

        // Cutting the last band body off mid-stream must surface as a truncation.
        assert!(matches!(
            read_hmpg(&buf[..buf.len() - 8]),
            Err(haptika_core::errors::Error::Truncated)
        ));
    }

    #[test]
    fn verify_reference_device_option_mask() {
        // Only the maximum voltage is set: a single mask bit, then a single quantized word.
        let mut device = ReferenceDevice::new(2, "vca");
        device.maximum_voltage = Some(12.0);

        let mut writer = BitWriterLtr::new();
        writer::write_reference_device(&device, &mut writer).unwrap();
        let buf = writer.into_bytes();

        let mut reader = BitReaderLtr::new(&buf);
        assert_eq!(reader.read_bits_leq32(16).unwrap(), 2);
        assert_eq!(reader.read_string_z().unwrap(), "vca");
        assert_eq!(reader.read_bits_leq32(13).unwrap(), 0b0000001000000);

        let word = reader.read_bits_leq32(32).unwrap();
        let voltage = f64::from(word) * 1000.0 / f64::from(u32::MAX);
        assert!((voltage - 12.0).abs() < 1e-3);

        // Nothing but padding remains.
        let mut reader = BitReaderLtr::new(&buf);
        let decoded = reader::read_reference_device(&mut reader).unwrap();

        assert_eq!(decoded.body_part_mask, None);
        assert!((decoded.maximum_voltage.unwrap() - 12.0).abs() < 1e-3);
        assert_eq!(decoded.maximum_current, None);
        assert_eq!(decoded.device_type, None);
    }

}
