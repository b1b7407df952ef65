// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `model` module defines the in-memory haptic experience tree.
//!
//! A [`Haptic`] owns perceptions, which own channels, which own bands, which own effects and
//! their keyframes. All ids are scoped to the owning `Haptic`; references between nodes are by
//! id, never by pointer.

mod band;
mod channel;
mod perception;

pub use band::{Band, BandType, BaseSignal, CurveType, Effect, EffectType, Keyframe};
pub use channel::{BodyPartMask, Channel, Direction};
pub use perception::{ActuatorType, Perception, PerceptionModality, ReferenceDevice};

use crate::errors::{inconsistent_error, range_error, reference_error, Result};

/// The interchange format version written by this implementation.
pub const FORMAT_VERSION: &str = "1.0";

/// The default timescale of an experience, in ticks per second.
pub const DEFAULT_TIMESCALE: u32 = 1000;

/// The body representation an experience is authored against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AvatarType {
    /// A custom mesh, carried by URI.
    Custom,
    Vibration,
    Pressure,
    Temperature,
}

impl AvatarType {
    pub fn from_tag(tag: u16) -> Result<AvatarType> {
        match tag {
            0 => Ok(AvatarType::Custom),
            1 => Ok(AvatarType::Vibration),
            2 => Ok(AvatarType::Pressure),
            3 => Ok(AvatarType::Temperature),
            _ => range_error("unknown avatar type tag"),
        }
    }

    pub fn to_tag(self) -> u16 {
        match self {
            AvatarType::Custom => 0,
            AvatarType::Vibration => 1,
            AvatarType::Pressure => 2,
            AvatarType::Temperature => 3,
        }
    }
}

/// An `Avatar` names a body representation and its level of detail.
#[derive(Clone, Debug, PartialEq)]
pub struct Avatar {
    pub id: i16,
    pub lod: i32,
    pub avatar_type: AvatarType,
    /// Present iff `avatar_type == Custom`.
    pub mesh_uri: Option<String>,
}

impl Avatar {
    pub fn new(id: i16, lod: i32, avatar_type: AvatarType) -> Self {
        Avatar { id, lod, avatar_type, mesh_uri: None }
    }
}

/// The root of a haptic experience.
#[derive(Clone, Debug, PartialEq)]
pub struct Haptic {
    pub version: String,
    pub date: String,
    pub description: String,
    /// Ticks per second of every position and duration in the tree.
    pub timescale: u32,
    pub avatars: Vec<Avatar>,
    pub perceptions: Vec<Perception>,
}

impl Default for Haptic {
    fn default() -> Self {
        Haptic {
            version: FORMAT_VERSION.to_string(),
            date: String::new(),
            description: String::new(),
            timescale: DEFAULT_TIMESCALE,
            avatars: Vec::new(),
            perceptions: Vec::new(),
        }
    }
}

impl Haptic {
    pub fn new(description: &str) -> Self {
        Haptic { description: description.to_string(), ..Default::default() }
    }

    /// Looks up a perception by id.
    pub fn perception(&self, id: i16) -> Option<&Perception> {
        self.perceptions.iter().find(|p| p.id == id)
    }

    /// Looks up a perception by id, mutably.
    pub fn perception_mut(&mut self, id: i16) -> Option<&mut Perception> {
        self.perceptions.iter_mut().find(|p| p.id == id)
    }

    /// The end of the experience: the largest effect end position over all bands, in timescale
    /// ticks.
    pub fn duration(&self) -> i32 {
        let mut end = 0;

        for perception in &self.perceptions {
            for channel in &perception.channels {
                for band in &channel.bands {
                    for effect in &band.effects {
                        let span = match band.band_type {
                            BandType::WaveletWave => band.block_length.unwrap_or(0),
                            _ => effect
                                .keyframes
                                .iter()
                                .filter_map(|k| k.relative_position)
                                .max()
                                .unwrap_or(0),
                        };
                        end = end.max(effect.position + span);
                    }
                }
            }
        }

        end
    }

    /// Flattens every `Timeline` effect into its children at absolute positions.
    ///
    /// Serialization and streaming operate on linear bands only; this is the encode-time
    /// refactoring pass that removes effect nesting.
    pub fn linearize_timelines(&mut self) {
        for perception in &mut self.perceptions {
            for channel in &mut perception.channels {
                for band in &mut channel.bands {
                    if band.effects.iter().any(|e| e.effect_type == EffectType::Timeline) {
                        let mut flat = Vec::with_capacity(band.effects.len());

                        for effect in band.effects.drain(..) {
                            flatten_effect(effect, 0, &mut flat);
                        }

                        flat.sort_by_key(|e| e.position);
                        band.effects = flat;
                    }
                }
            }
        }
    }

    /// Validates every model invariant, failing with `Inconsistent` or `ReferenceUnresolved`.
    pub fn validate(&self) -> Result<()> {
        if self.timescale == 0 {
            return inconsistent_error("timescale is zero");
        }

        for avatar in &self.avatars {
            if (avatar.avatar_type == AvatarType::Custom) != avatar.mesh_uri.is_some() {
                return inconsistent_error("mesh uri presence does not match avatar type");
            }
        }

        for perception in &self.perceptions {
            validate_perception(perception)?;
        }

        Ok(())
    }
}

fn validate_perception(perception: &Perception) -> Result<()> {
    // Library effect ids must be unique within the perception.
    for (i, effect) in perception.effect_library.iter().enumerate() {
        if perception.effect_library[..i].iter().any(|other| other.id == effect.id) {
            return inconsistent_error("duplicate library effect id");
        }
    }

    for channel in &perception.channels {
        if channel.sample_count.is_some() != matches!(channel.frequency_sampling, Some(f) if f > 0)
        {
            return inconsistent_error("sample count presence does not match sampling frequency");
        }

        for band in &channel.bands {
            validate_band(perception, band)?;
        }
    }

    Ok(())
}

fn validate_band(perception: &Perception, band: &Band) -> Result<()> {
    if (band.band_type == BandType::WaveletWave) != band.window_length.is_some() {
        return inconsistent_error("window length presence does not match band type");
    }

    let mut prev_end: Option<i32> = None;

    for effect in &band.effects {
        if let Some(end) = prev_end {
            if effect.position < end {
                return inconsistent_error("effects out of order within band");
            }
        }

        match band.band_type {
            BandType::WaveletWave => {
                if effect.wavelet_bitstream.is_empty() {
                    return inconsistent_error("wavelet effect with empty bitstream");
                }

                let Some(block_length) = band.block_length
                else {
                    return inconsistent_error("wavelet band without block length");
                };

                // Wavelet blocks are block-aligned and non-overlapping.
                prev_end = Some(effect.position + block_length);
            }
            _ => {
                let mut prev_position: Option<i32> = None;

                for keyframe in &effect.keyframes {
                    if let (Some(prev), Some(position)) = (prev_position, keyframe.relative_position)
                    {
                        if position <= prev {
                            return inconsistent_error("keyframe positions not increasing");
                        }
                    }
                    if keyframe.relative_position.is_some() {
                        prev_position = keyframe.relative_position;
                    }
                }

                prev_end = Some(effect.position);
            }
        }

        if effect.effect_type == EffectType::Reference
            && perception.library_effect(effect.id).is_none()
        {
            return reference_error();
        }
    }

    Ok(())
}

fn flatten_effect(mut effect: Effect, origin: i32, out: &mut Vec<Effect>) {
    if effect.effect_type == EffectType::Timeline {
        let base = origin + effect.position;
        for child in effect.timeline.drain(..) {
            flatten_effect(child, base, out);
        }
    }
    else {
        effect.position += origin;
        out.push(effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vibration_haptic() -> Haptic {
        let mut haptic = Haptic::new("test experience");

        let mut perception = Perception::new(0, 0, "vibes", PerceptionModality::Vibration);
        let mut channel = Channel::new(0, "main");

        let mut band = Band::new(BandType::Curve, 0, 100);
        band.curve_type = CurveType::Linear;

        let mut effect = Effect::new_basis(0, 0.0, BaseSignal::Sine);
        effect.keyframes.push(Keyframe::new(Some(0), Some(0.5), None));
        effect.keyframes.push(Keyframe::new(Some(100), Some(0.0), None));
        band.effects.push(effect);

        channel.bands.push(band);
        perception.channels.push(channel);
        haptic.perceptions.push(perception);
        haptic
    }

    #[test]
    fn verify_valid_tree() {
        assert!(vibration_haptic().validate().is_ok());
    }

    #[test]
    fn verify_nonmonotone_keyframes_rejected() {
        let mut haptic = vibration_haptic();

        let keyframes =
            &mut haptic.perceptions[0].channels[0].bands[0].effects[0].keyframes;
        keyframes.push(Keyframe::new(Some(50), Some(1.0), None));

        assert!(matches!(
            haptic.validate(),
            Err(crate::errors::Error::Inconsistent(_))
        ));
    }

    #[test]
    fn verify_unresolved_reference_rejected() {
        let mut haptic = vibration_haptic();

        haptic.perceptions[0].channels[0].bands[0]
            .effects
            .push(Effect::new_reference(42, 500));

        assert!(matches!(
            haptic.validate(),
            Err(crate::errors::Error::ReferenceUnresolved)
        ));
    }

    #[test]
    fn verify_duplicate_library_id_rejected() {
        let mut haptic = vibration_haptic();

        let library = &mut haptic.perceptions[0].effect_library;
        library.push(Effect::default());
        library.push(Effect::default());

        assert!(matches!(
            haptic.validate(),
            Err(crate::errors::Error::Inconsistent(_))
        ));
    }

    #[test]
    fn verify_timeline_linearization() {
        let mut haptic = vibration_haptic();

        let mut timeline = Effect {
            effect_type: EffectType::Timeline,
            position: 1000,
            ..Default::default()
        };

        timeline.timeline.push(Effect::new_basis(0, 0.0, BaseSignal::Sine));
        timeline.timeline.push(Effect::new_basis(250, 0.0, BaseSignal::Sine));

        haptic.perceptions[0].channels[0].bands[0].effects.push(timeline);
        haptic.linearize_timelines();

        let band = &haptic.perceptions[0].channels[0].bands[0];

        assert_eq!(band.effects.len(), 3);
        assert_eq!(band.effects[1].position, 1000);
        assert_eq!(band.effects[2].position, 1250);
        assert!(band.effects.iter().all(|e| e.effect_type != EffectType::Timeline));
    }
}
