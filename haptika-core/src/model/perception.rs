// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::{range_error, Result};

use super::band::Effect;
use super::channel::Channel;

/// The sensory modality of a perception.
///
/// The modality partitions perceptions into temporal ones, which emit sample-bearing bands,
/// and spatial ones (texture, stiffness, friction), which emit field bands. The streamer packs
/// the two partitions into different unit types.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PerceptionModality {
    Vibration,
    Pressure,
    Force,
    Thermal,
    Texture,
    Stiffness,
    Friction,
    Other,
}

impl PerceptionModality {
    pub fn from_tag(tag: u16) -> Result<PerceptionModality> {
        match tag {
            0 => Ok(PerceptionModality::Vibration),
            1 => Ok(PerceptionModality::Pressure),
            2 => Ok(PerceptionModality::Force),
            3 => Ok(PerceptionModality::Thermal),
            4 => Ok(PerceptionModality::Texture),
            5 => Ok(PerceptionModality::Stiffness),
            6 => Ok(PerceptionModality::Friction),
            7 => Ok(PerceptionModality::Other),
            _ => range_error("unknown perception modality tag"),
        }
    }

    pub fn to_tag(self) -> u16 {
        match self {
            PerceptionModality::Vibration => 0,
            PerceptionModality::Pressure => 1,
            PerceptionModality::Force => 2,
            PerceptionModality::Thermal => 3,
            PerceptionModality::Texture => 4,
            PerceptionModality::Stiffness => 5,
            PerceptionModality::Friction => 6,
            PerceptionModality::Other => 7,
        }
    }

    /// Returns true if perceptions of this modality describe spatial fields rather than
    /// temporal signals.
    pub fn is_spatial(self) -> bool {
        matches!(
            self,
            PerceptionModality::Texture | PerceptionModality::Stiffness | PerceptionModality::Friction
        )
    }
}

/// The actuator technology of a reference device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActuatorType {
    Lra,
    Vca,
    Erm,
    Piezo,
    Unknown,
}

impl ActuatorType {
    pub fn from_tag(tag: u8) -> Result<ActuatorType> {
        match tag {
            0 => Ok(ActuatorType::Lra),
            1 => Ok(ActuatorType::Vca),
            2 => Ok(ActuatorType::Erm),
            3 => Ok(ActuatorType::Piezo),
            4 => Ok(ActuatorType::Unknown),
            _ => range_error("unknown actuator type tag"),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            ActuatorType::Lra => 0,
            ActuatorType::Vca => 1,
            ActuatorType::Erm => 2,
            ActuatorType::Piezo => 3,
            ActuatorType::Unknown => 4,
        }
    }
}

/// A `ReferenceDevice` describes the physical actuator a channel was authored for.
///
/// Every field past the name is optional; presence travels as one bit of a 13-bit option mask
/// followed by one 32-bit quantized word per present field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceDevice {
    pub id: i16,
    pub name: String,
    pub body_part_mask: Option<u32>,
    pub maximum_frequency: Option<f32>,
    pub minimum_frequency: Option<f32>,
    pub resonance_frequency: Option<f32>,
    pub maximum_amplitude: Option<f32>,
    pub impedance: Option<f32>,
    pub maximum_voltage: Option<f32>,
    pub maximum_current: Option<f32>,
    pub maximum_displacement: Option<f32>,
    pub weight: Option<f32>,
    pub size: Option<f32>,
    pub custom: Option<f32>,
    pub device_type: Option<ActuatorType>,
}

impl ReferenceDevice {
    pub fn new(id: i16, name: &str) -> Self {
        ReferenceDevice { id, name: name.to_string(), ..Default::default() }
    }
}

/// A `Perception` groups the channels of one sensory modality along with the effect library
/// and reference devices they use.
#[derive(Clone, Debug, PartialEq)]
pub struct Perception {
    pub id: i16,
    pub avatar_id: i32,
    pub description: String,
    pub modality: PerceptionModality,
    pub unit_exponent: Option<i8>,
    pub perception_unit_exponent: Option<i8>,
    /// Reusable effects referenced by id from inside channels.
    pub effect_library: Vec<Effect>,
    pub reference_devices: Vec<ReferenceDevice>,
    pub channels: Vec<Channel>,
}

impl Perception {
    pub fn new(id: i16, avatar_id: i32, description: &str, modality: PerceptionModality) -> Self {
        Perception {
            id,
            avatar_id,
            description: description.to_string(),
            modality,
            unit_exponent: None,
            perception_unit_exponent: None,
            effect_library: Vec::new(),
            reference_devices: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Looks up a library effect by id.
    pub fn library_effect(&self, id: i16) -> Option<&Effect> {
        self.effect_library.iter().find(|e| e.id == id)
    }

    /// Looks up a reference device by id.
    pub fn reference_device(&self, id: i16) -> Option<&ReferenceDevice> {
        self.reference_devices.iter().find(|d| d.id == id)
    }
}
