// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;

use super::band::Band;

bitflags! {
    /// A 32-bit bitmap of anatomical regions.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct BodyPartMask: u32 {
        const HEAD_FRONT         = 0x0000_0001;
        const HEAD_BACK          = 0x0000_0002;
        const HEAD_RIGHT         = 0x0000_0004;
        const HEAD_LEFT          = 0x0000_0008;
        const RIGHT_UPPER_CHEST  = 0x0000_0010;
        const LEFT_UPPER_CHEST   = 0x0000_0020;
        const ABDOMEN            = 0x0000_0040;
        const WAIST              = 0x0000_0080;
        const UPPER_BACK         = 0x0000_0100;
        const LOWER_BACK         = 0x0000_0200;
        const RIGHT_UPPER_ARM    = 0x0000_0400;
        const LEFT_UPPER_ARM     = 0x0000_0800;
        const RIGHT_FOREARM      = 0x0000_1000;
        const LEFT_FOREARM       = 0x0000_2000;
        const RIGHT_WRIST        = 0x0000_4000;
        const LEFT_WRIST         = 0x0000_8000;
        const RIGHT_HAND_PALM    = 0x0001_0000;
        const LEFT_HAND_PALM     = 0x0002_0000;
        const RIGHT_HAND_DORSUM  = 0x0004_0000;
        const LEFT_HAND_DORSUM   = 0x0008_0000;
        const RIGHT_HAND_FINGERS = 0x0010_0000;
        const LEFT_HAND_FINGERS  = 0x0020_0000;
        const RIGHT_THIGH        = 0x0040_0000;
        const LEFT_THIGH         = 0x0080_0000;
        const RIGHT_CALF         = 0x0100_0000;
        const LEFT_CALF          = 0x0200_0000;
        const RIGHT_FOOT_PALM    = 0x0400_0000;
        const LEFT_FOOT_PALM     = 0x0800_0000;
        const RIGHT_FOOT_DORSUM  = 0x1000_0000;
        const LEFT_FOOT_DORSUM   = 0x2000_0000;
        const RIGHT_FOOT_FINGERS = 0x4000_0000;
        const LEFT_FOOT_FINGERS  = 0x8000_0000;
    }
}

impl BodyPartMask {
    /// An empty mask means the body location is unspecified.
    pub fn is_unspecified(self) -> bool {
        self.is_empty()
    }
}

/// A cartesian direction with signed 8-bit components.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Direction {
    pub x: i8,
    pub y: i8,
    pub z: i8,
}

impl Direction {
    pub fn new(x: i8, y: i8, z: i8) -> Self {
        Direction { x, y, z }
    }
}

/// A `Channel` is one independently mixable actuator signal of a perception.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    pub id: i16,
    pub description: String,
    /// The id of a reference device within the owning perception, if any.
    pub reference_device_id: Option<i16>,
    pub gain: f32,
    pub mixing_weight: f32,
    pub body_part_mask: BodyPartMask,
    /// Sampling frequency of sample-bearing bands, in Hz.
    pub frequency_sampling: Option<u32>,
    /// Total sample count. Present iff `frequency_sampling > 0`.
    pub sample_count: Option<u32>,
    pub direction: Option<Direction>,
    pub actuator_resolution: Option<Direction>,
    pub body_part_target: Option<u32>,
    pub actuator_target: Option<Direction>,
    /// Mesh vertices this channel maps to, for spatial perceptions.
    pub vertices: Vec<i32>,
    pub bands: Vec<Band>,
}

impl Channel {
    pub fn new(id: i16, description: &str) -> Self {
        Channel {
            id,
            description: description.to_string(),
            gain: 1.0,
            mixing_weight: 1.0,
            ..Default::default()
        }
    }
}
