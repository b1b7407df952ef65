// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::{range_error, Result};

/// The kind of signal a band carries, and therefore how its body is coded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BandType {
    /// Short impulsive events, one keyframe each.
    Transient,
    /// A piecewise amplitude envelope.
    Curve,
    /// A parametric wave described by modulated keyframes.
    VectorialWave,
    /// A wavelet-coded waveform, one bitstream per block.
    WaveletWave,
}

impl BandType {
    pub fn from_tag(tag: u16) -> Result<BandType> {
        match tag {
            0 => Ok(BandType::Transient),
            1 => Ok(BandType::Curve),
            2 => Ok(BandType::VectorialWave),
            3 => Ok(BandType::WaveletWave),
            _ => range_error("unknown band type tag"),
        }
    }

    pub fn to_tag(self) -> u16 {
        match self {
            BandType::Transient => 0,
            BandType::Curve => 1,
            BandType::VectorialWave => 2,
            BandType::WaveletWave => 3,
        }
    }
}

/// The interpolation rule between curve keyframes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CurveType {
    Unknown,
    Linear,
    Cubic,
    BSpline,
    Bezier,
}

impl CurveType {
    pub fn from_tag(tag: u16) -> Result<CurveType> {
        match tag {
            0 => Ok(CurveType::Unknown),
            1 => Ok(CurveType::Linear),
            2 => Ok(CurveType::Cubic),
            3 => Ok(CurveType::BSpline),
            4 => Ok(CurveType::Bezier),
            _ => range_error("unknown curve type tag"),
        }
    }

    pub fn to_tag(self) -> u16 {
        match self {
            CurveType::Unknown => 0,
            CurveType::Linear => 1,
            CurveType::Cubic => 2,
            CurveType::BSpline => 3,
            CurveType::Bezier => 4,
        }
    }
}

/// How an effect resolves to actual signal content.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EffectType {
    /// The effect carries its own keyframes or wavelet bitstream.
    Basis,
    /// The effect resolves to a library effect by id.
    Reference,
    /// The effect is a container of child effects at relative positions.
    Timeline,
}

impl Default for EffectType {
    fn default() -> Self {
        EffectType::Basis
    }
}

impl EffectType {
    pub fn from_tag(tag: u8) -> Result<EffectType> {
        match tag {
            0 => Ok(EffectType::Basis),
            1 => Ok(EffectType::Reference),
            2 => Ok(EffectType::Timeline),
            _ => range_error("unknown effect type tag"),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            EffectType::Basis => 0,
            EffectType::Reference => 1,
            EffectType::Timeline => 2,
        }
    }
}

/// The base periodic waveform of a vectorial effect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BaseSignal {
    Sine,
    Square,
    Triangle,
    SawToothUp,
    SawToothDown,
}

impl Default for BaseSignal {
    fn default() -> Self {
        BaseSignal::Sine
    }
}

impl BaseSignal {
    pub fn from_tag(tag: u8) -> Result<BaseSignal> {
        match tag {
            0 => Ok(BaseSignal::Sine),
            1 => Ok(BaseSignal::Square),
            2 => Ok(BaseSignal::Triangle),
            3 => Ok(BaseSignal::SawToothUp),
            4 => Ok(BaseSignal::SawToothDown),
            _ => range_error("unknown base signal tag"),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            BaseSignal::Sine => 0,
            BaseSignal::Square => 1,
            BaseSignal::Triangle => 2,
            BaseSignal::SawToothUp => 3,
            BaseSignal::SawToothDown => 4,
        }
    }
}

/// A `Keyframe` modulates an effect at a position relative to the effect origin.
///
/// All three fields may be independently absent; the band type dictates which combinations are
/// representable on the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keyframe {
    /// Position relative to the owning effect, in timescale ticks.
    pub relative_position: Option<i32>,
    /// Amplitude modulation in `[-1, 1]`.
    pub amplitude_modulation: Option<f32>,
    /// Frequency modulation in Hz.
    pub frequency_modulation: Option<i32>,
}

impl Keyframe {
    pub fn new(
        relative_position: Option<i32>,
        amplitude_modulation: Option<f32>,
        frequency_modulation: Option<i32>,
    ) -> Self {
        Keyframe { relative_position, amplitude_modulation, frequency_modulation }
    }
}

/// An `Effect` is one entry of a band: a basis signal, a library reference, or a timeline of
/// child effects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Effect {
    pub id: i16,
    pub effect_type: EffectType,
    /// Position in timescale ticks from the start of the experience.
    pub position: i32,
    /// Phase of the base signal in `[0, 2π]`.
    pub phase: f32,
    pub base_signal: BaseSignal,
    pub keyframes: Vec<Keyframe>,
    /// Child effects of a `Timeline` effect, sorted by position.
    pub timeline: Vec<Effect>,
    /// The SPIHT bitstream of one wavelet block. Non-empty iff the owning band is
    /// `WaveletWave`.
    pub wavelet_bitstream: Vec<u8>,
    /// The dequantization scalar recovered from the wavelet block header.
    pub wavelet_scalar: f64,
    /// The maximum allocation bit-depth recovered from the wavelet block header.
    pub wavelet_maxbits: i32,
}

impl Effect {
    /// Create a new basis effect at the given position.
    pub fn new_basis(position: i32, phase: f32, base_signal: BaseSignal) -> Self {
        Effect { position, phase, base_signal, ..Default::default() }
    }

    /// Create a new reference effect resolving to library effect `id`.
    pub fn new_reference(id: i16, position: i32) -> Self {
        Effect { id, effect_type: EffectType::Reference, position, ..Default::default() }
    }
}

/// A `Band` is a frequency-partitioned signal component of a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Band {
    pub band_type: BandType,
    pub curve_type: CurveType,
    /// Encoder analysis window in timescale ticks. Present iff `band_type == WaveletWave`.
    pub window_length: Option<i32>,
    /// On-wire span of one wavelet block in timescale ticks. Present iff
    /// `band_type == WaveletWave`.
    pub block_length: Option<i32>,
    pub lower_frequency_limit: i32,
    pub upper_frequency_limit: i32,
    pub effects: Vec<Effect>,
}

impl Band {
    pub fn new(band_type: BandType, lower_frequency_limit: i32, upper_frequency_limit: i32) -> Self {
        Band {
            band_type,
            curve_type: CurveType::Unknown,
            window_length: None,
            block_length: None,
            lower_frequency_limit,
            upper_frequency_limit,
            effects: Vec::new(),
        }
    }

    /// The number of samples of one wavelet block of this band at the given timescale.
    pub fn wavelet_block_samples(&self, timescale: u32) -> Option<usize> {
        let block_length = self.block_length?;
        Some((block_length as i64 * self.upper_frequency_limit as i64 / timescale as i64) as usize)
    }
}
