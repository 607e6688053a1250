//! Serializable configuration for a capture or playback session.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use zmod_shared::models::{self, KNOWN_MODELS};
use zmod_shared::{CHANNEL_COUNT, Coupling, GainRange, ModelNumber, ZmodFamily, ZmodModel};

use crate::ZmodError;

/// Which way calibration corrects the signal path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationSense {
    /// Correct codes coming out of an ADC
    Measure,
    /// Pre-distort codes going into a DAC
    Generate,
}

/// Per-family conversion constants.
///
/// Ranges are indexed by [`GainRange::index`], low range first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamilyConstants {
    pub resolution_bits: u8,

    /// Volts represented by a full-scale code
    pub full_scale: [f64; 2],

    /// Range the calibration coefficients are referenced to
    pub ideal_range: [f64; 2],

    /// Range of an uncalibrated unit
    pub real_range: [f64; 2],

    pub sense: CalibrationSense,

    /// Bit position of each channel's code within a packed sample word, CH1 first
    pub field_offset: [u32; CHANNEL_COUNT],
}

impl FamilyConstants {
    /// Zmod ADC 14xx/12xx/10xx: codes left-justified in 16-bit lanes, CH1 in the upper lane.
    pub fn adc(resolution_bits: u8) -> Self {
        let r = u32::from(resolution_bits);
        Self {
            resolution_bits,
            full_scale: [25.0, 1.0],
            ideal_range: [25.0, 1.0],
            real_range: [26.25, 1.086],
            sense: CalibrationSense::Measure,
            field_offset: [32 - r, 16 - r],
        }
    }

    /// Zmod DAC 1411: codes left-justified in 16-bit lanes, CH1 in the lower lane.
    pub fn dac_1411() -> Self {
        Self {
            resolution_bits: 14,
            full_scale: [1.33, 5.32],
            ideal_range: [1.25, 5.0],
            real_range: [1.33, 5.32],
            sense: CalibrationSense::Generate,
            field_offset: [2, 18],
        }
    }

    /// Constants for a known product.
    pub fn for_model(model: &ZmodModel) -> Result<Self, ZmodError> {
        PRESETS
            .get(&model.model_number)
            .cloned()
            .ok_or_else(|| ZmodError::Unsupported(model.name.to_string()))
    }

    /// Constants for a DNA product string.
    pub fn for_model_name(name: &str) -> Result<Self, ZmodError> {
        let model = models::lookup(name).ok_or_else(|| ZmodError::Unsupported(name.to_string()))?;
        Self::for_model(model)
    }

    pub fn full_scale(&self, gain: GainRange) -> f64 {
        self.full_scale[gain.index()]
    }

    pub fn validate(&self) -> Result<(), ZmodError> {
        let bits = u32::from(self.resolution_bits);
        if !(2..=16).contains(&bits) {
            return Err(ZmodError::InvalidConfig(format!(
                "resolution of {bits} bits is outside 2..=16"
            )));
        }
        for (ch, offset) in self.field_offset.iter().enumerate() {
            if offset + bits > 32 {
                return Err(ZmodError::InvalidConfig(format!(
                    "channel {} field at bit {offset} overruns the sample word",
                    ch + 1
                )));
            }
        }
        let ranges = self
            .full_scale
            .iter()
            .chain(&self.ideal_range)
            .chain(&self.real_range);
        if ranges.into_iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(ZmodError::InvalidConfig(
                "ranges must be finite and positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Family constant presets for every product this library drives.
static PRESETS: Lazy<BTreeMap<ModelNumber, FamilyConstants>> = Lazy::new(|| {
    KNOWN_MODELS
        .iter()
        .filter_map(|m| match m.family {
            ZmodFamily::Adc => Some((m.model_number, FamilyConstants::adc(m.resolution_bits))),
            ZmodFamily::Dac => Some((m.model_number, FamilyConstants::dac_1411())),
            ZmodFamily::Digitizer | ZmodFamily::Unsupported => None,
        })
        .collect()
});

/// Relay selection for one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub gain: GainRange,
    pub coupling: Coupling,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DmaConfig {
    /// Largest block one descriptor may carry
    pub max_block_bytes: usize,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            max_block_bytes: 4096,
        }
    }
}

/// Sense of the trigger detector's idle status bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdlePolarity {
    /// Bit set means idle
    #[default]
    ActiveHigh,
    /// Bit clear means idle
    ActiveLow,
}

impl IdlePolarity {
    pub fn is_idle(self, bit: bool) -> bool {
        match self {
            IdlePolarity::ActiveHigh => bit,
            IdlePolarity::ActiveLow => !bit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub idle_polarity: IdlePolarity,

    /// Sleep between idle polls; zero spins
    pub poll_interval_us: u64,

    /// Give up waiting for a trigger after this long; `None` waits forever
    pub timeout_ms: Option<u64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            idle_polarity: IdlePolarity::ActiveHigh,
            poll_interval_us: 10,
            timeout_ms: None,
        }
    }
}

impl TriggerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Everything needed to set up one pod.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// DNA product string
    pub model: String,
    pub family: FamilyConstants,
    pub dma: DmaConfig,
    pub trigger: TriggerConfig,
    pub channels: [ChannelConfig; CHANNEL_COUNT],
}

impl SessionConfig {
    /// Defaults for a known product.
    pub fn for_model(name: &str) -> Result<Self, ZmodError> {
        Ok(Self {
            model: name.to_string(),
            family: FamilyConstants::for_model_name(name)?,
            dma: DmaConfig::default(),
            trigger: TriggerConfig::default(),
            channels: [ChannelConfig::default(); CHANNEL_COUNT],
        })
    }

    pub fn load(path: &Path) -> Result<Self, ZmodError> {
        let text = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)
            .map_err(|e| ZmodError::InvalidConfig(format!("{}: {e}", path.display())))?;
        cfg.family.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), ZmodError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ZmodError::InvalidConfig(format!("Failed to serialize config: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }
}
