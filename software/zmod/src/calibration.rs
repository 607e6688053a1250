//! Calibration coefficients: decoding from the pod EEPROM and conversion
//! to the 18-bit fixed-point form the gateware multiplies by.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use zmod_shared::calibration::CalibrationRecord;
use zmod_shared::models;
use zmod_shared::{CHANNEL_COUNT, GainRange, ZmodFamily, ZmodModel, ZmodPort};

use crate::ZmodError;
use crate::config::{CalibrationSense, FamilyConstants};

/// Signed 18-bit register value.
///
/// Multiplicative coefficients read as Q16 (bit 16 is the ones bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fixed18(i32);

impl Fixed18 {
    pub const BITS: u32 = 18;
    pub const FRAC_BITS: u32 = 16;
    pub const MASK: u32 = (1 << Self::BITS) - 1;
    pub const MAX: i32 = (1 << (Self::BITS - 1)) - 1;
    pub const MIN: i32 = -(1 << (Self::BITS - 1));

    /// Unity gain
    pub const ONE: Self = Self(1 << Self::FRAC_BITS);
    pub const ZERO: Self = Self(0);

    pub fn new(value: i32) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Round to the nearest representable value; `None` if it does not fit.
    pub fn from_scaled(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let rounded = value.round();
        if rounded < f64::from(Self::MIN) || rounded > f64::from(Self::MAX) {
            return None;
        }
        Self::new(rounded as i32)
    }

    /// Interpret the low 18 bits of a register word.
    pub fn from_register(word: u32) -> Self {
        Self(crate::codec::sign_extend(word & Self::MASK, Self::BITS))
    }

    /// Register word, two's complement masked to 18 bits.
    pub fn to_register(self) -> u32 {
        (self.0 as u32) & Self::MASK
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// Value as a Q16 number.
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / f64::from(1_u32 << Self::FRAC_BITS)
    }
}

/// Gain and offset correction for one channel in one range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoefficientPair {
    pub multiplicative: Fixed18,
    pub additive: Fixed18,
}

impl Default for CoefficientPair {
    fn default() -> Self {
        Self {
            multiplicative: Fixed18::ONE,
            additive: Fixed18::ZERO,
        }
    }
}

/// Coefficients for every channel and range of one pod.
///
/// Defaults to unity gain and zero offset everywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationCoefficients {
    /// `[channel][gain]`
    pairs: [[CoefficientPair; 2]; CHANNEL_COUNT],
}

impl CalibrationCoefficients {
    pub fn get(&self, channel: usize, gain: GainRange) -> CoefficientPair {
        self.pairs[channel][gain.index()]
    }

    pub fn set(&mut self, channel: usize, gain: GainRange, pair: CoefficientPair) {
        self.pairs[channel][gain.index()] = pair;
    }

    /// Convert a decoded EEPROM record into register values.
    pub fn to_fixed_point(
        record: &CalibrationRecord,
        constants: &FamilyConstants,
    ) -> Result<Self, ZmodError> {
        let mut out = Self::default();
        for channel in 0..CHANNEL_COUNT {
            for gain in [GainRange::Low, GainRange::High] {
                let (gain_error, offset) = record.coefficient(channel, gain);
                let pair = coefficient_pair(f64::from(gain_error), f64::from(offset), gain, constants)
                    .ok_or_else(|| {
                        ZmodError::CorruptCalibration(format!(
                            "CH{} {gain:?} coefficients ({gain_error}, {offset}) do not fit 18 bits",
                            channel + 1
                        ))
                    })?;
                out.set(channel, gain, pair);
            }
        }
        Ok(out)
    }

    /// Register words in `[ch][gain][mult, add]` order.
    pub fn register_words(&self) -> [[[u32; 2]; 2]; CHANNEL_COUNT] {
        self.pairs.map(|per_gain| {
            per_gain.map(|p| [p.multiplicative.to_register(), p.additive.to_register()])
        })
    }
}

fn coefficient_pair(
    gain_error: f64,
    offset: f64,
    gain: GainRange,
    constants: &FamilyConstants,
) -> Option<CoefficientPair> {
    let ideal = constants.ideal_range[gain.index()];
    let real = constants.real_range[gain.index()];
    let one = f64::from(1_u32 << Fixed18::FRAC_BITS);
    let add_scale = f64::from(1_u32 << (Fixed18::BITS - 1));

    let (mult, add) = match constants.sense {
        CalibrationSense::Measure => (
            real / ideal * (1.0 + gain_error) * one,
            offset / ideal * add_scale,
        ),
        CalibrationSense::Generate => (
            ideal / real / (1.0 + gain_error) * one,
            -offset / real * add_scale,
        ),
    };
    Some(CoefficientPair {
        multiplicative: Fixed18::from_scaled(mult)?,
        additive: Fixed18::from_scaled(add)?,
    })
}

/// Identity strings read from the pod's DNA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductIdentity {
    pub model: String,
    pub serial: String,
    pub port: ZmodPort,
}

/// Access to a pod's DNA and calibration storage.
pub trait CalibrationReader {
    fn read_device_descriptor(&mut self) -> Result<ProductIdentity, ZmodError>;

    /// Raw factory and user calibration records, before decoding.
    fn read_calibration(&mut self) -> Result<(Vec<u8>, Vec<u8>), ZmodError>;
}

/// Calibration of one pod, read once at session start.
#[derive(Clone, Debug)]
pub struct CalibrationStore {
    identity: ProductIdentity,
    model: &'static ZmodModel,
    constants: FamilyConstants,
    factory: CalibrationCoefficients,
    user: Option<CalibrationCoefficients>,
}

impl CalibrationStore {
    /// Identify the pod, check it is of the `expected` family and decode
    /// its calibration.
    pub fn load(reader: &mut dyn CalibrationReader, expected: ZmodFamily) -> Result<Self, ZmodError> {
        let identity = reader.read_device_descriptor()?;
        let model = models::lookup(&identity.model)
            .ok_or_else(|| ZmodError::Unsupported(identity.model.clone()))?;
        if model.family != expected {
            return Err(ZmodError::DeviceMismatch {
                expected,
                found: model.family,
            });
        }
        let constants = FamilyConstants::for_model(model)?;

        let (factory_raw, user_raw) = reader.read_calibration()?;
        let factory_record = CalibrationRecord::decode(&factory_raw).ok_or(ZmodError::NotFound)?;
        let factory = CalibrationCoefficients::to_fixed_point(&factory_record, &constants)?;

        let user = match CalibrationRecord::decode(&user_raw) {
            Some(rec) => Some(CalibrationCoefficients::to_fixed_point(&rec, &constants)?),
            None => {
                warn!("{} on port {:?} has no user calibration", model.name, identity.port);
                None
            }
        };

        info!(
            "Loaded calibration for {} (serial {}) on port {:?}",
            model.name, identity.serial, identity.port
        );
        Ok(Self {
            identity,
            model,
            constants,
            factory,
            user,
        })
    }

    pub fn identity(&self) -> &ProductIdentity {
        &self.identity
    }

    pub fn model(&self) -> &'static ZmodModel {
        self.model
    }

    pub fn constants(&self) -> &FamilyConstants {
        &self.constants
    }

    pub fn factory(&self) -> &CalibrationCoefficients {
        &self.factory
    }

    pub fn user(&self) -> Option<&CalibrationCoefficients> {
        self.user.as_ref()
    }

    /// User calibration when present, factory otherwise.
    pub fn active(&self) -> &CalibrationCoefficients {
        self.user.as_ref().unwrap_or(&self.factory)
    }
}
