#![doc = include_str!("../README.md")]

pub mod calibration;
pub mod capture;
pub mod codec;
pub mod config;
pub mod dma;
pub mod error;
pub mod frontend;
pub mod generate;
pub mod logging;
pub mod sim;
pub mod trigger;

pub use calibration::{CalibrationCoefficients, CalibrationStore};
pub use capture::{CaptureController, CaptureState, CaptureWindow};
pub use codec::FixedPointCodec;
pub use config::{FamilyConstants, SessionConfig};
pub use dma::DescriptorRing;
pub use error::ZmodError;
pub use generate::{GenerateController, StopSignal};

pub use zmod_shared::{Coupling, GainRange, ZmodFamily, ZmodPort};
