#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

pub mod calibration;
pub mod models;
pub mod stream;

pub use models::{ModelNumber, ZmodFamily, ZmodModel};

/// Number of analog channels on every supported pod.
pub const CHANNEL_COUNT: usize = 2;

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

enum_with_unknown! {
    /// SYZYGY port a pod is plugged into, as numbered by the carrier's DNA enumeration.
    pub enum ZmodPort(u8) {
        A = 0,
        B = 1,
    }
}

/// Input (scope) or output (AWG) range selected by the gain relay.
///
/// The discriminant is the value of the per-channel gain bit in the
/// front end's configuration register and in the streaming packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ser", derive(serde::Serialize, serde::Deserialize))]
pub enum GainRange {
    #[default]
    Low = 0,
    High = 1,
}

impl GainRange {
    /// Position of this range in `[low, high]` ordered tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::High } else { Self::Low }
    }
}

/// Input coupling relay selection. Output pods ignore it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ser", derive(serde::Serialize, serde::Deserialize))]
pub enum Coupling {
    Ac = 0,
    #[default]
    Dc = 1,
}

impl Coupling {
    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::Dc } else { Self::Ac }
    }
}
