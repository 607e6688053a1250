//! Configuration packet sent by the ethernet streaming client.
//!
//! Fixed 14 bytes, big-endian, preceding each streaming session.

pub use byte_struct::{ByteStruct, ByteStructLen, ByteStructUnspecifiedByteOrder};

use crate::{Coupling, GainRange, CHANNEL_COUNT};

/// Largest decimation factor the stream decimator accepts.
pub const MAX_DECIMATION: u32 = 32767;

/// Largest number of samples per packet the stream decimator accepts.
pub const MAX_PACKET_LENGTH: u32 = 65535;

#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct StreamConfigPacket {
    /// Total samples to stream
    pub transfer_size: u32,
    /// bit 0: CH1 high gain, bit 1: CH2 high gain
    pub gain_bits: u8,
    /// bit 0: CH1 DC coupled, bit 1: CH2 DC coupled
    pub coupling_bits: u8,
    /// Keep one sample in `decimation`
    pub decimation: u32,
    /// Samples per network packet
    pub packet_length: u32,
}

/// Reasons a packet is refused by the decimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamConfigError {
    Truncated { len: usize },
    ZeroDecimation,
    DecimationTooLarge(u32),
    PacketLengthTooLarge(u32),
}

impl StreamConfigPacket {
    pub const LEN: usize = Self::BYTE_LEN;

    pub fn decode(bytes: &[u8]) -> Result<Self, StreamConfigError> {
        let bytes = bytes
            .get(..Self::LEN)
            .ok_or(StreamConfigError::Truncated { len: bytes.len() })?;
        Ok(Self::read_bytes(bytes))
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0_u8; Self::LEN];
        self.write_bytes(&mut bytes);
        bytes
    }

    pub fn gain(&self, channel: usize) -> GainRange {
        GainRange::from_bit((self.gain_bits >> channel) & 1 == 1)
    }

    pub fn coupling(&self, channel: usize) -> Coupling {
        Coupling::from_bit((self.coupling_bits >> channel) & 1 == 1)
    }

    pub fn set_channel(&mut self, channel: usize, gain: GainRange, coupling: Coupling) {
        let mask = 1_u8 << channel;
        self.gain_bits = (self.gain_bits & !mask) | ((gain as u8) << channel);
        self.coupling_bits = (self.coupling_bits & !mask) | ((coupling as u8) << channel);
    }

    /// Per-channel `(gain, coupling)` pairs, CH1 first.
    pub fn channels(&self) -> [(GainRange, Coupling); CHANNEL_COUNT] {
        [
            (self.gain(0), self.coupling(0)),
            (self.gain(1), self.coupling(1)),
        ]
    }

    /// Check the packet against the decimator's limits.
    pub fn validate(&self) -> Result<(), StreamConfigError> {
        if self.decimation == 0 {
            return Err(StreamConfigError::ZeroDecimation);
        }
        if self.decimation > MAX_DECIMATION {
            return Err(StreamConfigError::DecimationTooLarge(self.decimation));
        }
        if self.packet_length > MAX_PACKET_LENGTH {
            return Err(StreamConfigError::PacketLengthTooLarge(self.packet_length));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout_is_big_endian() {
        let bytes = [
            0x00, 0x01, 0x00, 0x00, // transfer size 65536
            0b10, // CH2 high gain
            0b01, // CH1 DC
            0x00, 0x00, 0x00, 0x04, // decimate by 4
            0x00, 0x00, 0x05, 0xDC, // 1500 samples per packet
        ];
        let p = StreamConfigPacket::decode(&bytes).expect("14 bytes should decode");
        assert_eq!(StreamConfigPacket::LEN, 14);
        assert_eq!(p.transfer_size, 65536);
        assert_eq!(p.decimation, 4);
        assert_eq!(p.packet_length, 1500);
        assert_eq!(
            p.channels(),
            [(GainRange::Low, Coupling::Dc), (GainRange::High, Coupling::Ac)]
        );
        assert_eq!(p.validate(), Ok(()));
        assert_eq!(p.encode(), bytes);
    }

    #[test]
    fn test_set_channel_bits() {
        let mut p = StreamConfigPacket::default();
        p.set_channel(1, GainRange::High, Coupling::Dc);
        assert_eq!((p.gain_bits, p.coupling_bits), (0b10, 0b10));
        p.set_channel(1, GainRange::Low, Coupling::Ac);
        assert_eq!((p.gain_bits, p.coupling_bits), (0, 0));
    }

    #[test]
    fn test_decimator_limits() {
        let mut p = StreamConfigPacket {
            decimation: MAX_DECIMATION + 1,
            ..Default::default()
        };
        assert_eq!(p.validate(), Err(StreamConfigError::DecimationTooLarge(32768)));
        p.decimation = 0;
        assert_eq!(p.validate(), Err(StreamConfigError::ZeroDecimation));
        p.decimation = 1;
        p.packet_length = 65536;
        assert_eq!(p.validate(), Err(StreamConfigError::PacketLengthTooLarge(65536)));
        assert_eq!(
            StreamConfigPacket::decode(&[0; 9]),
            Err(StreamConfigError::Truncated { len: 9 })
        );
    }
}
