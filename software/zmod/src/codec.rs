//! Conversion between packed sample words, signed codes and volts.

use zmod_shared::GainRange;

use crate::ZmodError;
use crate::calibration::CoefficientPair;
use crate::config::FamilyConstants;

/// Sign-extend the low `bits` bits of `field`.
///
/// Shift the sign bit to the top of the word, then shift back arithmetically.
pub fn sign_extend(field: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((field << shift) as i32) >> shift
}

/// Stateless converter for one hardware family.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedPointCodec {
    constants: FamilyConstants,
}

impl FixedPointCodec {
    /// Fails if the constants describe an impossible sample layout.
    pub fn new(constants: FamilyConstants) -> Result<Self, ZmodError> {
        constants.validate()?;
        Ok(Self { constants })
    }

    pub fn constants(&self) -> &FamilyConstants {
        &self.constants
    }

    pub fn resolution_bits(&self) -> u32 {
        u32::from(self.constants.resolution_bits)
    }

    fn field_mask(&self) -> u32 {
        (1_u32 << self.resolution_bits()) - 1
    }

    /// Codes per volt-scale unit: 2^(resolution - 1).
    fn half_range(&self) -> f64 {
        f64::from(1_u32 << (self.resolution_bits() - 1))
    }

    /// Largest positive code.
    pub fn max_code(&self) -> i32 {
        (1_i32 << (self.resolution_bits() - 1)) - 1
    }

    /// Most negative code.
    pub fn min_code(&self) -> i32 {
        -(1_i32 << (self.resolution_bits() - 1))
    }

    fn offset(&self, channel: usize) -> Result<u32, ZmodError> {
        self.constants
            .field_offset
            .get(channel)
            .copied()
            .ok_or_else(|| ZmodError::InvalidConfig(format!("no channel {}", channel + 1)))
    }

    fn insert(&self, word: u32, offset: u32, raw: i32) -> u32 {
        let mask = self.field_mask() << offset;
        (word & !mask) | (((raw as u32) << offset) & mask)
    }

    /// Isolate one channel's unsigned field from a packed word.
    pub fn field(&self, word: u32, channel: usize) -> Result<u32, ZmodError> {
        Ok((word >> self.offset(channel)?) & self.field_mask())
    }

    /// Signed code for one channel of a packed word.
    pub fn extract_channel(&self, word: u32, channel: usize) -> Result<i32, ZmodError> {
        Ok(sign_extend(self.field(word, channel)?, self.resolution_bits()))
    }

    /// Replace one channel's field in a packed word.
    pub fn pack_channel(&self, word: u32, channel: usize, raw: i32) -> Result<u32, ZmodError> {
        Ok(self.insert(word, self.offset(channel)?, raw))
    }

    /// Pack both channels into a fresh word.
    pub fn pack(&self, raw: [i32; 2]) -> u32 {
        raw.iter()
            .zip(self.constants.field_offset)
            .fold(0, |word, (&code, offset)| self.insert(word, offset, code))
    }

    pub fn raw_to_volts(&self, raw: i32, gain: GainRange) -> f64 {
        f64::from(raw) * self.constants.full_scale(gain) / self.half_range()
    }

    /// Nearest code for `volts`, saturated to the converter's range.
    pub fn volts_to_raw(&self, volts: f64, gain: GainRange) -> i32 {
        let code = (volts / self.constants.full_scale(gain) * self.half_range()).round();
        code.clamp(f64::from(self.min_code()), f64::from(self.max_code())) as i32
    }

    /// Volts after applying a calibration pair in software.
    ///
    /// The multiplicative term is Q16; the additive term counts codes of
    /// an 18-bit datapath and is rescaled to this converter's resolution.
    pub fn calibrated_volts(&self, raw: i32, gain: GainRange, pair: CoefficientPair) -> f64 {
        let mult = pair.multiplicative.to_f64();
        let add = f64::from(pair.additive.raw())
            / f64::from(1_u32 << (18 - self.resolution_bits()));
        let corrected = f64::from(raw) * mult + add;
        corrected * self.constants.full_scale(gain) / self.half_range()
    }

    /// Convenience: volts for one channel of a packed word.
    pub fn word_to_volts(&self, word: u32, channel: usize, gain: GainRange) -> Result<f64, ZmodError> {
        Ok(self.raw_to_volts(self.extract_channel(word, channel)?, gain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Fixed18;

    #[test]
    fn test_sign_extension() {
        for bits in [10_u32, 12, 14] {
            let max = (1_u32 << (bits - 1)) - 1;
            let all_ones = (1_u32 << bits) - 1;
            assert_eq!(sign_extend(max, bits), max as i32);
            assert_eq!(sign_extend(all_ones, bits), -1);
            assert_eq!(sign_extend(1 << (bits - 1), bits), -(1 << (bits - 1)));
            assert_eq!(sign_extend(0, bits), 0);
        }
    }

    #[test]
    fn test_extremes_map_to_extreme_volts() {
        for bits in [10_u8, 12, 14] {
            let codec = FixedPointCodec::new(FamilyConstants::adc(bits)).unwrap();
            for gain in [GainRange::Low, GainRange::High] {
                let fs = codec.constants().full_scale(gain);
                let top = codec.raw_to_volts(codec.max_code(), gain);
                let bottom = codec.raw_to_volts(codec.min_code(), gain);
                assert!(top > 0.0 && top < fs, "max code gives {top} for {bits} bits");
                assert_eq!(bottom, -fs, "min code gives {bottom} for {bits} bits");
                assert_eq!(codec.raw_to_volts(0, gain), 0.0);
            }
        }
    }

    #[test]
    fn test_round_trip_within_one_lsb() {
        for bits in [10_u8, 12, 14] {
            let codec = FixedPointCodec::new(FamilyConstants::adc(bits)).unwrap();
            for gain in [GainRange::Low, GainRange::High] {
                let fs = codec.constants().full_scale(gain);
                let lsb = fs / f64::from(1_u32 << (bits - 1));
                let steps = 997;
                for i in 0..=steps {
                    let v = -fs + (2.0 * fs - lsb) * f64::from(i) / f64::from(steps);
                    let back = codec.raw_to_volts(codec.volts_to_raw(v, gain), gain);
                    assert!(
                        (back - v).abs() <= lsb,
                        "{bits} bits {gain:?}: {v} came back as {back}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_volts_to_raw_saturates() {
        let codec = FixedPointCodec::new(FamilyConstants::dac_1411()).unwrap();
        assert_eq!(codec.volts_to_raw(100.0, GainRange::High), 8191);
        assert_eq!(codec.volts_to_raw(-100.0, GainRange::High), -8192);
    }

    #[test]
    fn test_adc_field_positions() {
        // CH1 in bits [31:18], CH2 in bits [15:2] for a 14-bit part
        let codec = FixedPointCodec::new(FamilyConstants::adc(14)).unwrap();
        let word = (0x1FFF_u32 << 18) | (0x2000_u32 << 2);
        assert_eq!(codec.extract_channel(word, 0).unwrap(), 8191);
        assert_eq!(codec.extract_channel(word, 1).unwrap(), -8192);
        assert_eq!(codec.pack([8191, -8192]), word);
    }

    #[test]
    fn test_dac_packing_matches_lane_layout() {
        // CH1 shifted up by 2, CH2 by 18
        let codec = FixedPointCodec::new(FamilyConstants::dac_1411()).unwrap();
        let ch1 = codec.volts_to_raw(1.0, GainRange::High);
        let ch2 = codec.volts_to_raw(-2.0, GainRange::High);
        let word = codec.pack([ch1, ch2]);
        assert_eq!(word, (((ch1 as u32) & 0x3FFF) << 2) | (((ch2 as u32) & 0x3FFF) << 18));
        assert_eq!(codec.extract_channel(word, 0).unwrap(), ch1);
        assert_eq!(codec.extract_channel(word, 1).unwrap(), ch2);

        let moved = codec.pack_channel(word, 0, -1).unwrap();
        assert_eq!(codec.extract_channel(moved, 0).unwrap(), -1);
        assert_eq!(codec.extract_channel(moved, 1).unwrap(), ch2, "other lane untouched");
    }

    #[test]
    fn test_calibrated_volts() {
        let codec = FixedPointCodec::new(FamilyConstants::adc(14)).unwrap();
        let unity = CoefficientPair::default();
        assert_eq!(codec.calibrated_volts(0, GainRange::High, unity), 0.0);
        assert_eq!(
            codec.calibrated_volts(4096, GainRange::High, unity),
            codec.raw_to_volts(4096, GainRange::High)
        );

        // One 14-bit code of offset is 16 codes on the 18-bit datapath
        let offset = CoefficientPair {
            multiplicative: Fixed18::ONE,
            additive: Fixed18::new(16).unwrap(),
        };
        let one_code = codec.raw_to_volts(1, GainRange::High);
        let got = codec.calibrated_volts(0, GainRange::High, offset);
        assert!((got - one_code).abs() < 1e-15, "expected {one_code} got {got}");

        let half_gain = CoefficientPair {
            multiplicative: Fixed18::new(1 << 15).unwrap(),
            additive: Fixed18::ZERO,
        };
        let got = codec.calibrated_volts(4096, GainRange::Low, half_gain);
        let exp = codec.raw_to_volts(2048, GainRange::Low);
        assert!((got - exp).abs() < 1e-12, "expected {exp} got {got}");
    }

    #[test]
    fn test_rejects_bad_constants_and_channels() {
        let mut constants = FamilyConstants::adc(14);
        constants.resolution_bits = 0;
        assert!(matches!(FixedPointCodec::new(constants), Err(ZmodError::InvalidConfig(_))));

        let mut constants = FamilyConstants::adc(14);
        constants.field_offset[1] = 30;
        assert!(
            FixedPointCodec::new(constants).is_err(),
            "a field past bit 31 is refused"
        );

        let codec = FixedPointCodec::new(FamilyConstants::adc(14)).unwrap();
        assert!(matches!(codec.extract_channel(0, 2), Err(ZmodError::InvalidConfig(_))));
        assert!(codec.pack_channel(0, 2, 1).is_err());
        assert!(codec.word_to_volts(0, 5, GainRange::Low).is_err());
    }
}
