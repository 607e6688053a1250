//! Known Zmod products, keyed by the product model string stored in the pod's DNA.

/// Integer id for each product in [`KNOWN_MODELS`].
pub type ModelNumber = u16;

/// Which kind of front end a pod is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZmodFamily {
    /// Two-channel ADC (Zmod Scope)
    Adc,
    /// Two-channel DAC (Zmod AWG)
    Dac,
    /// Four-channel digitizer; identified but not driven by this library
    Digitizer,
    /// Anything not in the table
    Unsupported,
}

/// One row of the product table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZmodModel {
    /// Product model string exactly as written in the DNA
    pub name: &'static str,
    pub model_number: ModelNumber,
    pub family: ZmodFamily,
    /// Converter resolution in bits
    pub resolution_bits: u8,
    pub max_sample_rate_msps: u16,
}

pub const ZMOD_ADC_1410_40: ModelNumber = 1;
pub const ZMOD_ADC_1410_105: ModelNumber = 2;
pub const ZMOD_ADC_1410_125: ModelNumber = 3;
pub const ZMOD_ADC_1210_40: ModelNumber = 4;
pub const ZMOD_ADC_1210_125: ModelNumber = 5;
pub const ZMOD_ADC_1010_40: ModelNumber = 6;
pub const ZMOD_ADC_1010_125: ModelNumber = 7;
pub const ZMOD_DAC_1411_125: ModelNumber = 8;
pub const ZMOD_DIGITIZER_1430_125: ModelNumber = 9;

const fn adc(name: &'static str, model_number: ModelNumber, bits: u8, msps: u16) -> ZmodModel {
    ZmodModel {
        name,
        model_number,
        family: ZmodFamily::Adc,
        resolution_bits: bits,
        max_sample_rate_msps: msps,
    }
}

pub const KNOWN_MODELS: &[ZmodModel] = &[
    adc("Zmod ADC 1410-40", ZMOD_ADC_1410_40, 14, 40),
    adc("Zmod ADC 1410-105", ZMOD_ADC_1410_105, 14, 105),
    adc("Zmod ADC 1410-125", ZMOD_ADC_1410_125, 14, 125),
    adc("Zmod ADC 1210-40", ZMOD_ADC_1210_40, 12, 40),
    adc("Zmod ADC 1210-125", ZMOD_ADC_1210_125, 12, 125),
    adc("Zmod ADC 1010-40", ZMOD_ADC_1010_40, 10, 40),
    adc("Zmod ADC 1010-125", ZMOD_ADC_1010_125, 10, 125),
    ZmodModel {
        name: "Zmod DAC 1411-125",
        model_number: ZMOD_DAC_1411_125,
        family: ZmodFamily::Dac,
        resolution_bits: 14,
        max_sample_rate_msps: 125,
    },
    ZmodModel {
        name: "Zmod Digitizer 1430-125",
        model_number: ZMOD_DIGITIZER_1430_125,
        family: ZmodFamily::Digitizer,
        resolution_bits: 14,
        max_sample_rate_msps: 125,
    },
];

/// Strip the NUL padding and whitespace that DNA string fields carry.
fn clean(raw: &str) -> &str {
    let end = raw.find('\0').unwrap_or(raw.len());
    raw[..end].trim()
}

/// Look up a product by its DNA model string.
pub fn lookup(model: &str) -> Option<&'static ZmodModel> {
    let model = clean(model);
    KNOWN_MODELS.iter().find(|m| m.name == model)
}

pub fn lookup_model_number(model_number: ModelNumber) -> Option<&'static ZmodModel> {
    KNOWN_MODELS.iter().find(|m| m.model_number == model_number)
}

/// Resolve a DNA model string to its family, `Unsupported` when unknown.
pub fn family_of(model: &str) -> ZmodFamily {
    lookup(model).map_or(ZmodFamily::Unsupported, |m| m.family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_tolerates_dna_padding() {
        let m = lookup("Zmod ADC 1210-125\0\0\0").expect("padded name should resolve");
        assert_eq!(m.resolution_bits, 12);
        assert_eq!(m.family, ZmodFamily::Adc);
        assert_eq!(family_of(" Zmod DAC 1411-125 "), ZmodFamily::Dac);
    }

    #[test]
    fn test_unknown_model_is_unsupported() {
        assert!(lookup("Zmod ADC 9999-1").is_none());
        assert_eq!(family_of("Pmod AD1"), ZmodFamily::Unsupported);
        assert_eq!(family_of(""), ZmodFamily::Unsupported);
    }

    #[test]
    fn test_model_numbers_unique() {
        for (i, a) in KNOWN_MODELS.iter().enumerate() {
            for b in &KNOWN_MODELS[i + 1..] {
                assert_ne!(a.model_number, b.model_number, "{} and {} share a number", a.name, b.name);
            }
            assert_eq!(lookup_model_number(a.model_number), Some(a));
        }
    }
}
