//! Conversions for the 16-bit "sfloat" type (IEEE 754-2008 binary16).
//!
//! Conversion from `f32` rounds to nearest, ties to even. Values beyond the
//! half-precision range become infinities, values below half the smallest
//! subnormal become signed zeros.

/// Convert an `f32` to its 16-bit representation.
pub fn f32_to_sfloat(value: f32) -> u16 {
    let x = value.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xFF) as i32;
    let man = x & 0x007F_FFFF;

    if exp == 0xFF {
        if man == 0 {
            return sign | 0x7C00;
        }
        // Keep a quiet NaN with the top payload bits.
        return sign | 0x7E00 | (man >> 13) as u16;
    }

    let e = exp - 127 + 15;
    if e >= 0x1F {
        return sign | 0x7C00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = man | 0x0080_0000;
        let shift = (14 - e) as u32;
        let truncated = m >> shift;
        let rem = m & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        let rounded = if rem > halfway || (rem == halfway && truncated & 1 == 1) {
            truncated + 1
        } else {
            truncated
        };
        return sign | rounded as u16;
    }

    let h = ((e as u32) << 10) | (man >> 13);
    let rem = man & 0x1FFF;
    // A carry out of the mantissa correctly bumps the exponent (up to infinity).
    let rounded = if rem > 0x1000 || (rem == 0x1000 && h & 1 == 1) {
        h + 1
    } else {
        h
    };
    sign | rounded as u16
}

/// Convert a 16-bit representation back to `f32`. This is exact.
pub fn sfloat_to_f32(bits: u16) -> f32 {
    let sign = ((bits & 0x8000) as u32) << 16;
    let exp = ((bits >> 10) & 0x1F) as u32;
    let man = (bits & 0x03FF) as u32;

    let x = match (exp, man) {
        (0, 0) => sign,
        (0, _) => {
            let mut e: i32 = -14;
            let mut m = man;
            while m & 0x0400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (((e + 127) as u32) << 23) | ((m & 0x03FF) << 13)
        }
        (0x1F, 0) => sign | 0x7F80_0000,
        (0x1F, _) => sign | 0x7FC0_0000 | (man << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (man << 13),
    };
    f32::from_bits(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(f32_to_sfloat(0.0), 0x0000);
        assert_eq!(f32_to_sfloat(-0.0), 0x8000);
        assert_eq!(f32_to_sfloat(1.0), 0x3C00);
        assert_eq!(f32_to_sfloat(-2.0), 0xC000);
        assert_eq!(f32_to_sfloat(0.5), 0x3800);
        assert_eq!(f32_to_sfloat(0.1), 0x2E66);
        assert_eq!(f32_to_sfloat(65504.0), 0x7BFF);
        assert_eq!(sfloat_to_f32(0x7BFF), 65504.0);
        assert_eq!(sfloat_to_f32(0x3C00), 1.0);
        assert_eq!(sfloat_to_f32(0xC000), -2.0);
    }

    #[test]
    fn test_overflow_and_underflow() {
        // Halfway between 65504 and 65536 rounds to even, i.e. infinity.
        assert_eq!(f32_to_sfloat(65520.0), 0x7C00);
        assert_eq!(f32_to_sfloat(1.0e6), 0x7C00);
        assert_eq!(f32_to_sfloat(-1.0e6), 0xFC00);
        assert_eq!(f32_to_sfloat(f32::INFINITY), 0x7C00);
        assert_eq!(f32_to_sfloat(1.0e-8), 0x0000);
        assert_eq!(f32_to_sfloat(-1.0e-8), 0x8000);
    }

    #[test]
    fn test_subnormals() {
        let smallest = 2f32.powi(-24);
        assert_eq!(f32_to_sfloat(smallest), 0x0001);
        assert_eq!(sfloat_to_f32(0x0001), smallest);
        assert_eq!(sfloat_to_f32(0x03FF), 1023.0 * smallest);
        assert_eq!(f32_to_sfloat(1023.0 * smallest), 0x03FF);
    }

    #[test]
    fn test_nan() {
        assert!(sfloat_to_f32(f32_to_sfloat(f32::NAN)).is_nan());
        assert!(sfloat_to_f32(0x7E00).is_nan());
    }

    #[test]
    fn test_all_finite_values_are_exact() {
        for bits in 0u16..=0xFFFF {
            let f = sfloat_to_f32(bits);
            if f.is_nan() {
                continue;
            }
            assert_eq!(f32_to_sfloat(f), bits, "bits {bits:#06x}");
        }
    }

    #[test]
    fn test_relative_error() {
        for v in [3.14159f32, -271.828, 1234.5, 0.001234, 60000.0] {
            let back = sfloat_to_f32(f32_to_sfloat(v));
            assert!(((back - v) / v).abs() <= 1.0 / 2048.0, "{v} -> {back}");
        }
    }
}
