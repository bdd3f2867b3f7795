//! G.711 companding
//!
//! Sample-level μ-law and A-law conversion following ITU-T G.711, used to
//! synthesize test audio directly in the wire encoding.
//!
//! ## Algorithm Details
//!
//! ### A-law
//! - Uses the 13 most significant bits of the input
//! - Toggles even bits (XOR with 0x55)
//!
//! ### μ-law
//! - Uses the 14 most significant bits of the input
//! - Adds a bias of 33 before segment search

/// Compress a 16-bit linear sample to A-law
pub fn alaw_compress(sample: i16) -> u8 {
    let mut ix = if sample < 0 {
        ((!sample) as u16 >> 4) as i16
    } else {
        sample >> 4
    };

    if ix > 15 {
        let mut iexp = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            iexp += 1;
        }
        ix -= 16;
        ix += iexp << 4;
    }

    if sample >= 0 {
        ix |= 0x0080;
    }

    (ix ^ 0x0055) as u8
}

/// Expand an A-law byte to a 16-bit linear sample
pub fn alaw_expand(compressed: u8) -> i16 {
    let ix = ((compressed ^ 0x55) & 0x7F) as i16;
    let iexp = ix >> 4;
    let mut mant = ix & 0x0F;

    if iexp > 0 {
        mant += 16;
    }
    mant = (mant << 4) + 0x0008;
    if iexp > 1 {
        mant <<= iexp - 1;
    }

    if compressed > 127 { mant } else { -mant }
}

/// Compress a 16-bit linear sample to μ-law
pub fn ulaw_compress(sample: i16) -> u8 {
    let absno = if sample < 0 {
        ((!sample) as u16 >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        result |= 0x0080;
    }

    result as u8
}

/// Expand a μ-law byte to a 16-bit linear sample
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign = if compressed < 0x80 { -1 } else { 1 };
    let inverted = (!compressed) as i16;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = inverted & 0x0F;
    let step = 4 << (exponent + 1);

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_codes() {
        assert_eq!(ulaw_compress(0), 0xFF);
        assert_eq!(alaw_compress(0), 0xD5);
    }

    #[test]
    fn test_round_trip_error_is_bounded() {
        for sample in [-32768i16, -12000, -1000, -40, 0, 40, 1000, 12000, 32767] {
            let u = ulaw_expand(ulaw_compress(sample)) as i32;
            let a = alaw_expand(alaw_compress(sample)) as i32;
            let tolerance = (sample as i32).abs() / 16 + 16;
            assert!((u - sample as i32).abs() <= tolerance, "μ-law {} -> {}", sample, u);
            assert!((a - sample as i32).abs() <= tolerance, "A-law {} -> {}", sample, a);
        }
    }

    #[test]
    fn test_sign_is_preserved() {
        assert!(ulaw_expand(ulaw_compress(8000)) > 0);
        assert!(ulaw_expand(ulaw_compress(-8000)) < 0);
        assert!(alaw_expand(alaw_compress(8000)) > 0);
        assert!(alaw_expand(alaw_compress(-8000)) < 0);
    }
}
