// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The scheduler stores shaping rates as a mantissa and an exponent.  The
//! conversion is lossy: any bits below the top `RATE_MANTISSA_BITS` of a rate
//! are discarded.

/// Width of the mantissa field in the scheduler rate registers.
pub const RATE_MANTISSA_BITS: u32 = 10;

const RATE_MANTISSA_MAX: u32 = (1 << RATE_MANTISSA_BITS) - 1;

// The exponent field is 5 bits wide.
const RATE_EXPONENT_MAX: u32 = 31;

/// A shaping rate in the hardware's mantissa/exponent form.  The rate it
/// represents is `mantissa << exponent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateCode {
    pub mantissa: u32,
    pub exponent: u32,
}

impl RateCode {
    /// Encode a rate, truncating the low-order bits that don't fit in the
    /// mantissa.
    pub fn from_rate(rate: u32) -> Self {
        let mut mantissa = rate;
        let mut exponent = 0;
        while mantissa > RATE_MANTISSA_MAX {
            mantissa >>= 1;
            exponent += 1;
        }
        RateCode { mantissa, exponent }
    }

    /// Decode the rate.  Values read back from the hardware aren't trusted to
    /// fit, so this saturates rather than overflowing.
    pub fn rate(&self) -> u32 {
        let exponent = self.exponent.min(RATE_EXPONENT_MAX);
        let rate = u64::from(self.mantissa) << exponent;
        u32::try_from(rate).unwrap_or(u32::MAX)
    }
}

#[test]
fn test_small_rates_are_exact() {
    for rate in [0, 1, 100, RATE_MANTISSA_MAX] {
        let code = RateCode::from_rate(rate);
        assert_eq!(code.exponent, 0);
        assert_eq!(code.rate(), rate);
    }
}

#[test]
fn test_large_rates_truncate() {
    // 100Gbps in kbps
    let rate = 100_000_000;
    let code = RateCode::from_rate(rate);
    assert!(code.mantissa <= RATE_MANTISSA_MAX);
    let decoded = code.rate();
    assert!(decoded <= rate);

    // The error is bounded by the width of the mantissa.
    let err = rate - decoded;
    assert!(u64::from(err) * 512 < u64::from(rate));
}

#[test]
fn test_saturate() {
    let code = RateCode {
        mantissa: RATE_MANTISSA_MAX,
        exponent: 40,
    };
    assert_eq!(code.rate(), u32::MAX);
}
