//! Fixed-point encoding of floats into the Paillier plaintext space.
//!
//! A float $`x`$ is represented as $`m \cdot B^{e}`$ with base $`B = 16`$ and $`e \le 0`$.
//! The exponent is the one of smallest magnitude that represents $`x`$ exactly, bounded below by
//! [MIN_EXPONENT] ($`16^{-13} = 2^{-52}`$). Negative mantissas are stored as $`n - |m|`$.

use crate::error::CryptoError;
use num_bigint_dig::{BigInt, BigUint, Sign};
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

/// Encoding base.
pub const BASE: u32 = 16;

/// Finest exponent used when a float has no exact shorter representation.
pub const MIN_EXPONENT: i32 = -13;

/// A signed mantissa together with its base-16 exponent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedNumber {
    /// Signed integer mantissa.
    pub mantissa: BigInt,
    /// Base-16 exponent, never positive.
    pub exponent: i32,
}

impl EncodedNumber {
    /// Encode a finite float.
    pub fn encode(value: f64) -> Result<Self, CryptoError> {
        if !value.is_finite() {
            return Err(CryptoError::NonFinite(value));
        }

        // scaling by 16 is exact in binary floating point
        let mut scaled = value;
        let mut exponent = 0;
        while scaled.fract() != 0.0 && exponent > MIN_EXPONENT {
            scaled *= BASE as f64;
            exponent -= 1;
        }

        let mantissa = BigInt::from_f64(scaled.round()).ok_or(CryptoError::NonFinite(value))?;

        Ok(Self { mantissa, exponent })
    }

    /// Decode back to a float.
    pub fn decode(&self) -> Result<f64, CryptoError> {
        let m = self.mantissa.to_f64().ok_or(CryptoError::Overflow)?;
        let v = m * (BASE as f64).powi(self.exponent);
        if v.is_finite() {
            Ok(v)
        } else {
            Err(CryptoError::Overflow)
        }
    }

    /// Same value with a smaller exponent: `mantissa * 16^(exponent - new_exponent)`.
    pub fn decrease_exponent_to(&self, new_exponent: i32) -> Self {
        debug_assert!(new_exponent <= self.exponent);
        let factor = scaling_factor((self.exponent - new_exponent) as u32);
        Self {
            mantissa: &self.mantissa * BigInt::from_biguint(Sign::Plus, factor),
            exponent: new_exponent,
        }
    }

    /// Map the mantissa into $`\mathbb{Z}_n`$.
    pub fn to_residue(&self, n: &BigUint, max_int: &BigUint) -> Result<BigUint, CryptoError> {
        let magnitude = self
            .mantissa
            .abs()
            .to_biguint()
            .ok_or(CryptoError::Overflow)?;

        if &magnitude > max_int {
            return Err(CryptoError::Overflow);
        }

        if self.mantissa.is_negative() {
            Ok(n - magnitude)
        } else {
            Ok(magnitude)
        }
    }

    /// Inverse of [EncodedNumber::to_residue].
    ///
    /// Residues in $`(max\_int, n - max\_int)`$ are the result of an overflow.
    pub fn from_residue(
        residue: &BigUint,
        exponent: i32,
        n: &BigUint,
        max_int: &BigUint,
    ) -> Result<Self, CryptoError> {
        let mantissa = if residue <= max_int {
            BigInt::from_biguint(Sign::Plus, residue.clone())
        } else if residue >= &(n - max_int) {
            -BigInt::from_biguint(Sign::Plus, n - residue)
        } else {
            return Err(CryptoError::Overflow);
        };

        Ok(Self { mantissa, exponent })
    }

    /// Whether the encoded value is zero.
    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }
}

/// $`16^{d}`$
pub(crate) fn scaling_factor(d: u32) -> BigUint {
    BigUint::from(1u32) << (4 * d as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_values_use_short_exponents() {
        let e = EncodedNumber::encode(0.25).unwrap();
        assert_eq!(e.exponent, -1);
        assert_eq!(e.mantissa, BigInt::from(4));

        let e = EncodedNumber::encode(-3.0).unwrap();
        assert_eq!(e.exponent, 0);
        assert_eq!(e.mantissa, BigInt::from(-3));

        let e = EncodedNumber::encode(0.0).unwrap();
        assert!(e.is_zero());
    }

    #[test]
    fn test_inexact_values_use_min_exponent() {
        let e = EncodedNumber::encode(1.0 / 3.0).unwrap();
        assert_eq!(e.exponent, MIN_EXPONENT);
        assert!((e.decode().unwrap() - 1.0 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn test_non_finite() {
        assert!(matches!(
            EncodedNumber::encode(f64::NAN),
            Err(CryptoError::NonFinite(_))
        ));
        assert!(matches!(
            EncodedNumber::encode(f64::INFINITY),
            Err(CryptoError::NonFinite(_))
        ));
    }

    #[test]
    fn test_decrease_exponent() {
        let e = EncodedNumber::encode(1.5).unwrap();
        let lowered = e.decrease_exponent_to(-4);
        assert_eq!(lowered.exponent, -4);
        assert_eq!(lowered.decode().unwrap(), 1.5);
    }

    #[test]
    fn test_residue_round_trip() {
        let n = BigUint::from(1_000_003u64);
        let max_int = &n / BigUint::from(3u32);

        for v in [-12.5, 0.0, 7.0, -0.0625] {
            let e = EncodedNumber::encode(v).unwrap();
            let r = e.to_residue(&n, &max_int).unwrap();
            let back = EncodedNumber::from_residue(&r, e.exponent, &n, &max_int).unwrap();
            assert_eq!(back.decode().unwrap(), v);
        }
    }

    #[test]
    fn test_residue_overflow() {
        let n = BigUint::from(1_000_003u64);
        let max_int = &n / BigUint::from(3u32);

        let e = EncodedNumber::encode(500_000.0).unwrap();
        assert_eq!(e.to_residue(&n, &max_int), Err(CryptoError::Overflow));

        let middle = &n / BigUint::from(2u32);
        assert_eq!(
            EncodedNumber::from_residue(&middle, 0, &n, &max_int),
            Err(CryptoError::Overflow)
        );
    }
}
