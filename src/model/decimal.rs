/*!
 * Decimal type
 */
use num_bigint::BigInt;

use crate::error::{Error, Result};

/// A fixed point decimal value: an unscaled integer with a precision and scale.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct Decimal {
    value: BigInt,
    /// The number of digits in the number. Must be 38 or less.
    precision: u8,
    /// The number of digits to the right of the decimal point.
    scale: u32,
}

impl Decimal {
    /// Create a new Decimal object.
    pub fn new(value: BigInt, precision: u8, scale: u32) -> Result<Self> {
        if precision > 38 {
            return Err(Error::InvalidFormat(format!(
                "decimal precision {} over 38",
                precision
            )));
        }
        if scale > precision as u32 {
            return Err(Error::InvalidFormat(format!(
                "decimal scale {} over precision {}",
                scale, precision
            )));
        }
        let bound = BigInt::from(10).pow(precision as u32);
        if value.magnitude() >= bound.magnitude() {
            return Err(Error::InvalidFormat(format!(
                "decimal value {} does not fit precision {}",
                value, precision
            )));
        }
        Ok(Decimal {
            value,
            precision,
            scale,
        })
    }

    /// The unscaled value.
    pub fn unscaled(&self) -> &BigInt {
        &self.value
    }

    /// The number of digits in the number.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// The number of digits to the right of the decimal point.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Two's-complement big-endian bytes of the unscaled value, using the
    /// minimum number of bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_signed_bytes_be()
    }

    /// Rebuild a decimal from its minimal two's-complement big-endian bytes.
    pub fn from_bytes(bytes: &[u8], precision: u8, scale: u32) -> Result<Self> {
        Decimal::new(BigInt::from_signed_bytes_be(bytes), precision, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::Sign;

    #[test]
    fn test_new_decimal() {
        let dec = Decimal::new(BigInt::new(Sign::Plus, vec![123]), 3, 2).unwrap();
        assert_eq!(dec.unscaled().to_u32_digits(), (Sign::Plus, vec![123]));
        assert_eq!(2, dec.scale());
    }

    #[test]
    fn test_scale_gt_precision() {
        let value = BigInt::new(Sign::Plus, vec![123]);
        assert!(Decimal::new(value, 2, 3).is_err());
    }

    #[test]
    fn test_precision_gt_38() {
        let value = BigInt::new(Sign::Plus, vec![123]);
        assert!(Decimal::new(value, 39, 3).is_err());
    }

    #[test]
    fn test_value_must_fit_precision() {
        assert!(Decimal::new(BigInt::from(1234), 3, 0).is_err());
        assert!(Decimal::new(BigInt::from(-1234), 3, 0).is_err());
        assert!(Decimal::new(BigInt::from(999), 3, 0).is_ok());
    }

    #[test]
    fn test_bytes_roundtrip() {
        for raw in [0i64, 1, -1, 12345, -12345, i64::MAX, i64::MIN + 1] {
            let dec = Decimal::new(BigInt::from(raw), 19, 2).unwrap();
            let bytes = dec.to_bytes();
            let back = Decimal::from_bytes(&bytes, 19, 2).unwrap();
            assert_eq!(dec, back);
        }
    }

    #[test]
    fn test_minimal_byte_representation() {
        let dec = Decimal::new(BigInt::from(127), 3, 0).unwrap();
        assert_eq!(dec.to_bytes(), vec![0x7f]);
        let dec = Decimal::new(BigInt::from(128), 3, 0).unwrap();
        assert_eq!(dec.to_bytes(), vec![0x00, 0x80]);
        let dec = Decimal::new(BigInt::from(-1), 1, 0).unwrap();
        assert_eq!(dec.to_bytes(), vec![0xff]);
    }
}
