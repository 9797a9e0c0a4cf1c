//! Exact NUMERIC/DECIMAL representation.
//!
//! ASE numerics carry up to 38 decimal digits, which does not fit
//! [`rust_decimal::Decimal`]'s 96-bit mantissa. Values are kept in their
//! exact wire form (sign, unscaled magnitude, precision, scale) and only
//! converted to `Decimal` on request, failing rather than rounding.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TypeError;

/// Maximum precision of an ASE numeric.
pub const MAX_PRECISION: u8 = 38;

fn pow10(n: u8) -> u128 {
    10u128.pow(u32::from(n))
}

/// An exact fixed-point decimal: `(-1)^negative * mantissa * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numeric {
    negative: bool,
    mantissa: u128,
    precision: u8,
    scale: u8,
}

impl Numeric {
    /// Create a numeric from its parts.
    pub fn new(negative: bool, mantissa: u128, precision: u8, scale: u8) -> Result<Self, TypeError> {
        if precision == 0 || precision > MAX_PRECISION {
            return Err(TypeError::PrecisionOverflow(precision));
        }
        if scale > precision {
            return Err(TypeError::InvalidNumeric(format!(
                "scale {scale} exceeds precision {precision}"
            )));
        }
        if mantissa >= pow10(precision) {
            return Err(TypeError::InvalidNumeric(format!(
                "mantissa has more than {precision} digits"
            )));
        }
        Ok(Self {
            negative: negative && mantissa != 0,
            mantissa,
            precision,
            scale,
        })
    }

    /// Zero at a given precision and scale.
    #[must_use]
    pub fn zero(precision: u8, scale: u8) -> Self {
        Self {
            negative: false,
            mantissa: 0,
            precision: precision.clamp(1, MAX_PRECISION),
            scale,
        }
    }

    /// Whether the value is negative.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.negative
    }

    /// Unscaled magnitude.
    #[must_use]
    pub const fn mantissa(&self) -> u128 {
        self.mantissa
    }

    /// Declared precision.
    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }

    /// Declared scale.
    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Convert to a different scale without loss.
    ///
    /// Scaling up multiplies the mantissa; scaling down divides and fails
    /// with [`TypeError::ScaleOverflow`] if any nonzero digit would be
    /// dropped. There is no implicit rounding.
    pub fn rescale(&self, scale: u8) -> Result<Self, TypeError> {
        if scale == self.scale {
            return Ok(*self);
        }
        if scale > self.scale {
            let factor = pow10(scale - self.scale);
            let mantissa = self
                .mantissa
                .checked_mul(factor)
                .filter(|m| *m < pow10(MAX_PRECISION))
                .ok_or(TypeError::ScaleOverflow {
                    from: self.scale,
                    to: scale,
                })?;
            let precision = self.precision.saturating_add(scale - self.scale).min(MAX_PRECISION);
            Self::new(self.negative, mantissa, precision, scale)
        } else {
            let factor = pow10(self.scale - scale);
            if self.mantissa % factor != 0 {
                return Err(TypeError::ScaleOverflow {
                    from: self.scale,
                    to: scale,
                });
            }
            Self::new(self.negative, self.mantissa / factor, self.precision, scale)
        }
    }

    /// Number of bytes a wire value of the given precision occupies,
    /// including the sign byte.
    #[must_use]
    pub fn wire_size(precision: u8) -> usize {
        let max = pow10(precision.clamp(1, MAX_PRECISION)) - 1;
        let bits = 128 - max.leading_zeros() as usize;
        1 + bits.div_ceil(8)
    }

    /// Decode a wire value: sign byte followed by a big-endian magnitude.
    pub fn from_wire(bytes: &[u8], precision: u8, scale: u8) -> Result<Self, TypeError> {
        let Some((&sign, magnitude)) = bytes.split_first() else {
            return Err(TypeError::InvalidWidth {
                type_name: "NUMERIC",
                len: 0,
            });
        };
        if magnitude.len() > 16 {
            return Err(TypeError::InvalidWidth {
                type_name: "NUMERIC",
                len: bytes.len(),
            });
        }
        let mut mantissa = 0u128;
        for &byte in magnitude {
            mantissa = (mantissa << 8) | u128::from(byte);
        }
        Self::new(sign != 0, mantissa, precision, scale)
    }

    /// Encode to wire form at the width implied by the precision.
    #[must_use]
    pub fn to_wire(&self) -> Bytes {
        let size = Self::wire_size(self.precision);
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(u8::from(self.negative));
        let magnitude = self.mantissa.to_be_bytes();
        buf.put_slice(&magnitude[16 - (size - 1)..]);
        buf.freeze()
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let factor = pow10(self.scale);
        let integer = self.mantissa / factor;
        let fraction = self.mantissa % factor;
        write!(f, "{integer}.{fraction:0width$}", width = self.scale as usize)
    }
}

impl TryFrom<Numeric> for rust_decimal::Decimal {
    type Error = TypeError;

    fn try_from(value: Numeric) -> Result<Self, Self::Error> {
        let signed = i128::try_from(value.mantissa).map_err(|_| TypeError::OutOfRange {
            target_type: "Decimal",
        })?;
        let signed = if value.negative { -signed } else { signed };
        rust_decimal::Decimal::try_from_i128_with_scale(signed, u32::from(value.scale))
            .map_err(|_| TypeError::OutOfRange {
                target_type: "Decimal",
            })
    }
}

impl From<rust_decimal::Decimal> for Numeric {
    fn from(value: rust_decimal::Decimal) -> Self {
        let mantissa = value.mantissa();
        let negative = mantissa < 0;
        let mantissa = mantissa.unsigned_abs();
        let mut digits = 1u8;
        let mut probe = mantissa;
        while probe >= 10 {
            probe /= 10;
            digits += 1;
        }
        Self {
            negative,
            mantissa,
            precision: digits.max(value.scale() as u8 + 1).min(MAX_PRECISION),
            scale: value.scale() as u8,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let n = Numeric::new(false, 123_456, 10, 2).unwrap();
        assert_eq!(n.to_string(), "1234.56");

        let n = Numeric::new(true, 5, 3, 3).unwrap();
        assert_eq!(n.to_string(), "-0.005");

        let n = Numeric::new(false, 42, 5, 0).unwrap();
        assert_eq!(n.to_string(), "42");
    }

    #[test]
    fn negative_zero_normalizes() {
        let n = Numeric::new(true, 0, 5, 2).unwrap();
        assert!(!n.is_negative());
    }

    #[test]
    fn rescale_up_is_exact() {
        let n = Numeric::new(false, 150, 5, 2).unwrap();
        let scaled = n.rescale(4).unwrap();
        assert_eq!(scaled.mantissa(), 15000);
        assert_eq!(scaled.scale(), 4);
        assert_eq!(scaled.to_string(), "1.5000");
    }

    #[test]
    fn rescale_down_requires_trailing_zeros() {
        let n = Numeric::new(false, 15000, 7, 4).unwrap();
        let scaled = n.rescale(2).unwrap();
        assert_eq!(scaled.mantissa(), 150);

        let n = Numeric::new(false, 15001, 7, 4).unwrap();
        let err = n.rescale(2).unwrap_err();
        assert!(matches!(err, TypeError::ScaleOverflow { from: 4, to: 2 }));
    }

    #[test]
    fn wire_roundtrip() {
        let n = Numeric::new(true, 99_999_999_999_999_999, 18, 4).unwrap();
        let wire = n.to_wire();
        assert_eq!(wire.len(), Numeric::wire_size(18));
        assert_eq!(wire[0], 1);

        let decoded = Numeric::from_wire(&wire, 18, 4).unwrap();
        assert_eq!(decoded, n);
    }

    #[test]
    fn wire_size_covers_full_precision() {
        // One sign byte plus enough magnitude bytes for 10^p - 1.
        assert_eq!(Numeric::wire_size(1), 2);
        assert_eq!(Numeric::wire_size(2), 2);
        assert_eq!(Numeric::wire_size(3), 3);
        assert_eq!(Numeric::wire_size(38), 17);
    }

    #[test]
    fn max_precision_roundtrips() {
        let mantissa = pow10(38) - 1;
        let n = Numeric::new(false, mantissa, 38, 10).unwrap();
        let decoded = Numeric::from_wire(&n.to_wire(), 38, 10).unwrap();
        assert_eq!(decoded.mantissa(), mantissa);
    }

    #[test]
    fn decimal_conversions() {
        let n = Numeric::new(true, 123_456, 10, 3).unwrap();
        let d = rust_decimal::Decimal::try_from(n).unwrap();
        assert_eq!(d.to_string(), "-123.456");

        let back = Numeric::from(d);
        assert!(back.is_negative());
        assert_eq!(back.mantissa(), 123_456);
        assert_eq!(back.scale(), 3);
    }

    #[test]
    fn oversized_numeric_rejects_decimal_conversion() {
        let n = Numeric::new(false, pow10(38) - 1, 38, 0).unwrap();
        assert!(rust_decimal::Decimal::try_from(n).is_err());
    }

    #[test]
    fn precision_bounds_enforced() {
        assert!(Numeric::new(false, 0, 0, 0).is_err());
        assert!(Numeric::new(false, 0, 39, 0).is_err());
        assert!(Numeric::new(false, 100, 2, 0).is_err());
        assert!(Numeric::new(false, 1, 2, 3).is_err());
    }
}
