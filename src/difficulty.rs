//! Compact ("nBits") proof-of-work targets
//!
//! The 4-byte encoding is an exponent byte followed by a 3-byte big-endian
//! mantissa: `target = mantissa << (8 * (exponent - 3))`. The mantissa is a
//! signed quantity on the wire, so a set high bit is rejected and encoders
//! shift the value right by a byte instead of producing one.
//!
//! A [`Difficulty`] always holds a target that is exactly representable in
//! compact form, which keeps `decode(encode(d)) == d` and lets the mining hot
//! loop compare hashes against a cached 32-byte big-endian target.

use std::fmt;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::config::RetargetParams;
use crate::error::{LedgerError, Result};

/// The easiest target on the main network, used as the reference for [`Difficulty::relative`]
pub const POW_LIMIT_BITS: u32 = 0x1d00_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Difficulty {
    /// 256-bit target, big-endian
    target: [u8; 32],
}

impl Difficulty {
    /// Decode the 4-byte compact form.
    ///
    /// Negative mantissas, targets that do not fit in 256 bits and non-canonical
    /// encodings are all decode errors, so every accepted input re-encodes to itself.
    pub fn decode(bytes: &[u8; 4]) -> Result<Self> {
        let target = expand_compact(bytes)?;
        let canonical = compress_target(&target);
        if canonical != *bytes {
            return Err(LedgerError::decode(
                "difficulty",
                format!(
                    "non-canonical encoding {}, expected {}",
                    hex::encode(bytes),
                    hex::encode(canonical)
                ),
            ));
        }
        Ok(Difficulty { target })
    }

    /// Encode to the minimal 4-byte compact form
    #[must_use]
    pub fn encode(&self) -> [u8; 4] {
        compress_target(&self.target)
    }

    pub fn from_compact(bits: u32) -> Result<Self> {
        Self::decode(&bits.to_be_bytes())
    }

    #[must_use]
    pub fn to_compact(&self) -> u32 {
        u32::from_be_bytes(self.encode())
    }

    /// Round a 256-bit big-endian target down to the nearest compact-representable value
    #[must_use]
    pub fn from_target_bytes(target: &[u8; 32]) -> Self {
        let bits = compress_target(target);
        // A freshly compressed target always expands.
        let target = expand_compact(&bits).unwrap_or([0u8; 32]);
        Difficulty { target }
    }

    /// Round an integer target down to compact precision; fails above 2^256 - 1
    pub fn from_target(target: &BigUint) -> Result<Self> {
        if target.bits() > 256 {
            return Err(LedgerError::Validation(format!(
                "target {target:x} exceeds 256 bits"
            )));
        }
        Ok(Self::from_target_bytes(&biguint_to_32_bytes(target)))
    }

    /// Target as 32 big-endian bytes
    #[must_use]
    pub const fn target_bytes(&self) -> &[u8; 32] {
        &self.target
    }

    #[must_use]
    pub fn target(&self) -> BigUint {
        BigUint::from_bytes_be(&self.target)
    }

    /// True iff `hash`, read as a 256-bit big-endian integer, is strictly below the target
    #[must_use]
    #[inline]
    pub fn is_solution(&self, hash: &[u8; 32]) -> bool {
        hash < &self.target
    }

    /// Scale the target up (easier) by `factor`, saturating at 2^256 - 1
    #[must_use]
    pub fn mul(&self, factor: u64) -> Self {
        let scaled = self.target() * factor;
        let max = (BigUint::from(1u8) << 256usize) - 1u8;
        let scaled = if scaled > max { max } else { scaled };
        Self::from_target_bytes(&biguint_to_32_bytes(&scaled))
    }

    /// Scale the target down (harder) by `divisor`
    pub fn div(&self, divisor: u64) -> Result<Self> {
        if divisor == 0 {
            return Err(LedgerError::Validation("difficulty divisor is zero".into()));
        }
        Self::from_target(&(self.target() / divisor))
    }

    /// Next target after an interval that took `actual_timespan` seconds.
    ///
    /// The timespan is clamped to `[expected / f, expected * f]` and the result
    /// never exceeds the configured proof-of-work limit.
    pub fn retarget(&self, actual_timespan: u64, params: &RetargetParams) -> Result<Self> {
        let expected = params.target_timespan_secs;
        let factor = params.max_adjustment_factor;
        if expected == 0 || factor == 0 {
            return Err(LedgerError::Config(
                "retarget timespan and adjustment factor must be positive".into(),
            ));
        }

        let clamped = actual_timespan.clamp(expected / factor, expected.saturating_mul(factor));
        let new_target = self.target() * clamped / expected;

        let limit = Self::from_compact(params.pow_limit_bits)?;
        if new_target > limit.target() {
            return Ok(limit);
        }
        Self::from_target(&new_target)
    }

    /// How many times harder than the easiest main-network target
    #[must_use]
    pub fn relative(&self) -> f64 {
        let limit = expand_compact(&POW_LIMIT_BITS.to_be_bytes())
            .map(|t| BigUint::from_bytes_be(&t))
            .unwrap_or_default();
        let target = self.target();
        if target.is_zero() {
            return f64::INFINITY;
        }
        let limit_f = limit.to_f64().unwrap_or(1.0);
        let target_f = target.to_f64().unwrap_or(1.0);
        limit_f / target_f
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.to_compact())
    }
}

/// Compact bytes to a 32-byte big-endian target
fn expand_compact(bytes: &[u8; 4]) -> Result<[u8; 32]> {
    let exponent = bytes[0] as usize;
    let mantissa = [bytes[1], bytes[2], bytes[3]];
    let mut target = [0u8; 32];

    if mantissa[0] & 0x80 != 0 {
        return Err(LedgerError::decode("difficulty", "negative mantissa"));
    }
    if mantissa == [0, 0, 0] {
        return Ok(target);
    }

    if exponent <= 3 {
        let value = u32::from_be_bytes([0, mantissa[0], mantissa[1], mantissa[2]]) >> (8 * (3 - exponent));
        target[28..].copy_from_slice(&value.to_be_bytes());
        return Ok(target);
    }

    // Mantissa byte j lands at index 32 - exponent + j
    for (j, &byte) in mantissa.iter().enumerate() {
        match (32 + j).checked_sub(exponent) {
            Some(pos) => target[pos] = byte,
            None if byte == 0 => {}
            None => {
                return Err(LedgerError::decode(
                    "difficulty",
                    format!("exponent {exponent} overflows a 256-bit target"),
                ));
            }
        }
    }
    Ok(target)
}

/// 32-byte big-endian target to the minimal compact bytes
fn compress_target(target: &[u8; 32]) -> [u8; 4] {
    let Some(first) = target.iter().position(|&b| b != 0) else {
        return [0; 4];
    };

    let mut size = 32 - first;
    let at = |i: usize| target.get(first + i).copied().unwrap_or(0);
    let mut mantissa = [at(0), at(1), at(2)];

    // Keep the sign bit clear
    if mantissa[0] & 0x80 != 0 {
        mantissa = [0, mantissa[0], mantissa[1]];
        size += 1;
    }

    [size as u8, mantissa[0], mantissa[1], mantissa[2]]
}

fn biguint_to_32_bytes(n: &BigUint) -> [u8; 32] {
    let bytes = n.to_bytes_be();
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_hex(d: &Difficulty) -> String {
        hex::encode(d.target_bytes())
    }

    #[test]
    fn test_known_vectors() {
        let tests = [
            (0x1903a30c, "0000000000000003a30c00000000000000000000000000000000000000000000"),
            (0x1b0404cb, "00000000000404cb000000000000000000000000000000000000000000000000"),
            (0x1d00ffff, "00000000ffff0000000000000000000000000000000000000000000000000000"),
        ];
        for (bits, expected) in tests {
            let d = Difficulty::from_compact(bits).unwrap();
            assert_eq!(target_hex(&d), expected);
            assert_eq!(d.to_compact(), bits);
        }
    }

    #[test]
    fn test_small_exponents() {
        let d = Difficulty::from_target(&BigUint::from(0x12u8)).unwrap();
        assert_eq!(d.to_compact(), 0x0112_0000);
        assert_eq!(d.target(), BigUint::from(0x12u8));

        let d = Difficulty::from_target(&BigUint::from(0x80u8)).unwrap();
        assert_eq!(d.to_compact(), 0x0200_8000);
        assert_eq!(Difficulty::from_compact(0x0200_8000).unwrap(), d);
    }

    #[test]
    fn test_zero_target() {
        let d = Difficulty::from_target(&BigUint::zero()).unwrap();
        assert_eq!(d.encode(), [0, 0, 0, 0]);
        assert!(!d.is_solution(&[0u8; 32]));
    }

    #[test]
    fn test_decode_rejects_bad_encodings() {
        // negative mantissa
        assert!(Difficulty::from_compact(0x1d80_0000).is_err());
        // overflows 256 bits
        assert!(Difficulty::from_compact(0x2201_ffff).is_err());
        // same target as 1c00ff00, not minimal
        assert!(Difficulty::from_compact(0x1d00_00ff).is_err());
        // zero mantissa with a nonzero exponent
        assert!(Difficulty::from_compact(0x1d00_0000).is_err());
    }

    #[test]
    fn test_from_target_rounds_down() {
        let precise = BigUint::parse_bytes(b"123456789abcdef", 16).unwrap();
        let d = Difficulty::from_target(&precise).unwrap();
        assert_eq!(d.to_compact(), 0x0801_2345);
        assert!(d.target() <= precise);
        assert!(Difficulty::from_target(&(BigUint::from(1u8) << 256usize)).is_err());
    }

    #[test]
    fn test_is_solution_is_strict() {
        let d = Difficulty::from_compact(0x1d00ffff).unwrap();
        let target = *d.target_bytes();
        assert!(!d.is_solution(&target));

        let mut below = target;
        below[5] = 0xfe;
        assert!(d.is_solution(&below));

        let mut above = target;
        above[31] = 1;
        assert!(!d.is_solution(&above));
        assert!(!d.is_solution(&[0xff; 32]));
    }

    #[test]
    fn test_mul_div() {
        let d = Difficulty::from_compact(0x1b0404cb).unwrap();
        let tripled = d.mul(3);
        assert_eq!(tripled.to_compact(), 0x1b0c0e61);
        assert_eq!(tripled.div(3).unwrap(), d);
        assert!(d.div(0).is_err());

        // Saturates instead of overflowing
        let easy = Difficulty::from_compact(0x2000ffff).unwrap();
        let saturated = easy.mul(u64::MAX);
        assert_eq!(saturated.to_compact(), 0x2100ffff);
        assert_eq!(saturated.target_bytes()[..2], [0xff, 0xff]);
    }

    #[test]
    fn test_retarget() {
        let params = RetargetParams {
            target_timespan_secs: 60 * 60 * 24 * 14,
            ..RetargetParams::default()
        };
        let prev = Difficulty::from_compact(0x1801d854).unwrap();
        let next = prev.retarget(302_400, &params).unwrap();
        assert_eq!(next.to_compact(), 0x17761500);

        // Clamped to a factor of four in either direction
        let faster = prev.retarget(1, &params).unwrap();
        assert_eq!(faster, next);
        let slower = prev.retarget(u64::MAX, &params).unwrap();
        assert_eq!(slower, prev.mul(4));

        // Never easier than the proof-of-work limit
        let limit = Difficulty::from_compact(0x1d00ffff).unwrap();
        assert_eq!(limit.retarget(u64::MAX, &params).unwrap(), limit);
    }

    #[test]
    fn test_relative_difficulty() {
        let d = Difficulty::from_compact(0x18013ce9).unwrap();
        assert_eq!(d.relative() as u64, 888171856257);
        assert_eq!(d.to_string(), "18013ce9");
    }
}
