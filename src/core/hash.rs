//! Structural keys for hash-consing.
//!
//! Keys only have to agree for structurally equal nodes; the store resolves
//! collisions with a full equality check. The one deliberate exception is
//! the constant key, which *defines* constant equality: two doubles whose
//! decompositions agree in sign, exponent and the leading 30 mantissa bits
//! (about nine significant decimal digits) intern to the same node.

use num_traits::Float;
use rustc_hash::FxHasher;
use std::hash::Hasher;

use super::node::{Factor, Term};

/// Mantissa bits dropped from a constant key. 53 - 23 = 30 bits survive.
pub const CONSTANT_DROPPED_BITS: u32 = 23;

/// Decomposed, truncated form of a constant. Equal parts mean equal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantParts {
    mantissa: u64,
    exponent: i16,
    sign: i8,
}

impl ConstantParts {
    /// Decompose `value`. `-0.0` folds onto `0.0`; all NaNs share one key.
    #[must_use]
    pub fn of(value: f64) -> Self {
        if value == 0.0 {
            return Self {
                mantissa: 0,
                exponent: 0,
                sign: 0,
            };
        }
        if value.is_nan() {
            return Self {
                mantissa: u64::MAX,
                exponent: i16::MAX,
                sign: 0,
            };
        }
        let (mantissa, exponent, sign) = Float::integer_decode(value);
        Self {
            mantissa: mantissa >> CONSTANT_DROPPED_BITS,
            exponent,
            sign,
        }
    }

    fn pack(self) -> u64 {
        #[allow(
            clippy::cast_sign_loss,
            reason = "Bit reinterpretation for hashing only"
        )]
        let high = (u64::from(self.exponent as u16) << 8) | u64::from(self.sign as u8);
        (high << 32) ^ self.mantissa
    }
}

#[inline]
fn finish(tag: u8, f: impl FnOnce(&mut FxHasher)) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u8(tag);
    f(&mut hasher);
    hasher.finish()
}

/// Key of a constant node.
#[must_use]
pub fn constant_key(value: f64) -> u64 {
    finish(b'C', |h| h.write_u64(ConstantParts::of(value).pack()))
}

/// Key of a variable node: the identity of its binding slot.
#[must_use]
pub fn variable_key(binding_identity: u64) -> u64 {
    finish(b'V', |h| h.write_u64(binding_identity))
}

/// Checksum over a canonical term list. `child_key` yields each term's key.
pub fn sum_key(terms: &[Term], mut child_key: impl FnMut(u64) -> u64) -> u64 {
    finish(b'+', |h| {
        h.write_usize(terms.len());
        for t in terms {
            h.write_u64(t.node.0);
            h.write_u64(child_key(t.node.0));
            h.write_u64(t.coefficient.to_bits());
        }
    })
}

/// Checksum over a canonical factor list.
pub fn product_key(factors: &[Factor], mut child_key: impl FnMut(u64) -> u64) -> u64 {
    finish(b'*', |h| {
        h.write_usize(factors.len());
        for f in factors {
            h.write_u64(f.node.0);
            h.write_u64(child_key(f.node.0));
            h.write_i32(f.exponent);
        }
    })
}

/// Key of a function call: name characters plus each argument's key and id.
pub fn function_key(name: &str, args: &[u64], mut child_key: impl FnMut(u64) -> u64) -> u64 {
    finish(b'f', |h| {
        h.write(name.as_bytes());
        h.write_u8(0xff);
        for &id in args {
            h.write_u64(id);
            h.write_u64(child_key(id));
        }
    })
}

/// Key of an external (native) node.
#[must_use]
pub fn external_key(name: &str) -> u64 {
    finish(b'x', |h| h.write(name.as_bytes()))
}
