//! Constant values of a code unit and their deduplication key.
//!
//! The constant pool deduplicates by a key that is stricter than Python
//! equality: `1`, `1.0` and `True` are distinct, `+0.0` and `-0.0` are
//! distinct (floats and complex numbers compare bitwise), tuples and
//! frozen sets compare by the recursive key of their elements, and nested
//! code objects compare by identity. The `PartialEq`/`Hash` implementations
//! below *are* that key.

use core::{hash, mem};
use std::fmt;

use malachite_bigint::BigInt;
use num_complex::Complex64;

use crate::code::CodeObject;

#[derive(Debug, Clone)]
pub enum ConstantData {
    None,
    Ellipsis,
    Boolean { value: bool },
    Integer { value: BigInt },
    Float { value: f64 },
    Complex { value: Complex64 },
    Str { value: String },
    Bytes { value: Vec<u8> },
    Tuple { elements: Vec<ConstantData> },
    FrozenSet { elements: Vec<ConstantData> },
    Code { code: Box<CodeObject> },
}

impl PartialEq for ConstantData {
    fn eq(&self, other: &Self) -> bool {
        use ConstantData::*;

        match (self, other) {
            (None, None) => true,
            (Ellipsis, Ellipsis) => true,
            (Boolean { value: a }, Boolean { value: b }) => a == b,
            (Integer { value: a }, Integer { value: b }) => a == b,
            // Compare floats by bit pattern so that -0.0 and 0.0 stay
            // distinct constants, exactly like the interpreter's pool.
            (Float { value: a }, Float { value: b }) => a.to_bits() == b.to_bits(),
            (Complex { value: a }, Complex { value: b }) => {
                a.re.to_bits() == b.re.to_bits() && a.im.to_bits() == b.im.to_bits()
            }
            (Str { value: a }, Str { value: b }) => a == b,
            (Bytes { value: a }, Bytes { value: b }) => a == b,
            (Tuple { elements: a }, Tuple { elements: b }) => a == b,
            (FrozenSet { elements: a }, FrozenSet { elements: b }) => a == b,
            (Code { code: a }, Code { code: b }) => core::ptr::eq(a.as_ref(), b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for ConstantData {}

impl hash::Hash for ConstantData {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        use ConstantData::*;

        mem::discriminant(self).hash(state);
        match self {
            None | Ellipsis => {}
            Boolean { value } => value.hash(state),
            Integer { value } => value.hash(state),
            Float { value } => value.to_bits().hash(state),
            Complex { value } => {
                value.re.to_bits().hash(state);
                value.im.to_bits().hash(state);
            }
            Str { value } => value.hash(state),
            Bytes { value } => value.hash(state),
            Tuple { elements } | FrozenSet { elements } => elements.hash(state),
            Code { code } => core::ptr::hash(code.as_ref(), state),
        }
    }
}

impl ConstantData {
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// `Some` for `None` and string constants, which are the values a
    /// docstring slot may carry.
    pub fn as_docstring(&self) -> Option<&Self> {
        match self {
            Self::None | Self::Str { .. } => Some(self),
            _ => Option::None,
        }
    }
}

impl From<&str> for ConstantData {
    fn from(value: &str) -> Self {
        Self::Str {
            value: value.to_owned(),
        }
    }
}

impl From<String> for ConstantData {
    fn from(value: String) -> Self {
        Self::Str { value }
    }
}

impl From<bool> for ConstantData {
    fn from(value: bool) -> Self {
        Self::Boolean { value }
    }
}

impl From<i64> for ConstantData {
    fn from(value: i64) -> Self {
        Self::Integer {
            value: BigInt::from(value),
        }
    }
}

impl From<f64> for ConstantData {
    fn from(value: f64) -> Self {
        Self::Float { value }
    }
}

impl fmt::Display for ConstantData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Ellipsis => write!(f, "..."),
            Self::Boolean { value } => write!(f, "{}", if *value { "True" } else { "False" }),
            Self::Integer { value } => write!(f, "{value}"),
            Self::Float { value } => write!(f, "{value}"),
            Self::Complex { value } => write!(f, "{value}"),
            Self::Str { value } => write!(f, "{value:?}"),
            Self::Bytes { value } => write!(f, r#"b"{}""#, value.escape_ascii()),
            Self::Tuple { elements } => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    element.fmt(f)?;
                }
                if elements.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Self::FrozenSet { elements } => {
                write!(f, "frozenset({{")?;
                for (i, element) in elements.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    element.fmt(f)?;
                }
                write!(f, "}})")
            }
            Self::Code { code } => write!(f, "{code:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_of_different_types_are_distinct() {
        let one = ConstantData::from(1i64);
        let one_f = ConstantData::from(1.0f64);
        let truth = ConstantData::from(true);
        assert_ne!(one, one_f);
        assert_ne!(one, truth);
        assert_ne!(one_f, truth);
    }

    #[test]
    fn signed_zeros_are_distinct() {
        assert_ne!(ConstantData::from(0.0f64), ConstantData::from(-0.0f64));
        assert_eq!(ConstantData::from(0.0f64), ConstantData::from(0.0f64));

        let pos = ConstantData::Complex {
            value: Complex64::new(0.0, 0.0),
        };
        let neg = ConstantData::Complex {
            value: Complex64::new(0.0, -0.0),
        };
        assert_ne!(pos, neg);
    }

    #[test]
    fn nan_equals_itself_bitwise() {
        assert_eq!(
            ConstantData::from(f64::NAN),
            ConstantData::from(f64::NAN)
        );
    }

    #[test]
    fn tuples_compare_recursively() {
        let a = ConstantData::Tuple {
            elements: vec![ConstantData::from(1i64), ConstantData::from(0.0f64)],
        };
        let b = ConstantData::Tuple {
            elements: vec![ConstantData::from(1i64), ConstantData::from(-0.0f64)],
        };
        let c = ConstantData::Tuple {
            elements: vec![ConstantData::from(1i64), ConstantData::from(0.0f64)],
        };
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
