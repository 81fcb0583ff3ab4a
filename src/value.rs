//! Numeric domains the engine is generic over.
//!
//! Every computation is written once against [`ValueType`]. What differs between domains is not
//! the arithmetic but which *algorithms* are meaningful:
//!
//! - transient analysis needs Poisson weights, i.e. `exp`, which only floating types provide,
//! - relative value iteration needs an ordered domain with a usable notion of "close enough",
//! - exact domains compare exactly and can be solved by elimination without round-off.
//!
//! These differences are surfaced as a [`Capabilities`] descriptor instead of compile-time
//! specialization, so queries can check (and report) what they need before doing any work.

use crate::{Error, Result};
use num::{BigRational, FromPrimitive, Num, Signed, ToPrimitive};
use std::fmt;

/// Which family of numbers a [`ValueType`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericDomain {
    /// Inexact floating point (`f64`).
    Floating,
    /// Exact rationals (`BigRational`).
    Exact,
    /// Symbolic values such as rational functions over model parameters.
    Parametric,
}

/// What a numeric domain supports, as far as the CSL algorithms are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Poisson weights / uniformization-based transient analysis.
    pub exponential: bool,
    /// Relative value iteration for long-run averages.
    pub value_iteration: bool,
    /// Comparisons are exact (no tolerance needed).
    pub exact_comparison: bool,
}

impl NumericDomain {
    pub const fn capabilities(self) -> Capabilities {
        match self {
            NumericDomain::Floating => Capabilities {
                exponential: true,
                value_iteration: true,
                exact_comparison: false,
            },
            NumericDomain::Exact => Capabilities {
                exponential: false,
                value_iteration: true,
                exact_comparison: true,
            },
            NumericDomain::Parametric => Capabilities {
                exponential: false,
                value_iteration: false,
                exact_comparison: false,
            },
        }
    }
}

/// A number type the engine can compute with.
///
/// Arithmetic is taken from `num-traits`; the only domain-specific knobs are the
/// [`NumericDomain`] tag and whether the type can represent an infinite value.
pub trait ValueType:
    Clone
    + Default
    + fmt::Debug
    + fmt::Display
    + PartialOrd
    + Num
    + Signed
    + FromPrimitive
    + ToPrimitive
    + Send
    + Sync
    + 'static
{
    const DOMAIN: NumericDomain;

    fn capabilities() -> Capabilities {
        Self::DOMAIN.capabilities()
    }

    /// Positive infinity, if the domain has one.
    fn infinity() -> Option<Self> {
        None
    }

    /// Floating approximation, used for convergence checks and logging only.
    fn approx(&self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl ValueType for f64 {
    const DOMAIN: NumericDomain = NumericDomain::Floating;

    fn infinity() -> Option<Self> {
        Some(f64::INFINITY)
    }

    fn approx(&self) -> f64 {
        *self
    }
}

impl ValueType for BigRational {
    const DOMAIN: NumericDomain = NumericDomain::Exact;
}

/// Convert an `f64` constant (precision, inflation factor, ...) into the domain.
pub fn convert<V: ValueType>(x: f64) -> Result<V> {
    V::from_f64(x).ok_or(Error::Domain("constant is not representable in this numeric domain"))
}

/// Convert a count (state-set size, ...) into the domain.
pub fn from_count<V: ValueType>(n: usize) -> Result<V> {
    V::from_usize(n).ok_or(Error::Domain("count is not representable in this numeric domain"))
}

pub(crate) fn max_value<V: ValueType>(a: V, b: V) -> V {
    if b > a {
        b
    } else {
        a
    }
}

pub(crate) fn min_value<V: ValueType>(a: V, b: V) -> V {
    if b < a {
        b
    } else {
        a
    }
}

/// `|new - old|` is within `precision`, relative to `|new|` when `relative` is set.
pub fn within_precision<V: ValueType>(old: &V, new: &V, precision: f64, relative: bool) -> bool {
    let diff = (new.clone() - old.clone()).abs();
    if diff.is_zero() {
        return true;
    }
    let diff = diff.approx();
    if relative && !new.is_zero() {
        diff <= precision * new.abs().approx()
    } else {
        diff <= precision
    }
}

/// Fail with [`Error::Unsupported`] unless `V` provides transient analysis.
pub(crate) fn require_exponential<V: ValueType>(operation: &'static str) -> Result<()> {
    if V::capabilities().exponential {
        Ok(())
    } else {
        Err(Error::Unsupported(operation))
    }
}

/// A stand-in for a symbolic number type: `f64` arithmetic tagged as
/// [`NumericDomain::Parametric`], so the capability checks can be exercised.
#[cfg(test)]
pub(crate) mod testing {
    use super::{NumericDomain, ValueType};
    use num::{FromPrimitive, Num, One, Signed, ToPrimitive, Zero};
    use std::fmt;
    use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

    #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
    pub struct Symbolic(pub f64);

    macro_rules! binop {
        ($trait:ident, $method:ident, $op:tt) => {
            impl $trait for Symbolic {
                type Output = Symbolic;
                fn $method(self, rhs: Symbolic) -> Symbolic {
                    Symbolic(self.0 $op rhs.0)
                }
            }
        };
    }

    binop!(Add, add, +);
    binop!(Sub, sub, -);
    binop!(Mul, mul, *);
    binop!(Div, div, /);
    binop!(Rem, rem, %);

    impl Neg for Symbolic {
        type Output = Symbolic;
        fn neg(self) -> Symbolic {
            Symbolic(-self.0)
        }
    }

    impl Zero for Symbolic {
        fn zero() -> Self {
            Symbolic(0.0)
        }
        fn is_zero(&self) -> bool {
            self.0 == 0.0
        }
    }

    impl One for Symbolic {
        fn one() -> Self {
            Symbolic(1.0)
        }
    }

    impl Num for Symbolic {
        type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
        fn from_str_radix(s: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
            f64::from_str_radix(s, radix).map(Symbolic)
        }
    }

    impl Signed for Symbolic {
        fn abs(&self) -> Self {
            Symbolic(self.0.abs())
        }
        fn abs_sub(&self, other: &Self) -> Self {
            Symbolic((self.0 - other.0).max(0.0))
        }
        fn signum(&self) -> Self {
            Symbolic(self.0.signum())
        }
        fn is_positive(&self) -> bool {
            self.0 > 0.0
        }
        fn is_negative(&self) -> bool {
            self.0 < 0.0
        }
    }

    impl FromPrimitive for Symbolic {
        fn from_i64(n: i64) -> Option<Self> {
            Some(Symbolic(n as f64))
        }
        fn from_u64(n: u64) -> Option<Self> {
            Some(Symbolic(n as f64))
        }
        fn from_f64(n: f64) -> Option<Self> {
            Some(Symbolic(n))
        }
    }

    impl ToPrimitive for Symbolic {
        fn to_i64(&self) -> Option<i64> {
            self.0.to_i64()
        }
        fn to_u64(&self) -> Option<u64> {
            self.0.to_u64()
        }
        fn to_f64(&self) -> Option<f64> {
            Some(self.0)
        }
    }

    impl fmt::Display for Symbolic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sym({})", self.0)
        }
    }

    impl ValueType for Symbolic {
        const DOMAIN: NumericDomain = NumericDomain::Parametric;
    }
}
