//! Element-type traits. Contains [Unit] and [Dtype].
//!
//! When the `f16` feature is enabled, this exports the [f16] type.

#[cfg(feature = "f16")]
pub use half::f16;

/// Represents a unit type, but no arithmetic.
pub trait Unit:
    'static
    + Copy
    + Clone
    + Default
    + std::fmt::Debug
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + std::marker::Unpin
{
    const ONE: Self;
}

macro_rules! unit {
    ($type:ty, $one:expr) => {
        impl Unit for $type {
            const ONE: Self = $one;
        }
    };
}

unit!(f32, 1.0);
unit!(f64, 1.0);
#[cfg(feature = "f16")]
unit!(f16, f16::ONE);

/// A floating point element the pooling primitives are instantiated for.
///
/// Only the widths the backend actually implements are included; behavior
/// for other element types is deliberately left unspecified rather than
/// guessed at.
pub trait Dtype:
    Unit
    + std::ops::Add<Self, Output = Self>
    + std::ops::Div<Self, Output = Self>
    + std::ops::AddAssign
    + num_traits::Float
    + num_traits::FromPrimitive
{
}
impl Dtype for f32 {}
impl Dtype for f64 {}
#[cfg(feature = "f16")]
impl Dtype for f16 {}
