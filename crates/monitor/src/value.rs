//! Numeric coercion at the API edge
//!
//! Facade operations accept any primitive integer or float and convert it to
//! `f64` before it reaches the cache or the registry.

mod sealed {
    pub trait Sealed {}
}

/// Primitive numeric types accepted as metric values
pub trait Number: Copy + sealed::Sealed {
    /// Canonical floating representation
    fn to_f64(self) -> f64;
}

macro_rules! impl_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Number for $ty {
                #[inline]
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_number!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
