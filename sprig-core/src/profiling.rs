//! Scope timing forwarded to puffin when the `puffin` feature is enabled

#[doc(hidden)]
pub mod __private {
    #[cfg(feature = "puffin")]
    pub use puffin;
}

#[cfg(feature = "puffin")]
#[macro_export]
macro_rules! profile_function {
    ($($tt: tt)*) => {
        $crate::profiling::__private::puffin::profile_function!($($tt)*);
    };
}

#[cfg(feature = "puffin")]
#[macro_export]
macro_rules! profile_scope {
    ($($tt: tt)*) => {
        $crate::profiling::__private::puffin::profile_scope!($($tt)*);
    };
}

#[cfg(not(feature = "puffin"))]
#[macro_export]
macro_rules! profile_function {
    ($($tt: tt)*) => {};
}

#[cfg(not(feature = "puffin"))]
#[macro_export]
macro_rules! profile_scope {
    ($($tt: tt)*) => {};
}
