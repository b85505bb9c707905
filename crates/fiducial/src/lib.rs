#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use fiducial_pnp as pnp;

#[doc(inline)]
pub use fiducial_tracking as tracking;
