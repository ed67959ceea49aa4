//! Built-in email transformations applied before delivery.
//!
//! Currently provides click and open tracking injection.

pub mod tracking;

pub use tracking::*;
