#![forbid(unsafe_code)]

//! Shared foundation for the Sigtuna XML security layer: the error type,
//! XML namespace constants and algorithm URI constants.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
