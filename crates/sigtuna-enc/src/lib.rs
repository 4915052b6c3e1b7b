#![forbid(unsafe_code)]

//! XML-Enc operations for the Sigtuna XML security layer.

pub mod context;
pub mod decrypt;
pub mod encrypt;

pub use context::EncContext;
