#![forbid(unsafe_code)]

//! XML-DSig operations for the Sigtuna XML security layer.

pub mod context;
pub mod sign;
pub mod verify;

pub use context::DsigContext;
pub use verify::{DsigStatus, VerifyOutcome};
