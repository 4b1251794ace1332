#![forbid(unsafe_code)]

pub mod common;
pub mod identity;
pub mod media;
pub mod view;
pub mod violation;

pub use common::{ContractViolation, ReasonCodeId, Validate};
