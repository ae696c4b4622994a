//! Application services: response stores and the session wiring.

pub mod articles;
pub mod catalog;
pub mod context;
pub mod error;
