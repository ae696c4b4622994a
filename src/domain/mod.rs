//! Domain types shared by the stores.

pub mod article;
pub mod catalog;
