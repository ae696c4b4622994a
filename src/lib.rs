//! Resilient access layer for the Nebula blog API.
//!
//! Requests flow through [`infra::http::RequestPipeline`], which attaches the
//! stored credential and funnels expiry answers into a single-flight
//! [`auth::RefreshCoordinator`]. Responses are memoized by
//! [`cache::CacheManager`] instances that the article and catalog stores keep
//! consistent across optimistic updates.

pub mod application;
pub mod auth;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
