//! Response cache for a geocoding HTTP API.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
