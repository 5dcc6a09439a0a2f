//! # haven-core
//!
//! Core types, traits, configuration, crisis detection, and error handling
//! for the Haven safety monitor.

pub mod clock;
pub mod config;
pub mod context;
pub mod crisis;
pub mod error;
pub mod message;
pub mod model;
pub mod traits;
