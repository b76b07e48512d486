//! Selector resolution engine - multi-strategy element location
//!
//! This crate implements the selector layer of the Webloom kernel:
//! - Versioned selector records with EMA-ranked variant history
//! - Four locator strategies (identifier, attribute, text, structural)
//! - Appear-wait resolution with success-rate-ordered fallback
//! - Snapshot-based disambiguation of multi-matches
//! - Self-healing that derives replacement variants from the last
//!   known element snapshot

pub mod errors;
pub mod healer;
pub mod model;
pub mod resolver;
pub mod strategies;

pub use errors::*;
pub use healer::*;
pub use model::*;
pub use resolver::*;
pub use strategies::*;
