//! Rate Plan Common - Shared types for the rate plan wizard
//!
//! This crate provides the primitives every wizard component leans on:
//! - Money input parsing and canonical currency formatting
//! - Rate plan identifiers and client correlation tokens
//! - Wizard configuration
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod money;
pub mod value_objects;

pub use config::*;
pub use error::*;
pub use money::*;
pub use value_objects::*;
