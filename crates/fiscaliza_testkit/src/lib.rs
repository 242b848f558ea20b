//! # Fiscaliza Testkit
//!
//! Test utilities for Fiscaliza.
//!
//! This crate provides:
//! - Test fixtures and engine helpers
//! - A fault-injecting store for saga and cascade failure paths
//! - Property-based session generators using proptest
//! - An inspection harness checking the case invariants after every step
//! - Offline device helpers for replay tests
//!
//! ## Usage
//!
//! ```rust
//! use fiscaliza_testkit::prelude::*;
//!
//! with_temp_engine(|engine| {
//!     let (case, _units) = scenarios::chained_case(engine, 3);
//!     assert!(engine.validator().validate_case(&case.id).unwrap().is_clean());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
