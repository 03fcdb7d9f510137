//! # Civic Common Library
//!
//! Shared code for the campaign flyer intake service:
//! - Error type and result alias
//! - Bootstrap configuration loading (TOML, root folder resolution)
//! - Logging initialisation
//! - Database pool initialisation and schema
//! - UTC window arithmetic and injectable clocks
//! - Submitter identifier hashing

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
