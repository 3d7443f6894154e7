//! # tnp-core
//!
//! Shared types for tag-and-probe histogram production: the error type and
//! the declarative configuration model (channels, binning, systematic
//! variations) consumed by `tnp-hist`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;

pub use config::{
    BinSpec, ConfigFile, FillGroup, HistConfig, NOMINAL, Replacement, SampleKind, TnpConfig,
    VarType, Variation,
};
pub use error::{Error, Result};
