//! SDTM to NONMEM dataset conversion library
//!
//! Converts CDISC SDTM domains (PC, EX, DM) into a NONMEM-format
//! pharmacokinetic event dataset, validates the result and computes
//! elementary non-compartmental PK parameters.

pub mod models;
pub mod parser;
pub mod dataset;
pub mod converter;
pub mod validation;
pub mod auc;
pub mod parameters;
pub mod nca;
pub mod population;
pub mod output;
pub mod errors;

pub use models::*;
pub use nca::*;
pub use errors::*;

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, ConversionError>;
