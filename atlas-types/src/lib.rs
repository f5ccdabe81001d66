//! Data types shared by the atlas-rs crates

#![deny(missing_docs)]

/// Grouped index sets (feature types, observation groups)
pub mod label_class;

/// Feature-barcode count matrices
pub mod matrix;

/// Per-observation annotation tables
pub mod metadata;
