//! # atlas-rs: compare single cell datasets against a reference atlas

#![deny(missing_docs)]
#![deny(warnings)]

/// Group averaging of count matrices
pub mod aggregate;

/// Barcode alignment of counts and metadata
pub mod align;

/// Highly variable feature selection
pub mod features;

/// Heatmap rendering
pub mod heatmap;

/// Replicate merging
pub mod merge;

/// Per-barcode metadata tables
pub mod metadata;

/// MTX loading routine
pub mod mtx;

/// Count matrix normalization methods
pub mod normalization;

/// Run settings
pub mod params;

/// End-to-end comparison
pub mod pipeline;

/// Cell and feature quality control
pub mod qc;

/// Spearman similarity of group profiles
pub mod similarity;

pub mod stats;

/// Best matches and cell-level label transfer
pub mod transfer;
