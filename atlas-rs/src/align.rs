use anyhow::{bail, Error};
use atlas_types::matrix::FeatureBarcodeMatrix;
use atlas_types::metadata::MetadataTable;
use log::{info, warn};
use std::collections::BTreeSet;

/// A count matrix and a metadata table restricted to the same barcodes, in the same order:
/// `matrix.barcodes == metadata.barcodes`.
#[derive(Clone, Debug)]
pub struct AlignedPair {
    /// Counts, one column per shared barcode
    pub matrix: FeatureBarcodeMatrix,
    /// Annotations, one row per shared barcode
    pub metadata: MetadataTable,
}

impl AlignedPair {
    /// Number of shared barcodes
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    /// True if no barcodes are shared
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Keep the given barcode positions in both structures
    pub fn select(&self, cols: &[usize]) -> AlignedPair {
        AlignedPair {
            matrix: self.matrix.select_barcodes(cols),
            metadata: self.metadata.select_rows(cols),
        }
    }

    /// Swap in a transformed matrix (normalized, feature-filtered) over the same barcodes
    pub fn with_matrix(self, matrix: FeatureBarcodeMatrix) -> Result<AlignedPair, Error> {
        if matrix.barcodes != self.metadata.barcodes {
            bail!("{}: replacement matrix barcodes differ from the aligned metadata", matrix.name);
        }
        Ok(AlignedPair {
            matrix,
            metadata: self.metadata,
        })
    }

    /// Group labels for every barcode, from a metadata column
    pub fn labels(&self, column: &str) -> Result<Vec<Option<String>>, Error> {
        self.metadata.labels(column)
    }
}

/// Restrict a matrix and a metadata table to their shared barcodes, both in lexicographic
/// barcode order. A disjoint pair is not an error: both outputs are empty and a warning is logged.
pub fn align(matrix: &FeatureBarcodeMatrix, metadata: &MetadataTable) -> AlignedPair {
    let matrix_index = matrix.barcode_index();
    let metadata_index = metadata.barcode_index();
    let shared = matrix_index
        .keys()
        .filter(|b| metadata_index.contains_key(*b))
        .copied()
        .collect::<BTreeSet<&str>>();

    if shared.is_empty() {
        warn!(
            "{}: none of the {} matrix barcodes appear among the {} metadata rows",
            matrix.name,
            matrix.cols(),
            metadata.len()
        );
    } else {
        info!(
            "{}: aligned {} barcodes ({} matrix columns, {} metadata rows)",
            matrix.name,
            shared.len(),
            matrix.cols(),
            metadata.len()
        );
    }

    let cols = shared.iter().map(|b| matrix_index[b]).collect::<Vec<_>>();
    let rows = shared.iter().map(|b| metadata_index[b]).collect::<Vec<_>>();
    AlignedPair {
        matrix: matrix.select_barcodes(&cols),
        metadata: metadata.select_rows(&rows),
    }
}
