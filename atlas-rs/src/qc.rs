use crate::align::AlignedPair;
use atlas_types::matrix::FeatureBarcodeMatrix;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Cell and feature quality-control thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcParams {
    /// Minimum number of detected features for a cell to be kept
    pub min_features_per_cell: usize,
    /// Maximum number of detected features (doublet guard)
    pub max_features_per_cell: Option<usize>,
    /// Minimum total count for a cell to be kept
    pub min_counts_per_cell: Option<f64>,
    /// Maximum fraction of counts from mitochondrial features
    pub max_mito_fraction: Option<f64>,
    /// Case-insensitive feature name prefix marking mitochondrial genes
    pub mito_prefix: String,
    /// Minimum number of cells a feature must be detected in to be kept
    pub min_cells_per_feature: usize,
}

impl Default for QcParams {
    fn default() -> Self {
        QcParams {
            min_features_per_cell: 200,
            max_features_per_cell: None,
            min_counts_per_cell: None,
            max_mito_fraction: Some(0.2),
            mito_prefix: "MT-".to_string(),
            min_cells_per_feature: 3,
        }
    }
}

/// Per-cell quality metrics, indexed like the matrix columns
#[derive(Clone, Debug, PartialEq)]
pub struct QcMetrics {
    /// Sum of counts
    pub total_counts: Vec<f64>,
    /// Number of features with a positive count
    pub detected_features: Vec<usize>,
    /// Fraction of counts from mitochondrial features, 0 for empty cells
    pub mito_fraction: Vec<f64>,
}

/// Compute per-cell metrics. Mitochondrial features are those whose name starts with
/// `mito_prefix`, ignoring case.
pub fn compute_qc_metrics(fbm: &FeatureBarcodeMatrix, mito_prefix: &str) -> QcMetrics {
    let prefix = mito_prefix.to_ascii_uppercase();
    let is_mito = fbm
        .feature_names
        .iter()
        .map(|n| !prefix.is_empty() && n.to_ascii_uppercase().starts_with(&prefix))
        .collect::<Vec<_>>();

    let mut metrics = QcMetrics {
        total_counts: Vec::with_capacity(fbm.cols()),
        detected_features: Vec::with_capacity(fbm.cols()),
        mito_fraction: Vec::with_capacity(fbm.cols()),
    };
    for col in fbm.matrix.outer_iterator() {
        let (mut total, mut mito, mut detected) = (0.0, 0.0, 0);
        for (r, &v) in col.iter() {
            total += v;
            if v > 0.0 {
                detected += 1;
            }
            if is_mito[r] {
                mito += v;
            }
        }
        metrics.total_counts.push(total);
        metrics.detected_features.push(detected);
        metrics.mito_fraction.push(if total > 0.0 { mito / total } else { 0.0 });
    }
    metrics
}

/// Indices of the cells passing every cell-level threshold
pub fn passing_cells(metrics: &QcMetrics, params: &QcParams) -> Vec<usize> {
    (0..metrics.total_counts.len())
        .filter(|&i| {
            let detected = metrics.detected_features[i];
            detected >= params.min_features_per_cell
                && params.max_features_per_cell.map_or(true, |m| detected <= m)
                && params.min_counts_per_cell.map_or(true, |m| metrics.total_counts[i] >= m)
                && params.max_mito_fraction.map_or(true, |m| metrics.mito_fraction[i] <= m)
        })
        .collect()
}

/// Indices of the features detected in at least `min_cells` cells
pub fn passing_features(fbm: &FeatureBarcodeMatrix, min_cells: usize) -> Vec<usize> {
    let mut cells_per_feature = vec![0usize; fbm.rows()];
    for col in fbm.matrix.outer_iterator() {
        for (r, &v) in col.iter() {
            if v > 0.0 {
                cells_per_feature[r] += 1;
            }
        }
    }
    (0..fbm.rows()).filter(|&r| cells_per_feature[r] >= min_cells).collect()
}

/// Apply the cell filter, then the feature filter on the surviving cells. Both structures of
/// the pair are filtered together so they stay aligned. When no cell survives, the feature rows
/// are kept as they are and only the cells are dropped.
pub fn filter_pair(pair: &AlignedPair, params: &QcParams) -> AlignedPair {
    let metrics = compute_qc_metrics(&pair.matrix, &params.mito_prefix);
    let cells = passing_cells(&metrics, params);
    let filtered = pair.select(&cells);
    let features = if filtered.is_empty() {
        warn!("{}: no cells left after QC, skipping the feature filter", pair.matrix.name);
        (0..filtered.matrix.rows()).collect::<Vec<_>>()
    } else {
        passing_features(&filtered.matrix, params.min_cells_per_feature)
    };
    info!(
        "{}: QC kept {} of {} cells and {} of {} features",
        pair.matrix.name,
        cells.len(),
        pair.len(),
        features.len(),
        pair.matrix.rows()
    );
    AlignedPair {
        matrix: filtered.matrix.select_features(&features),
        metadata: filtered.metadata,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::align;
    use atlas_types::metadata::MetadataTable;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(std::string::ToString::to_string).collect()
    }

    fn fixture() -> FeatureBarcodeMatrix {
        // rows: CD3E, mt-Co1, LYZ, RARE
        let dense = array![
            [5.0, 0.0, 2.0, 1.0],
            [1.0, 9.0, 0.0, 1.0],
            [4.0, 1.0, 3.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let mut fbm =
            FeatureBarcodeMatrix::from_dense("qc", strings(&["a", "b", "c", "d"]), strings(&["g1", "g2", "g3", "g4"]), dense.view())
                .unwrap();
        fbm.feature_names = strings(&["CD3E", "mt-Co1", "LYZ", "RARE"]);
        fbm
    }

    #[test]
    fn test_metrics() {
        let m = compute_qc_metrics(&fixture(), "MT-");
        assert_eq!(m.total_counts, vec![10.0, 10.0, 6.0, 2.0]);
        assert_eq!(m.detected_features, vec![3, 2, 3, 2]);
        assert_eq!(m.mito_fraction, vec![0.1, 0.9, 0.0, 0.5]);

        let no_mito = compute_qc_metrics(&fixture(), "");
        assert!(no_mito.mito_fraction.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_filters() {
        let fbm = fixture();
        let m = compute_qc_metrics(&fbm, "MT-");
        let params = QcParams {
            min_features_per_cell: 2,
            max_features_per_cell: Some(3),
            min_counts_per_cell: Some(5.0),
            max_mito_fraction: Some(0.5),
            mito_prefix: "MT-".to_string(),
            min_cells_per_feature: 2,
        };
        assert_eq!(passing_cells(&m, &params), vec![0, 2]);
        assert_eq!(passing_features(&fbm, 2), vec![0, 1, 2]);
        assert_eq!(passing_features(&fbm, 0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_filter_pair_keeps_alignment() {
        let fbm = fixture();
        let meta = MetadataTable::new(
            strings(&["d", "c", "b", "a"]),
            strings(&["cluster"]),
            vec![vec![Some("x".into())]; 4],
        )
        .unwrap();
        let pair = align(&fbm, &meta);
        let params = QcParams {
            min_features_per_cell: 3,
            min_cells_per_feature: 2,
            ..QcParams::default()
        };
        let filtered = filter_pair(&pair, &params);
        assert_eq!(filtered.matrix.barcodes, vec!["a", "c"]);
        assert_eq!(filtered.metadata.barcodes, filtered.matrix.barcodes);
        // RARE and mt-Co1 are detected in fewer than two kept cells
        assert_eq!(filtered.matrix.feature_names, vec!["CD3E", "LYZ"]);
        assert_eq!(filtered.matrix.to_dense(), array![[5.0, 2.0], [4.0, 3.0]]);

        // no cell has ten features: the cells go, the feature rows stay
        let strict = QcParams {
            min_features_per_cell: 10,
            ..QcParams::default()
        };
        let none_left = filter_pair(&pair, &strict);
        assert!(none_left.is_empty());
        assert!(none_left.metadata.is_empty());
        assert_eq!(none_left.matrix.cols(), 0);
        assert_eq!(none_left.matrix.feature_names, vec!["CD3E", "mt-Co1", "LYZ", "RARE"]);
    }
}
