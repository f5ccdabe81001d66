use crate::stats::median_mut;
use anyhow::{bail, Error};
use atlas_types::matrix::FeatureBarcodeMatrix;
use log::info;
use ndarray::prelude::*;
use noisy_float::types::{n64, N64};
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::str::FromStr;

/// Normalization scheme for a feature-barcode count matrix
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Seurat style log normalization. Barcode count totals are scaled to 10,000 and the
    /// transformation `x -> ln(1 + x)` is applied
    SeuratLog,
    /// Cell Ranger style log normalization. Barcode count totals are scaled to the median
    /// and the transformation `x -> log2(1 + x)` is applied
    CellRanger,
    /// vanilla log 2, no scaling
    LogTransform,
    /// leave the values untouched
    None,
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seuratlog" => Ok(Normalization::SeuratLog),
            "cellranger" => Ok(Normalization::CellRanger),
            "logtransform" => Ok(Normalization::LogTransform),
            "none" => Ok(Normalization::None),
            _ => bail!("Normalization not recognized: {}", s),
        }
    }
}

/// Base of logarithm used by log_normalize
#[derive(Clone, Copy, Debug)]
pub enum LogBase {
    /// ln
    E,
    /// log2
    Two,
}

/// Column (barcode) totals of a CSC matrix
pub fn column_sums(matrix: &CsMat<f64>) -> Array1<f64> {
    matrix.outer_iterator().map(|col| col.data().iter().sum::<f64>()).collect()
}

/// Rebuild a CSC matrix with every stored value passed through `f(column, value)`
fn map_columns(matrix: &CsMat<f64>, f: impl Fn(usize, f64) -> f64) -> CsMat<f64> {
    let mut indptr = Vec::with_capacity(matrix.cols() + 1);
    let mut indices = Vec::with_capacity(matrix.nnz());
    let mut data = Vec::with_capacity(matrix.nnz());
    indptr.push(0);
    for (c, col) in matrix.outer_iterator().enumerate() {
        for (r, &v) in col.iter() {
            indices.push(r);
            data.push(f(c, v));
        }
        indptr.push(indices.len());
    }
    CsMat::new_csc(matrix.shape(), indptr, indices, data)
}

/// Normalize a feature-barcode matrix, returning a new matrix over the same features and barcodes
pub fn normalize(fbm: &FeatureBarcodeMatrix, norm: Normalization) -> Result<FeatureBarcodeMatrix, Error> {
    let matrix = match norm {
        Normalization::SeuratLog => log_normalize_with_size_factor(&fbm.matrix, Some(10_000_f64), LogBase::E, None)?,
        Normalization::CellRanger => log_normalize_with_size_factor(&fbm.matrix, None, LogBase::Two, None)?,
        Normalization::LogTransform => {
            // Size factor of all ones and target count of one implies that there is no scaling before taking the log
            let all_ones = Array1::<f64>::ones(fbm.cols());
            log_normalize_with_size_factor(&fbm.matrix, Some(1.0), LogBase::Two, Some(all_ones))?
        }
        Normalization::None => fbm.matrix.clone(),
    };
    info!("{}: normalized {} x {} matrix ({:?})", fbm.name, fbm.rows(), fbm.cols(), norm);
    Ok(FeatureBarcodeMatrix { matrix, ..fbm.clone() })
}

/// Log-normalize a CSC count matrix:
/// 1. Scale each column (barcode) to have the same total count given by `umi_count_sum`,
///    dividing by `size_factors[i]` for the i-th column. If `umi_count_sum` is `None`, use the
///    median column total; if `size_factors` is `None` use the column totals. Columns with a
///    zero size factor stay zero.
/// 2. Apply a transform `x -> log_b(1 + x)`, with `b` specified by `log_base`
pub fn log_normalize_with_size_factor(
    matrix: &CsMat<f64>,
    umi_count_sum: Option<f64>,
    log_base: LogBase,
    size_factors: Option<Array1<f64>>,
) -> Result<CsMat<f64>, Error> {
    if !matrix.is_csc() {
        bail!("log normalization expects a CSC matrix");
    }
    let umi_counts = column_sums(matrix);
    let normalization_counts = match size_factors {
        Some(x) => {
            if x.len() != matrix.cols() {
                bail!(
                    "Size of the size factor and matrix columns dont match. Size factor length {}; Matrix dimensions: {:?}",
                    x.len(),
                    matrix.shape()
                );
            }
            x
        }
        None => umi_counts.clone(),
    };
    let target_umi_count: f64 = match umi_count_sum {
        Some(x) => x,
        None => {
            // Scale to the median total count. median_mut reorders its argument.
            let mut totals: Array1<N64> = umi_counts.mapv_into(|x| if x.is_finite() { x } else { 0.0 }).mapv(n64);
            median_mut(&mut totals).map_or(1.0, |median: N64| median.raw().max(1.0))
        }
    };
    let col_scales = normalization_counts.mapv(|c| if c > 0.0 { target_umi_count / c } else { 0.0 });

    let log1p_fn = match log_base {
        LogBase::E => |x: f64| (x + 1.0).ln(),
        LogBase::Two => |x: f64| (x + 1.0).log2(),
    };
    Ok(map_columns(matrix, |c, v| log1p_fn(v * col_scales[c])))
}

#[cfg(test)]
mod test_normalization {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn test_matrix() -> FeatureBarcodeMatrix {
        let dense: Array2<f64> = array![
            [136., 936., 0., 0., 264.],
            [134., 682., 417., 8., 391.],
            [0., 133., 780., 0., 0.],
            [396., 76., 96., 198., 0.],
        ];
        let barcodes = (0..5).map(|i| format!("c{i}")).collect();
        let features = (0..4).map(|i| format!("g{i}")).collect();
        FeatureBarcodeMatrix::from_dense("test", barcodes, features, dense.view()).unwrap()
    }

    #[test]
    fn test_log_normalize_with_size_factor() -> Result<(), Error> {
        // # Python code to reconstruct this test
        // mat = np.array([[136, 936, 0, 0, 264],
        //     [134, 682, 417, 8, 391],
        //     [0, 133, 780, 0, 0],
        //     [396, 76, 96, 198, 0],
        // ])
        // features_picked = [0, 2]
        // scale_factor = 1 + mat[features_picked,:].sum(axis=0)
        // target_umi_count = np.median(mat.sum(axis=0))
        // half_processed_mat = mat.dot(np.diag(target_umi_count/scale_factor))
        // processed_mat = np.log2(1 + half_processed_mat)
        let expected_out_dense = array![
            [9.37098961, 9.18882221, 0., 0., 9.37609671],
            [9.34964848, 8.73300582, 8.4781546, 12.37964912, 9.94202202],
            [0., 6.3885887, 9.3796973, 0., 0.],
            [10.91145213, 5.59409085, 6.37267837, 17.00874593, 0.]
        ];
        let fbm = test_matrix();
        let size_factors = 1.0 + column_sums(&fbm.select_features(&[0, 2]).matrix);
        let processed = log_normalize_with_size_factor(&fbm.matrix, None, LogBase::Two, Some(size_factors))?;

        assert!(expected_out_dense.abs_diff_eq(&processed.to_dense(), 1e-6));
        Ok(())
    }

    #[test]
    fn test_seurat_and_cellranger() -> Result<(), Error> {
        let fbm = test_matrix();
        // column totals: 666, 1827, 1293, 206, 655; median 666
        let seurat = normalize(&fbm, Normalization::SeuratLog)?.to_dense();
        assert_approx_eq!(seurat[[0, 1]], (1.0 + 936.0 * 10_000.0 / 1827.0_f64).ln());
        assert_approx_eq!(seurat[[3, 3]], (1.0 + 198.0 * 10_000.0 / 206.0_f64).ln());
        assert_eq!(seurat[[2, 0]], 0.0);

        let cr = normalize(&fbm, Normalization::CellRanger)?.to_dense();
        assert_approx_eq!(cr[[1, 2]], (1.0 + 417.0 * 666.0 / 1293.0_f64).log2());

        let log = normalize(&fbm, Normalization::LogTransform)?.to_dense();
        assert_approx_eq!(log[[3, 0]], 397.0_f64.log2());

        let none = normalize(&fbm, Normalization::None)?;
        assert_eq!(none.to_dense(), fbm.to_dense());
        assert_eq!(none.barcodes, fbm.barcodes);
        Ok(())
    }

    #[test]
    fn test_empty_column_and_errors() -> Result<(), Error> {
        let dense = array![[0.0, 3.0], [0.0, 1.0]];
        let fbm = FeatureBarcodeMatrix::from_dense("z", vec!["a".into(), "b".into()], vec!["g".into(), "h".into()], dense.view())?;
        let norm = normalize(&fbm, Normalization::SeuratLog)?.to_dense();
        assert!(norm.iter().all(|v| v.is_finite()));
        assert_eq!(norm.column(0).sum(), 0.0);

        assert!(log_normalize_with_size_factor(&fbm.matrix, None, LogBase::E, Some(array![1.0])).is_err());
        assert!("binomial".parse::<Normalization>().is_err());
        assert_eq!("cellranger".parse::<Normalization>()?, Normalization::CellRanger);
        Ok(())
    }
}
