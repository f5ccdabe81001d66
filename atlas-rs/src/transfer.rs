//! Best-match calls at the group and the cell level

use crate::aggregate::GroupSummary;
use crate::similarity::{pearson_or_nan, rank_profile, ranked_groups, shared_feature_ids, SimilarityError, SimilarityMatrix};
use anyhow::{Context, Error};
use atlas_types::matrix::FeatureBarcodeMatrix;
use log::{info, warn};
use ndarray::{Array1, ArrayView1};
use ndarray_stats::QuantileExt;
use std::path::Path;

/// Best reference group for one query group
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMatch {
    /// query group label
    pub label: String,
    /// best scoring reference group, `None` when every correlation is NaN
    pub best: Option<String>,
    /// correlation with `best`, NaN when there is none
    pub correlation: f64,
    /// difference to the second best correlation, NaN without a runner-up
    pub margin: f64,
}

/// Label call for one query cell
#[derive(Clone, Debug, PartialEq)]
pub struct LabelAssignment {
    /// cell barcode
    pub barcode: String,
    /// assigned reference label, `None` when the cell could not be called
    pub label: Option<String>,
    /// best correlation found, NaN when the cell profile is degenerate
    pub correlation: f64,
}

/// Index of the largest non-NaN value and the margin to the runner-up
fn best_and_margin(values: ArrayView1<f64>) -> Option<(usize, f64)> {
    let best = values.argmax_skipnan().ok()?;
    let runner_up = values
        .iter()
        .enumerate()
        .filter(|&(j, v)| j != best && !v.is_nan())
        .map(|(_, &v)| v)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
    Some((best, runner_up.map_or(f64::NAN, |r| values[best] - r)))
}

/// For every row group of a similarity matrix, the column group with the highest correlation
pub fn best_matches(sim: &SimilarityMatrix) -> Vec<GroupMatch> {
    sim.row_labels
        .iter()
        .zip(sim.values.rows())
        .map(|(label, row)| match best_and_margin(row) {
            Some((j, margin)) => GroupMatch {
                label: label.clone(),
                best: Some(sim.col_labels[j].clone()),
                correlation: row[j],
                margin,
            },
            None => GroupMatch {
                label: label.clone(),
                best: None,
                correlation: f64::NAN,
                margin: f64::NAN,
            },
        })
        .collect()
}

/// Correlate each cell of `fbm` with every reference group over the sorted shared features and
/// assign the best group when its correlation reaches `min_correlation`.
pub fn transfer_labels(
    fbm: &FeatureBarcodeMatrix,
    reference: &GroupSummary,
    restriction: Option<&[String]>,
    min_correlation: f64,
) -> Result<Vec<LabelAssignment>, SimilarityError> {
    if fbm.cols() == 0 || reference.is_empty() {
        warn!(
            "{}: {} cells against {} reference groups, no labels to assign",
            fbm.name,
            fbm.cols(),
            reference.len()
        );
        return Ok(fbm
            .barcodes
            .iter()
            .map(|barcode| LabelAssignment {
                barcode: barcode.clone(),
                label: None,
                correlation: f64::NAN,
            })
            .collect());
    }
    let features = shared_feature_ids(&fbm.feature_ids, &reference.feature_ids, restriction);
    if features.is_empty() {
        return Err(SimilarityError::MissingSharedFeatures {
            first: fbm.name.clone(),
            first_features: fbm.rows(),
            second: reference.name.clone(),
            second_features: reference.feature_ids.len(),
            restriction: restriction.map_or(0, <[String]>::len),
        });
    }

    // matrix row -> position in the shared feature list
    let feature_index = fbm.feature_index();
    let mut position = vec![None; fbm.rows()];
    for (k, f) in features.iter().enumerate() {
        position[feature_index[f.as_str()]] = Some(k);
    }
    let reference_ranks = ranked_groups(reference, &features);

    let mut assignments = Vec::with_capacity(fbm.cols());
    for (barcode, col) in fbm.barcodes.iter().zip(fbm.matrix.outer_iterator()) {
        let mut profile = Array1::<f64>::zeros(features.len());
        for (r, &v) in col.iter() {
            if let Some(k) = position[r] {
                profile[k] = v;
            }
        }
        let correlations = match rank_profile(profile.view()) {
            Some(ranks) => reference_ranks
                .iter()
                .map(|rr| rr.as_ref().map_or(f64::NAN, |rr| pearson_or_nan(&ranks, rr)))
                .collect::<Array1<f64>>(),
            None => Array1::from_elem(reference.len(), f64::NAN),
        };
        let assignment = match correlations.argmax_skipnan() {
            Ok(j) => LabelAssignment {
                barcode: barcode.clone(),
                label: (correlations[j] >= min_correlation).then(|| reference.labels[j].clone()),
                correlation: correlations[j],
            },
            Err(_) => LabelAssignment {
                barcode: barcode.clone(),
                label: None,
                correlation: f64::NAN,
            },
        };
        assignments.push(assignment);
    }

    info!(
        "{}: assigned reference labels to {} of {} cells over {} shared features",
        fbm.name,
        assignments.iter().filter(|a| a.label.is_some()).count(),
        assignments.len(),
        features.len()
    );
    Ok(assignments)
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{v:.6}")
    }
}

/// Write group matches as CSV with columns `group,best_match,correlation,margin`
pub fn write_best_matches(path: impl AsRef<Path>, matches: &[GroupMatch]) -> Result<(), Error> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
    writer.write_record(["group", "best_match", "correlation", "margin"])?;
    for m in matches {
        writer.write_record([
            m.label.as_str(),
            m.best.as_deref().unwrap_or("NA"),
            format_value(m.correlation).as_str(),
            format_value(m.margin).as_str(),
        ])?;
    }
    writer.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

/// Write cell label calls as CSV with columns `barcode,label,correlation`
pub fn write_label_assignments(path: impl AsRef<Path>, assignments: &[LabelAssignment]) -> Result<(), Error> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
    writer.write_record(["barcode", "label", "correlation"])?;
    for a in assignments {
        writer.write_record([
            a.barcode.as_str(),
            a.label.as_deref().unwrap_or("NA"),
            format_value(a.correlation).as_str(),
        ])?;
    }
    writer.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{array, Array2};

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(std::string::ToString::to_string).collect()
    }

    fn sim(values: Array2<f64>, rows: &[&str], cols: &[&str]) -> SimilarityMatrix {
        SimilarityMatrix {
            row_name: "query".into(),
            col_name: "reference".into(),
            row_labels: strings(rows),
            col_labels: strings(cols),
            features: vec![],
            values,
        }
    }

    #[test]
    fn test_best_matches() {
        let s = sim(
            array![[0.9, 0.2, f64::NAN], [f64::NAN, f64::NAN, f64::NAN], [0.1, f64::NAN, 0.4]],
            &["0", "1", "2"],
            &["T", "B", "Mono"],
        );
        let m = best_matches(&s);
        assert_eq!(m[0].best.as_deref(), Some("T"));
        assert!((m[0].margin - 0.7).abs() < 1e-12);
        assert_eq!(m[1].best, None);
        assert!(m[1].correlation.is_nan());
        assert_eq!(m[2].best.as_deref(), Some("Mono"));
        assert!((m[2].margin - 0.3).abs() < 1e-12);

        let single = best_matches(&sim(array![[0.5]], &["0"], &["T"]));
        assert_eq!(single[0].correlation, 0.5);
        assert!(single[0].margin.is_nan());
    }

    #[test]
    fn test_transfer_labels() -> Result<(), Error> {
        let reference = GroupSummary::new(
            "reference".into(),
            strings(&["f1", "f2", "f3", "f4"]),
            strings(&["rising", "falling"]),
            None,
            array![[1.0, 4.0], [2.0, 3.0], [3.0, 2.0], [4.0, 1.0]],
        )?;
        // f5 is query-only; the last cell is empty
        let query = FeatureBarcodeMatrix::from_dense(
            "query",
            strings(&["c1", "c2", "c3", "c4"]),
            strings(&["f5", "f1", "f2", "f3", "f4"]),
            array![
                [9.0, 9.0, 9.0, 0.0],
                [0.0, 7.0, 1.0, 0.0],
                [1.0, 5.0, 2.0, 0.0],
                [2.0, 3.0, 1.0, 0.0],
                [5.0, 1.0, 2.0, 0.0]
            ]
            .view(),
        )?;
        let calls = transfer_labels(&query, &reference, None, 0.5)?;
        assert_eq!(calls[0].label.as_deref(), Some("rising"));
        assert_approx_eq!(calls[0].correlation, 1.0);
        assert_eq!(calls[1].label.as_deref(), Some("falling"));
        // c3 ranks as [1.5, 3.5, 1.5, 3.5], weakly correlated with both groups
        assert_eq!(calls[2].label, None);
        assert!(calls[2].correlation.abs() < 0.5);
        assert_eq!(calls[3].label, None);
        assert!(calls[3].correlation.is_nan());

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cell_labels.csv");
        write_label_assignments(&path, &calls)?;
        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("barcode,label,correlation\nc1,rising,1.000000\n"));
        assert!(text.ends_with("c4,NA,NA\n"));

        assert!(transfer_labels(&query, &reference, Some(strings(&["f5"]).as_slice()), 0.0).is_err());

        // nothing to call on either side
        let no_cells = query.select_barcodes(&[]);
        assert!(transfer_labels(&no_cells, &reference, Some(&[][..]), 0.0)?.is_empty());
        let no_groups = GroupSummary::new("reference".into(), strings(&["f1"]), vec![], None, Array2::zeros((1, 0)))?;
        let uncalled = transfer_labels(&query, &no_groups, None, 0.0)?;
        assert_eq!(uncalled.len(), 4);
        assert!(uncalled.iter().all(|a| a.label.is_none() && a.correlation.is_nan()));
        Ok(())
    }
}
