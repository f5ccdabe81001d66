//! Rank correlation between the group profiles of two summaries

use crate::aggregate::GroupSummary;
use crate::stats::{is_constant, pearson, rank_average};
use anyhow::Context;
use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Failures of the similarity scorer that callers may want to distinguish
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// The restriction set and the two summaries have no feature in common
    #[error(
        "no shared features between {first} ({first_features} features) and {second} \
         ({second_features} features) within the {restriction} requested features"
    )]
    MissingSharedFeatures {
        /// name of the row dataset
        first: String,
        /// feature count of the row dataset
        first_features: usize,
        /// name of the column dataset
        second: String,
        /// feature count of the column dataset
        second_features: usize,
        /// size of the restriction set
        restriction: usize,
    },
}

/// Correlation of every group of one summary (rows) with every group of another (columns)
#[derive(Clone, Debug)]
pub struct SimilarityMatrix {
    /// name of the row dataset
    pub row_name: String,
    /// name of the column dataset
    pub col_name: String,
    /// group labels of the rows
    pub row_labels: Vec<String>,
    /// group labels of the columns
    pub col_labels: Vec<String>,
    /// shared features the correlations were computed over, sorted
    pub features: Vec<String>,
    /// Spearman correlations; NaN where undefined
    pub values: Array2<f64>,
}

impl SimilarityMatrix {
    /// Correlation between a row group and a column group
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let i = self.row_labels.iter().position(|l| l == row)?;
        let j = self.col_labels.iter().position(|l| l == col)?;
        Some(self.values[[i, j]])
    }

    /// True if either dimension is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write as CSV: a header of column labels, then one row per row label. NaN is written as
    /// `NA`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
        let mut header = vec![String::new()];
        header.extend(self.col_labels.iter().cloned());
        writer.write_record(&header)?;
        for (label, row) in self.row_labels.iter().zip(self.values.rows()) {
            let mut record = vec![label.clone()];
            record.extend(row.iter().map(|v| {
                if v.is_nan() {
                    "NA".to_string()
                } else {
                    format!("{v:.6}")
                }
            }));
            writer.write_record(&record)?;
        }
        writer.flush().with_context(|| path.display().to_string())?;
        Ok(())
    }
}

/// Features present in both summaries and, when given, in `restriction`, sorted
pub fn shared_features(a: &GroupSummary, b: &GroupSummary, restriction: Option<&[String]>) -> Vec<String> {
    shared_feature_ids(&a.feature_ids, &b.feature_ids, restriction)
}

/// Sorted intersection of two feature id lists, optionally restricted further
pub(crate) fn shared_feature_ids(a: &[String], b: &[String], restriction: Option<&[String]>) -> Vec<String> {
    let b = b.iter().map(String::as_str).collect::<BTreeSet<_>>();
    let restriction = restriction.map(|r| r.iter().map(String::as_str).collect::<BTreeSet<_>>());
    a.iter()
        .map(String::as_str)
        .filter(|f| b.contains(f))
        .filter(|f| restriction.as_ref().map_or(true, |r| r.contains(f)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Average ranks of one profile, or `None` when its correlation is undefined
pub(crate) fn rank_profile(profile: ArrayView1<f64>) -> Option<Array1<f64>> {
    if profile.len() < 2 || profile.iter().any(|v| v.is_nan()) || is_constant(&profile) {
        None
    } else {
        Some(rank_average(&profile))
    }
}

/// Pearson correlation of two rank vectors, NaN when undefined
pub(crate) fn pearson_or_nan(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    pearson(a.view(), b.view()).unwrap_or(f64::NAN)
}

/// Ranked group profiles of a summary over `features`, with a warning for each degenerate group
pub(crate) fn ranked_groups(summary: &GroupSummary, features: &[String]) -> Vec<Option<Array1<f64>>> {
    let index = summary.feature_index();
    let rows = features.iter().map(|f| index[f.as_str()]).collect::<Vec<_>>();
    summary
        .labels
        .iter()
        .enumerate()
        .map(|(j, label)| {
            let profile = rows.iter().map(|&r| summary.means[[r, j]]).collect::<Array1<f64>>();
            let ranks = rank_profile(profile.view());
            if ranks.is_none() {
                warn!(
                    "{}: group {} is constant, incomplete or too short over {} shared features; its correlations are NaN",
                    summary.name,
                    label,
                    features.len()
                );
            }
            ranks
        })
        .collect()
}

/// Spearman correlation of every group profile in `a` against every group profile in `b`,
/// computed over the sorted features shared by both summaries and `restriction`. A summary
/// without groups gives an empty matrix, whatever the features.
pub fn spearman_similarity(
    a: &GroupSummary,
    b: &GroupSummary,
    restriction: Option<&[String]>,
) -> Result<SimilarityMatrix, SimilarityError> {
    let features = shared_features(a, b, restriction);
    if a.is_empty() || b.is_empty() {
        warn!(
            "{} has {} groups and {} has {} groups, the similarity matrix is empty",
            a.name,
            a.len(),
            b.name,
            b.len()
        );
        return Ok(SimilarityMatrix {
            row_name: a.name.clone(),
            col_name: b.name.clone(),
            row_labels: a.labels.clone(),
            col_labels: b.labels.clone(),
            features,
            values: Array2::zeros((a.len(), b.len())),
        });
    }
    if features.is_empty() {
        return Err(SimilarityError::MissingSharedFeatures {
            first: a.name.clone(),
            first_features: a.feature_ids.len(),
            second: b.name.clone(),
            second_features: b.feature_ids.len(),
            restriction: restriction.map_or(0, <[String]>::len),
        });
    }
    info!(
        "correlating {} groups of {} with {} groups of {} over {} shared features",
        a.len(),
        a.name,
        b.len(),
        b.name,
        features.len()
    );

    let a_ranks = ranked_groups(a, &features);
    let b_ranks = ranked_groups(b, &features);
    let mut values = Array2::<f64>::from_elem((a.len(), b.len()), f64::NAN);
    for (i, ra) in a_ranks.iter().enumerate() {
        for (j, rb) in b_ranks.iter().enumerate() {
            if let (Some(ra), Some(rb)) = (ra, rb) {
                values[[i, j]] = pearson_or_nan(ra, rb);
            }
        }
    }

    Ok(SimilarityMatrix {
        row_name: a.name.clone(),
        col_name: b.name.clone(),
        row_labels: a.labels.clone(),
        col_labels: b.labels.clone(),
        features,
        values,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(std::string::ToString::to_string).collect()
    }

    fn summary(name: &str, features: &[&str], labels: &[&str], means: Array2<f64>) -> GroupSummary {
        GroupSummary::new(name.to_string(), strings(features), strings(labels), None, means).unwrap()
    }

    #[test]
    fn test_single_shared_profile() {
        let a = summary("query", &["f1", "f2", "f3"], &["X"], array![[1.0], [2.0], [3.0]]);
        let b = summary("reference", &["f1", "f2", "f3"], &["Y"], array![[1.0], [2.0], [3.0]]);
        let sim = spearman_similarity(&a, &b, None).unwrap();
        assert_eq!(sim.values.dim(), (1, 1));
        assert_approx_eq!(sim.get("X", "Y").unwrap(), 1.0);
        assert_eq!(sim.features, strings(&["f1", "f2", "f3"]));
    }

    #[test]
    fn test_self_similarity_diagonal() {
        let mut rng = Pcg64Mcg::seed_from_u64(42);
        let means = Array2::random_using((50, 4), Uniform::new(0.0, 10.0), &mut rng);
        let features = (0..50).map(|i| format!("f{i:02}")).collect::<Vec<_>>();
        let features = features.iter().map(String::as_str).collect::<Vec<_>>();
        let s = summary("self", &features, &["a", "b", "c", "d"], means);
        let sim = spearman_similarity(&s, &s, None).unwrap();
        for i in 0..4 {
            assert_approx_eq!(sim.values[[i, i]], 1.0);
        }
        for v in sim.values.iter() {
            assert!((-1.0..=1.0).contains(v));
        }
        assert_approx_eq!(sim.values[[0, 1]], sim.values[[1, 0]]);
    }

    #[test]
    fn test_feature_order_does_not_matter() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let names = (0..30).map(|i| format!("g{i}")).collect::<Vec<_>>();
        let a_means = Array2::random_using((30, 3), Uniform::new(0.0, 5.0), &mut rng);
        let b_means = Array2::random_using((30, 2), Uniform::new(0.0, 5.0), &mut rng);
        let a = GroupSummary::new("a".into(), names.clone(), strings(&["1", "2", "3"]), None, a_means.clone()).unwrap();
        let b = GroupSummary::new("b".into(), names.clone(), strings(&["p", "q"]), None, b_means).unwrap();

        // same data with rows of `a` shuffled
        let mut order = (0..30).collect::<Vec<_>>();
        order.shuffle(&mut rng);
        let shuffled_names = order.iter().map(|&i| names[i].clone()).collect();
        let shuffled = GroupSummary::new(
            "a".into(),
            shuffled_names,
            strings(&["1", "2", "3"]),
            None,
            a_means.select(ndarray::Axis(0), &order),
        )
        .unwrap();

        let mut restriction = names[..20].to_vec();
        let expected = spearman_similarity(&a, &b, Some(restriction.as_slice())).unwrap();
        restriction.reverse();
        let observed = spearman_similarity(&shuffled, &b, Some(restriction.as_slice())).unwrap();
        assert_eq!(expected.features.len(), 20);
        assert!(expected.values.abs_diff_eq(&observed.values, 1e-12));
    }

    #[test]
    fn test_degenerate_groups_are_nan() {
        let a = summary(
            "query",
            &["f1", "f2", "f3"],
            &["flat", "good", "missing"],
            array![[2.0, 1.0, 1.0], [2.0, 2.0, f64::NAN], [2.0, 3.0, 3.0]],
        );
        let b = summary("reference", &["f1", "f2", "f3"], &["Y"], array![[3.0], [2.0], [1.0]]);
        let sim = spearman_similarity(&a, &b, None).unwrap();
        assert!(sim.get("flat", "Y").unwrap().is_nan());
        assert!(sim.get("missing", "Y").unwrap().is_nan());
        assert_approx_eq!(sim.get("good", "Y").unwrap(), -1.0);

        // a single shared feature cannot be ranked
        let one = spearman_similarity(&a, &b, Some(strings(&["f2"]).as_slice())).unwrap();
        assert!(one.values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_no_shared_features() {
        let a = summary("query", &["f1", "f2"], &["X"], array![[1.0], [2.0]]);
        let b = summary("reference", &["f3", "f4", "f5"], &["Y"], array![[1.0], [2.0], [3.0]]);
        match spearman_similarity(&a, &b, None) {
            Err(SimilarityError::MissingSharedFeatures {
                first,
                first_features,
                second,
                second_features,
                ..
            }) => {
                assert_eq!((first.as_str(), first_features), ("query", 2));
                assert_eq!((second.as_str(), second_features), ("reference", 3));
            }
            other => panic!("expected MissingSharedFeatures, got {other:?}"),
        }

        let c = summary("reference", &["f1", "f2"], &["Y"], array![[1.0], [2.0]]);
        let err = spearman_similarity(&a, &c, Some(strings(&["f9"]).as_slice())).unwrap_err();
        assert!(err.to_string().contains("within the 1 requested features"));
    }

    #[test]
    fn test_empty_groups_and_csv() -> anyhow::Result<()> {
        let a = summary("query", &["f1", "f2"], &[], Array2::zeros((2, 0)));
        let b = summary("reference", &["f1", "f2"], &["Y"], array![[1.0], [2.0]]);
        let sim = spearman_similarity(&a, &b, None)?;
        assert!(sim.is_empty());
        assert_eq!(sim.values.dim(), (0, 1));
        assert_eq!(sim.col_labels, vec!["Y"]);

        // no groups on one side wins over no shared features
        let e = summary("query", &[], &[], Array2::zeros((0, 0)));
        let disjoint = spearman_similarity(&e, &b, Some(&[][..]))?;
        assert_eq!(disjoint.values.dim(), (0, 1));
        assert!(disjoint.features.is_empty());
        assert!(spearman_similarity(&b, &e, None)?.is_empty());

        let c = summary("query", &["f1", "f2", "f3"], &["X", "Z"], array![[1.0, 1.0], [2.0, 1.0], [3.0, 1.0]]);
        let d = summary("reference", &["f1", "f2", "f3"], &["Y"], array![[1.0], [2.0], [3.0]]);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("similarity.csv");
        spearman_similarity(&c, &d, None)?.write_csv(&path)?;
        assert_eq!(std::fs::read_to_string(&path)?, ",Y\nX,1.000000\nZ,NA\n");
        Ok(())
    }
}
