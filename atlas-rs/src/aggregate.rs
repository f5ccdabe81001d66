use crate::align::AlignedPair;
use crate::metadata::read_delimited;
use anyhow::{bail, format_err, Context, Error};
use atlas_types::label_class::LabelClass;
use atlas_types::matrix::FeatureBarcodeMatrix;
use atlas_types::metadata::is_missing;
use itertools::Itertools;
use log::info;
use ndarray::{Array2, ArrayView1};
use std::collections::HashMap;
use std::path::Path;

/// Per-group mean expression: one column per label, one row per feature
#[derive(Clone, Debug, PartialEq)]
pub struct GroupSummary {
    /// dataset name, used in logs and error messages
    pub name: String,
    /// row identifiers of `means`
    pub feature_ids: Vec<String>,
    /// column identifiers of `means`, sorted
    pub labels: Vec<String>,
    /// number of observations behind each group, when known
    pub counts: Option<Vec<usize>>,
    /// features x groups
    pub means: Array2<f64>,
}

impl GroupSummary {
    /// Validate shapes and uniqueness of feature ids and labels
    pub fn new(
        name: String,
        feature_ids: Vec<String>,
        labels: Vec<String>,
        counts: Option<Vec<usize>>,
        means: Array2<f64>,
    ) -> Result<GroupSummary, Error> {
        if means.dim() != (feature_ids.len(), labels.len()) {
            bail!(
                "{}: means have shape {:?} but there are {} features and {} groups",
                name,
                means.dim(),
                feature_ids.len(),
                labels.len()
            );
        }
        if let Some(counts) = &counts {
            if counts.len() != labels.len() {
                bail!("{}: {} group sizes for {} groups", name, counts.len(), labels.len());
            }
        }
        if let Some(f) = feature_ids.iter().duplicates().next() {
            bail!("{}: duplicate feature id {}", name, f);
        }
        if let Some(l) = labels.iter().duplicates().next() {
            bail!("{}: duplicate group label {}", name, l);
        }
        Ok(GroupSummary {
            name,
            feature_ids,
            labels,
            counts,
            means,
        })
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if there are no groups
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Mean vector of one group
    pub fn get(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.labels.iter().position(|l| l == label)?;
        Some(self.means.column(j))
    }

    /// Map from feature id to row
    pub fn feature_index(&self) -> HashMap<&str, usize> {
        self.feature_ids.iter().enumerate().map(|(i, f)| (f.as_str(), i)).collect()
    }

    /// Write as a CSV with a `feature_id` column followed by one column per group
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
        let mut header = vec!["feature_id".to_string()];
        header.extend(self.labels.iter().cloned());
        writer.write_record(&header)?;
        for (i, feature) in self.feature_ids.iter().enumerate() {
            let mut record = vec![feature.clone()];
            record.extend(self.means.row(i).iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush().with_context(|| path.display().to_string())?;
        Ok(())
    }
}

/// Average the matrix columns of each labelled group. Missing labels are ignored. Per feature,
/// NaN observations are skipped; a group with no finite observation for a feature gets NaN.
pub fn aggregate<S: AsRef<str>>(fbm: &FeatureBarcodeMatrix, labels: &[Option<S>]) -> Result<GroupSummary, Error> {
    if labels.len() != fbm.cols() {
        bail!(
            "{}: {} labels for {} matrix columns",
            fbm.name,
            labels.len(),
            fbm.cols()
        );
    }
    let groups = LabelClass::from_observation_labels(labels);
    let mut means = Array2::<f64>::zeros((fbm.rows(), groups.len()));
    let mut counts = Vec::with_capacity(groups.len());

    for (j, (_, members)) in groups.iter().enumerate() {
        counts.push(members.len());
        let mut sums = vec![0.0; fbm.rows()];
        let mut nan_obs = vec![0usize; fbm.rows()];
        for &c in members {
            if let Some(col) = fbm.matrix.outer_view(c) {
                for (r, &v) in col.iter() {
                    if v.is_nan() {
                        nan_obs[r] += 1;
                    } else {
                        sums[r] += v;
                    }
                }
            }
        }
        for r in 0..fbm.rows() {
            let n = members.len() - nan_obs[r];
            means[[r, j]] = if n == 0 { f64::NAN } else { sums[r] / n as f64 };
        }
    }

    info!(
        "{}: aggregated {} observations into {} groups",
        fbm.name,
        labels.iter().filter(|l| l.is_some()).count(),
        groups.len()
    );
    GroupSummary::new(
        fbm.name.clone(),
        fbm.feature_ids.clone(),
        groups.labels.clone(),
        Some(counts),
        means,
    )
}

/// Aggregate an aligned pair by one of its metadata columns
pub fn aggregate_pair(pair: &AlignedPair, column: &str) -> Result<GroupSummary, Error> {
    let labels = pair.labels(column)?;
    aggregate(&pair.matrix, &labels)
}

/// Load a precomputed summary: rows are features, the first column holds feature ids and the
/// remaining columns are group labels. Missing-value tokens read as NaN.
pub fn load_group_summary(path: impl AsRef<Path>, name: &str) -> Result<GroupSummary, Error> {
    let path = path.as_ref();
    let table = read_delimited(path)?;
    let mut feature_ids = Vec::with_capacity(table.rows.len());
    let mut means = Array2::<f64>::zeros((table.rows.len(), table.columns.len()));
    for (i, (id, fields)) in table.rows.into_iter().enumerate() {
        for (j, field) in fields.iter().enumerate() {
            means[[i, j]] = if is_missing(field) {
                f64::NAN
            } else {
                field.parse::<f64>().map_err(|_| {
                    format_err!(
                        "{}: feature {} has non-numeric value '{}' for group {}",
                        path.display(),
                        id,
                        field,
                        table.columns[j]
                    )
                })?
            };
        }
        feature_ids.push(id);
    }

    // keep groups sorted like aggregate output
    let mut order = (0..table.columns.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| table.columns[a].cmp(&table.columns[b]));
    let labels = order.iter().map(|&j| table.columns[j].clone()).collect();
    let means = means.select(ndarray::Axis(1), &order);

    let summary = GroupSummary::new(name.to_string(), feature_ids, labels, None, means)
        .with_context(|| path.display().to_string())?;
    info!(
        "{}: loaded {} groups over {} features from {}",
        name,
        summary.len(),
        summary.feature_ids.len(),
        path.display()
    );
    Ok(summary)
}
