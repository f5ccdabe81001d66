use crate::normalization::Normalization;
use crate::qc::QcParams;
use anyhow::{bail, Context, Error};
use atlas_types::matrix::DEFAULT_FEATURE_TYPE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Which dataset the informative features are selected from
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSource {
    /// highly variable features of the reference
    Reference,
    /// highly variable features of the query
    Query,
}

/// Tunable settings of a comparison run. Every field has a default, so a params file only
/// needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineParams {
    /// QC applied to count datasets before aggregation
    pub qc: QcParams,
    /// normalization applied after QC
    pub normalization: Normalization,
    /// keep only features of this type; `None` keeps all
    pub feature_type: Option<String>,
    /// number of variable features used when no feature list is given; 0 uses every shared feature
    pub n_variable_features: usize,
    /// dataset the variable features come from
    pub variable_features_from: FeatureSource,
    /// minimum correlation for a cell-level label call
    pub min_correlation: f64,
    /// side of one heatmap block in pixels
    pub heatmap_cell_size: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        PipelineParams {
            qc: QcParams::default(),
            normalization: Normalization::SeuratLog,
            feature_type: Some(DEFAULT_FEATURE_TYPE.to_string()),
            n_variable_features: 2000,
            variable_features_from: FeatureSource::Reference,
            min_correlation: 0.0,
            heatmap_cell_size: 24,
        }
    }
}

impl PipelineParams {
    /// Read params from a JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<PipelineParams, Error> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let params: PipelineParams =
            serde_json::from_reader(BufReader::new(file)).with_context(|| path.display().to_string())?;
        params.validate()?;
        Ok(params)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), Error> {
        if self.heatmap_cell_size == 0 {
            bail!("heatmap_cell_size must be positive");
        }
        if !(-1.0..=1.0).contains(&self.min_correlation) {
            bail!("min_correlation must lie in [-1, 1], got {}", self.min_correlation);
        }
        if let Some(m) = self.qc.max_mito_fraction {
            if !(0.0..=1.0).contains(&m) {
                bail!("qc.max_mito_fraction must lie in [0, 1], got {}", m);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_json() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{"normalization": "cellranger", "qc": {"min_features_per_cell": 10}, "variable_features_from": "query"}"#,
        )?;
        let params = PipelineParams::from_json(&path)?;
        assert_eq!(params.normalization, Normalization::CellRanger);
        assert_eq!(params.qc.min_features_per_cell, 10);
        assert_eq!(params.qc.min_cells_per_feature, 3);
        assert_eq!(params.variable_features_from, FeatureSource::Query);
        assert_eq!(params.n_variable_features, 2000);
        assert_eq!(params.feature_type.as_deref(), Some("Gene Expression"));

        std::fs::write(&path, r#"{"heatmap_cell_size": 0}"#)?;
        assert!(PipelineParams::from_json(&path).is_err());
        std::fs::write(&path, r#"{"n_top": 5}"#)?;
        assert!(PipelineParams::from_json(&path).is_err());
        assert!(PipelineParams::from_json(dir.path().join("missing.json")).is_err());
        Ok(())
    }
}
