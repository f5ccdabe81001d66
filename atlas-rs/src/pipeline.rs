//! End-to-end comparison of a query dataset against a reference atlas

use crate::aggregate::{aggregate_pair, load_group_summary, GroupSummary};
use crate::align::{align, AlignedPair};
use crate::features::select_variable_features;
use crate::heatmap::write_heatmap;
use crate::merge::{merge_matrices, merge_metadata};
use crate::metadata::load_metadata;
use crate::mtx::load_feature_barcode_matrix;
use crate::normalization::normalize;
use crate::params::{FeatureSource, PipelineParams};
use crate::qc::filter_pair;
use crate::similarity::{spearman_similarity, SimilarityMatrix};
use crate::transfer::{best_matches, transfer_labels, write_best_matches, write_label_assignments, GroupMatch, LabelAssignment};
use anyhow::{bail, Context, Error};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Files making up one count dataset
#[derive(Clone, Debug)]
pub struct DatasetInput {
    /// dataset name used in logs and errors
    pub name: String,
    /// matrix directories; more than one are merged as replicates
    pub matrices: Vec<PathBuf>,
    /// barcode prefixes for the replicates, one per matrix directory
    pub sample_ids: Option<Vec<String>>,
    /// metadata tables, concatenated row-wise
    pub metadata: Vec<PathBuf>,
    /// metadata column holding the group labels
    pub label_column: String,
}

/// A reference given either as counts or as a precomputed group summary
#[derive(Clone, Debug)]
pub enum ReferenceInput {
    /// raw counts processed like the query
    Dataset(DatasetInput),
    /// per-group means, rows are features
    Summary {
        /// dataset name
        name: String,
        /// summary table
        path: PathBuf,
    },
}

/// A dataset after alignment, QC and normalization, with its group summary
#[derive(Clone, Debug)]
pub struct PreparedDataset {
    /// normalized counts aligned with the metadata
    pub pair: AlignedPair,
    /// per-group means of the normalized counts
    pub summary: GroupSummary,
}

/// Results of one comparison run
#[derive(Clone, Debug)]
pub struct Comparison {
    /// processed query
    pub query: PreparedDataset,
    /// processed reference, `None` when a summary file was given
    pub reference: Option<PreparedDataset>,
    /// reference group profiles
    pub reference_summary: GroupSummary,
    /// feature restriction used for the correlations, `None` for all shared features
    pub features: Option<Vec<String>>,
    /// query groups x reference groups
    pub similarity: SimilarityMatrix,
    /// best reference group per query group
    pub matches: Vec<GroupMatch>,
    /// cell-level calls, when requested
    pub cell_labels: Option<Vec<LabelAssignment>>,
}

fn load_counts(input: &DatasetInput) -> Result<AlignedPair, Error> {
    if input.matrices.is_empty() {
        bail!("{}: no matrix directory given", input.name);
    }
    if input.metadata.is_empty() {
        bail!("{}: no metadata table given", input.name);
    }

    let matrices = input
        .matrices
        .iter()
        .map(|dir| load_feature_barcode_matrix(dir, &input.name))
        .collect::<Result<Vec<_>, Error>>()?;
    let matrix = if matrices.len() == 1 && input.sample_ids.is_none() {
        matrices.into_iter().next().context("no matrix loaded")?
    } else {
        merge_matrices(&input.name, &matrices, input.sample_ids.as_deref())?
    };

    let tables = input.metadata.iter().map(load_metadata).collect::<Result<Vec<_>, Error>>()?;
    let metadata = if tables.len() == 1 {
        tables.into_iter().next().context("no metadata loaded")?
    } else {
        merge_metadata(&tables)?
    };
    // fail on a bad column name before any work is done
    metadata.column_index(&input.label_column)?;
    Ok(align(&matrix, &metadata))
}

/// Load, align, filter, normalize and aggregate one dataset
pub fn prepare_dataset(input: &DatasetInput, params: &PipelineParams) -> Result<PreparedDataset, Error> {
    let mut pair = load_counts(input)?;
    if let Some(feature_type) = &params.feature_type {
        let kept = pair.matrix.retain_feature_type(feature_type);
        if kept.rows() == 0 {
            warn!("{}: no features of type {}", input.name, feature_type);
        }
        pair = pair.with_matrix(kept)?;
    }
    let pair = filter_pair(&pair, &params.qc);
    let normalized = normalize(&pair.matrix, params.normalization)?;
    let pair = pair.with_matrix(normalized)?;
    let summary = aggregate_pair(&pair, &input.label_column)?;
    Ok(PreparedDataset { pair, summary })
}

/// Run the whole comparison. An explicit `features` list takes precedence over variable
/// feature selection.
pub fn run(
    query: &DatasetInput,
    reference: &ReferenceInput,
    features: Option<Vec<String>>,
    params: &PipelineParams,
    transfer: bool,
) -> Result<Comparison, Error> {
    params.validate()?;
    let query = prepare_dataset(query, params)?;
    let (reference, reference_summary) = match reference {
        ReferenceInput::Dataset(input) => {
            let prepared = prepare_dataset(input, params)?;
            let summary = prepared.summary.clone();
            (Some(prepared), summary)
        }
        ReferenceInput::Summary { name, path } => (None, load_group_summary(path, name)?),
    };

    let features = match features {
        Some(f) => Some(f),
        None if params.n_variable_features == 0 => None,
        None => {
            let source = match (params.variable_features_from, &reference) {
                (FeatureSource::Reference, Some(r)) => &r.pair.matrix,
                (FeatureSource::Reference, None) => {
                    info!("reference is a summary, selecting variable features from the query");
                    &query.pair.matrix
                }
                (FeatureSource::Query, _) => &query.pair.matrix,
            };
            Some(select_variable_features(source, params.n_variable_features))
        }
    };

    let similarity = spearman_similarity(&query.summary, &reference_summary, features.as_deref())?;
    let matches = best_matches(&similarity);
    let cell_labels = if transfer {
        Some(transfer_labels(
            &query.pair.matrix,
            &reference_summary,
            features.as_deref(),
            params.min_correlation,
        )?)
    } else {
        None
    };

    Ok(Comparison {
        query,
        reference,
        reference_summary,
        features,
        similarity,
        matches,
        cell_labels,
    })
}

/// Write `similarity.csv`, `similarity.png`, `best_matches.csv` and, with cell-level calls,
/// `cell_labels.csv` into `out_dir`
pub fn write_outputs(comparison: &Comparison, params: &PipelineParams, out_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    comparison.similarity.write_csv(out_dir.join("similarity.csv"))?;
    write_heatmap(&comparison.similarity, params.heatmap_cell_size, out_dir.join("similarity.png"))?;
    write_best_matches(out_dir.join("best_matches.csv"), &comparison.matches)?;
    if let Some(labels) = &comparison.cell_labels {
        write_label_assignments(out_dir.join("cell_labels.csv"), labels)?;
    }
    info!("wrote results to {}", out_dir.display());
    Ok(())
}
