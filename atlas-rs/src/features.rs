//! Informative feature selection

use crate::mtx::open_text;
use anyhow::{Context, Error};
use atlas_types::matrix::FeatureBarcodeMatrix;
use log::info;
use ndarray::Array1;
use std::io::BufRead;
use std::path::Path;

/// Number of mean-expression bins used to normalize dispersions
pub const N_BINS: usize = 20;

/// Per-row mean and sample variance (ddof = 1) across the barcodes of a matrix
pub fn feature_mean_var(fbm: &FeatureBarcodeMatrix) -> (Array1<f64>, Array1<f64>) {
    let n = fbm.cols() as f64;
    let mut sums = Array1::<f64>::zeros(fbm.rows());
    let mut sq_sums = Array1::<f64>::zeros(fbm.rows());
    for col in fbm.matrix.outer_iterator() {
        for (r, &v) in col.iter() {
            sums[r] += v;
            sq_sums[r] += v * v;
        }
    }
    if fbm.cols() == 0 {
        return (sums, sq_sums);
    }
    let means = sums / n;
    let vars = if fbm.cols() < 2 {
        Array1::zeros(fbm.rows())
    } else {
        (&sq_sums - &(&means * &means * n)).mapv(|v| (v / (n - 1.0)).max(0.0))
    };
    (means, vars)
}

/// Dispersion z-scores: `ln(var / mean)` standardized within equal-width bins of mean
/// expression. Features with zero mean or variance get `None`. A bin with a single member or
/// no spread scores its members 0.
pub fn dispersion_scores(means: &Array1<f64>, vars: &Array1<f64>) -> Vec<Option<f64>> {
    let expressed = (0..means.len())
        .filter(|&i| means[i] > 0.0 && vars[i] > 0.0)
        .collect::<Vec<_>>();
    let mut scores = vec![None; means.len()];
    if expressed.is_empty() {
        return scores;
    }

    let lo = expressed.iter().map(|&i| means[i]).fold(f64::INFINITY, f64::min);
    let hi = expressed.iter().map(|&i| means[i]).fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / N_BINS as f64;
    let bin_of = |m: f64| {
        if width > 0.0 {
            (((m - lo) / width) as usize).min(N_BINS - 1)
        } else {
            0
        }
    };

    let mut bins: Vec<Vec<(usize, f64)>> = vec![Vec::new(); N_BINS];
    for &i in &expressed {
        bins[bin_of(means[i])].push((i, (vars[i] / means[i]).ln()));
    }
    for members in bins.iter().filter(|b| !b.is_empty()) {
        let k = members.len() as f64;
        let mu = members.iter().map(|m| m.1).sum::<f64>() / k;
        let sd = if members.len() > 1 {
            (members.iter().map(|m| (m.1 - mu).powi(2)).sum::<f64>() / (k - 1.0)).sqrt()
        } else {
            0.0
        };
        for &(i, d) in members {
            scores[i] = Some(if sd > 0.0 { (d - mu) / sd } else { 0.0 });
        }
    }
    scores
}

/// The `n_top` most variable features by binned dispersion, most variable first. Ties keep
/// matrix order.
pub fn select_variable_features(fbm: &FeatureBarcodeMatrix, n_top: usize) -> Vec<String> {
    let (means, vars) = feature_mean_var(fbm);
    let scores = dispersion_scores(&means, &vars);
    let mut ranked = scores
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|s| (i, s)))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let selected = ranked
        .into_iter()
        .take(n_top)
        .map(|(i, _)| fbm.feature_ids[i].clone())
        .collect::<Vec<_>>();
    info!(
        "{}: selected {} variable features out of {}",
        fbm.name,
        selected.len(),
        fbm.rows()
    );
    selected
}

/// Read a feature id list, one id per line (first tab- or comma-separated field). Blank lines
/// and `#` comments are skipped.
pub fn load_feature_list(path: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let path = path.as_ref();
    let mut ids = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let id = line.split(['\t', ',']).next().unwrap_or(line).trim();
        ids.push(id.to_string());
    }
    Ok(ids)
}
