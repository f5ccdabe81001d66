use anyhow::{bail, format_err, Context, Error};
use atlas_types::label_class::make_labelclass_from_feature_type_vector;
use atlas_types::matrix::{FeatureBarcodeMatrix, DEFAULT_FEATURE_TYPE};
use flate2::bufread::MultiGzDecoder;
use log::info;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Open a text file for buffered reading, decompressing it if the name ends in `.gz`
pub fn open_text(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

fn parse_index(field: Option<&str>, what: &str, bound: usize) -> Result<usize, Error> {
    let idx = field.ok_or_else(|| format_err!("missing {}", what))?.parse::<usize>()?;
    if idx == 0 || idx > bound {
        bail!("{} {} out of range 1..={}", what, idx, bound);
    }
    Ok(idx - 1)
}

/// Load a sparse matrix in MatrixMarket coordinate format (plain or gzipped). Integer, real and
/// pattern files are accepted; the result is CSC.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CsMat<f64>, Error> {
    let path = path.as_ref();
    let mut reader = open_text(path)?;
    let mut line = String::new();
    let mut mat: Option<TriMat<f64>> = None;
    let mut pattern = false;
    let mut expected_nnz = 0;

    loop {
        line.clear();
        let sz = reader
            .read_line(&mut line)
            .with_context(|| path.display().to_string())?;
        if sz == 0 {
            break;
        }
        if line.starts_with("%%MatrixMarket") {
            let header = line.to_ascii_lowercase();
            if !header.contains("coordinate") {
                bail!("{}: only coordinate MatrixMarket files are supported", path.display());
            }
            pattern = header.contains("pattern");
            continue;
        }
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }

        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                expected_nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), expected_nnz));
            }
            Some(m) => {
                let row = parse_index(data.next(), "ROW", m.rows()).with_context(|| path.display().to_string())?;
                let col = parse_index(data.next(), "COL", m.cols()).with_context(|| path.display().to_string())?;
                let val = if pattern {
                    1.0
                } else {
                    data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<f64>()?
                };
                m.add_triplet(row, col, val);
            }
        }
    }

    let Some(matrix) = mat else { bail!("{}: no matrix found", path.display()) };
    if matrix.nnz() != expected_nnz {
        bail!(
            "{}: header declares {} entries but {} were read",
            path.display(),
            expected_nnz,
            matrix.nnz()
        );
    }
    Ok(matrix.to_csc())
}

/// Return the first of `names` (or its `.gz` variant) present in `dir`
fn find_file(dir: &Path, names: &[&str]) -> Result<PathBuf, Error> {
    for name in names {
        for candidate in [dir.join(name), dir.join(format!("{name}.gz"))] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    bail!("none of {:?} found in {}", names, dir.display())
}

fn read_tsv_lines(path: &Path) -> Result<Vec<Vec<String>>, Error> {
    let mut rows = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(line.split('\t').map(|f| f.trim().to_string()).collect());
    }
    Ok(rows)
}

/// Read a 10x `features.tsv` (id, name, type) or v2 `genes.tsv` (id, name)
pub fn load_features(path: impl AsRef<Path>) -> Result<(Vec<String>, Vec<String>, Vec<String>), Error> {
    let rows = read_tsv_lines(path.as_ref())?;
    let mut ids = Vec::with_capacity(rows.len());
    let mut names = Vec::with_capacity(rows.len());
    let mut types = Vec::with_capacity(rows.len());
    for mut row in rows {
        let id = row.remove(0);
        names.push(row.first().cloned().unwrap_or_else(|| id.clone()));
        types.push(row.get(1).cloned().unwrap_or_else(|| DEFAULT_FEATURE_TYPE.to_string()));
        ids.push(id);
    }
    Ok((ids, names, types))
}

/// Read a barcodes file, one barcode per line
pub fn load_barcodes(path: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    Ok(read_tsv_lines(path.as_ref())?
        .into_iter()
        .map(|mut row| row.remove(0))
        .collect())
}

/// Load a 10x feature-barcode matrix directory holding `matrix.mtx`, `features.tsv` (or
/// `genes.tsv`) and `barcodes.tsv`, each optionally gzipped.
pub fn load_feature_barcode_matrix(dir: impl AsRef<Path>, name: &str) -> Result<FeatureBarcodeMatrix, Error> {
    let dir = dir.as_ref();
    let matrix = load_mtx(find_file(dir, &["matrix.mtx"])?)?;
    let (feature_ids, feature_names, types) = load_features(find_file(dir, &["features.tsv", "genes.tsv"])?)?;
    let barcodes = load_barcodes(find_file(dir, &["barcodes.tsv"])?)?;
    info!(
        "loaded {} x {} matrix with {} non-zeros from {}",
        matrix.rows(),
        matrix.cols(),
        matrix.nnz(),
        dir.display()
    );

    let feature_types = make_labelclass_from_feature_type_vector(&types).with_context(|| dir.display().to_string())?;
    FeatureBarcodeMatrix::new(
        name.to_string(),
        barcodes,
        feature_ids,
        feature_names,
        feature_types,
        matrix,
    )
    .with_context(|| dir.display().to_string())
}
