use anyhow::{bail, Error};
use ndarray::{Array2, ArrayView2};
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};

use crate::label_class::{make_labelclass_from_feature_type_vector, LabelClass};

/// Storage for count values: compressed sparse column, one column per barcode
pub type CountMatrixType = CsMat<f64>;

/// Feature type assigned when a features file has no type column
pub const DEFAULT_FEATURE_TYPE: &str = "Gene Expression";

/// A features x barcodes count matrix together with its row and column identifiers
#[derive(Clone, Debug)]
pub struct FeatureBarcodeMatrix {
    /// Dataset name, used in logs and error messages
    pub name: String,
    /// Column identifiers
    pub barcodes: Vec<String>,
    /// Row identifiers
    pub feature_ids: Vec<String>,
    /// Row display names (gene symbols)
    pub feature_names: Vec<String>,
    /// Feature type blocks over the rows
    pub feature_types: LabelClass,
    /// Counts, always CSC
    pub matrix: CountMatrixType,
}

fn check_unique(kind: &str, name: &str, ids: &[String]) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            bail!("duplicate {} '{}' in {}", kind, id, name);
        }
    }
    Ok(())
}

impl FeatureBarcodeMatrix {
    /// Assemble a matrix, validating dimensions and identifier uniqueness. CSR input is converted to CSC.
    pub fn new(
        name: String,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        feature_types: LabelClass,
        matrix: CountMatrixType,
    ) -> Result<FeatureBarcodeMatrix, Error> {
        let (rows, cols) = matrix.shape();
        if rows != feature_ids.len() || rows != feature_names.len() {
            bail!(
                "{}: matrix has {} rows but {} feature ids and {} feature names",
                name,
                rows,
                feature_ids.len(),
                feature_names.len()
            );
        }
        if cols != barcodes.len() {
            bail!("{}: matrix has {} columns but {} barcodes", name, cols, barcodes.len());
        }
        check_unique("barcode", &name, &barcodes)?;
        check_unique("feature id", &name, &feature_ids)?;
        let matrix = if matrix.is_csr() { matrix.to_csc() } else { matrix };
        Ok(FeatureBarcodeMatrix {
            name,
            barcodes,
            feature_ids,
            feature_names,
            feature_types,
            matrix,
        })
    }

    /// Build a matrix of a single feature type from dense values (rows = features). Feature
    /// names are set to the feature ids.
    pub fn from_dense(
        name: &str,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        values: ArrayView2<f64>,
    ) -> Result<FeatureBarcodeMatrix, Error> {
        let mut tri = TriMat::new(values.dim());
        for ((r, c), &v) in values.indexed_iter() {
            if v != 0.0 {
                tri.add_triplet(r, c, v);
            }
        }
        let types = vec![DEFAULT_FEATURE_TYPE.to_string(); feature_ids.len()];
        let feature_types = if types.is_empty() {
            LabelClass::default()
        } else {
            make_labelclass_from_feature_type_vector(&types)?
        };
        FeatureBarcodeMatrix::new(
            name.to_string(),
            barcodes,
            feature_ids.clone(),
            feature_ids,
            feature_types,
            tri.to_csc(),
        )
    }

    /// Number of features
    pub fn rows(&self) -> usize {
        self.matrix.rows()
    }

    /// Number of barcodes
    pub fn cols(&self) -> usize {
        self.matrix.cols()
    }

    /// Number of stored non-zero values
    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    /// Dense copy of the counts
    pub fn to_dense(&self) -> Array2<f64> {
        self.matrix.to_dense()
    }

    /// Map from barcode to column index
    pub fn barcode_index(&self) -> HashMap<&str, usize> {
        self.barcodes.iter().enumerate().map(|(i, b)| (b.as_str(), i)).collect()
    }

    /// Map from feature id to row index
    pub fn feature_index(&self) -> HashMap<&str, usize> {
        self.feature_ids.iter().enumerate().map(|(i, f)| (f.as_str(), i)).collect()
    }

    /// Feature type of every row, expanded from the `LabelClass`
    pub fn feature_type_vector(&self) -> Vec<String> {
        let mut types = vec![DEFAULT_FEATURE_TYPE.to_string(); self.rows()];
        for (label, members) in self.feature_types.iter() {
            for &i in members {
                if i < types.len() {
                    types[i] = label.to_string();
                }
            }
        }
        types
    }

    /// New matrix holding the given columns, in the given order
    pub fn select_barcodes(&self, cols: &[usize]) -> FeatureBarcodeMatrix {
        let mut indptr = Vec::with_capacity(cols.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for &c in cols {
            if let Some(col) = self.matrix.outer_view(c) {
                for (r, &v) in col.iter() {
                    indices.push(r);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }

        FeatureBarcodeMatrix {
            name: self.name.clone(),
            barcodes: cols.iter().map(|&c| self.barcodes[c].clone()).collect(),
            feature_ids: self.feature_ids.clone(),
            feature_names: self.feature_names.clone(),
            feature_types: self.feature_types.clone(),
            matrix: CsMat::new_csc((self.rows(), cols.len()), indptr, indices, data),
        }
    }

    /// New matrix holding the given rows, in the given order. Row indices must be distinct.
    pub fn select_features(&self, rows: &[usize]) -> FeatureBarcodeMatrix {
        let mut new_index = vec![None; self.rows()];
        for (new, &old) in rows.iter().enumerate() {
            new_index[old] = Some(new);
        }

        let mut indptr = Vec::with_capacity(self.cols() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        let mut entries: Vec<(usize, f64)> = Vec::new();
        indptr.push(0);
        for col in self.matrix.outer_iterator() {
            entries.clear();
            entries.extend(col.iter().filter_map(|(r, &v)| new_index[r].map(|n| (n, v))));
            entries.sort_unstable_by_key(|e| e.0);
            for &(r, v) in &entries {
                indices.push(r);
                data.push(v);
            }
            indptr.push(indices.len());
        }

        let types = self.feature_type_vector();
        let selected_types = rows.iter().map(|&r| types[r].clone()).collect::<Vec<_>>();
        let feature_types = make_labelclass_from_feature_type_vector(&selected_types).unwrap_or_default();

        FeatureBarcodeMatrix {
            name: self.name.clone(),
            barcodes: self.barcodes.clone(),
            feature_ids: rows.iter().map(|&r| self.feature_ids[r].clone()).collect(),
            feature_names: rows.iter().map(|&r| self.feature_names[r].clone()).collect(),
            feature_types,
            matrix: CsMat::new_csc((rows.len(), self.cols()), indptr, indices, data),
        }
    }

    /// Keep only the features whose type contains `feature_type`
    pub fn retain_feature_type(&self, feature_type: &str) -> FeatureBarcodeMatrix {
        let removed = self.feature_types.clone().remove_unlike(feature_type);
        let keep = (0..self.rows()).filter(|r| !removed.contains(r)).collect::<Vec<_>>();
        self.select_features(&keep)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_select() -> Result<(), Error> {
        let dense = array![[1.0, 0.0, 2.0], [0.0, 0.0, 3.0], [4.0, 5.0, 0.0]];
        let fbm = FeatureBarcodeMatrix::from_dense("m", ids("c", 3), ids("g", 3), dense.view())?;
        assert_eq!(fbm.nnz(), 5);

        let cols = fbm.select_barcodes(&[2, 0]);
        assert_eq!(cols.barcodes, vec!["c2", "c0"]);
        assert_eq!(cols.to_dense(), array![[2.0, 1.0], [3.0, 0.0], [0.0, 4.0]]);

        let rows = fbm.select_features(&[2, 0]);
        assert_eq!(rows.feature_ids, vec!["g2", "g0"]);
        assert_eq!(rows.to_dense(), array![[4.0, 5.0, 0.0], [1.0, 0.0, 2.0]]);
        assert_eq!(rows.feature_type_vector(), vec![DEFAULT_FEATURE_TYPE; 2]);

        let none = fbm.select_barcodes(&[]);
        assert_eq!(none.cols(), 0);
        assert_eq!(none.rows(), 3);
        Ok(())
    }

    #[test]
    fn test_validation() {
        let dense = array![[1.0, 0.0], [0.0, 2.0]];
        assert!(FeatureBarcodeMatrix::from_dense("m", ids("c", 3), ids("g", 2), dense.view()).is_err());
        let dup = vec!["c".to_string(), "c".to_string()];
        assert!(FeatureBarcodeMatrix::from_dense("m", dup, ids("g", 2), dense.view()).is_err());
    }

    #[test]
    fn test_retain_feature_type() -> Result<(), Error> {
        let tri = TriMat::<f64>::new((3, 1));
        let types = ["Gene Expression", "Gene Expression", "Antibody Capture"]
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>();
        let fbm = FeatureBarcodeMatrix::new(
            "m".to_string(),
            ids("c", 1),
            ids("g", 3),
            ids("n", 3),
            make_labelclass_from_feature_type_vector(&types)?,
            tri.to_csc(),
        )?;
        let gex = fbm.retain_feature_type(DEFAULT_FEATURE_TYPE);
        assert_eq!(gex.feature_ids, vec!["g0", "g1"]);
        assert_eq!(gex.feature_names, vec!["n0", "n1"]);
        Ok(())
    }
}
