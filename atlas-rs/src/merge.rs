use anyhow::{bail, Error};
use atlas_types::label_class::make_labelclass_from_feature_type_vector;
use atlas_types::matrix::FeatureBarcodeMatrix;
use atlas_types::metadata::MetadataTable;
use log::info;
use sprs::TriMat;
use std::collections::HashMap;

/// Concatenate replicate matrices column-wise. The features of the result are the union of the
/// inputs' feature ids in first-seen order, with zeros where a replicate lacks a feature. When
/// `sample_ids` is given every barcode becomes `{sample_id}_{barcode}`.
pub fn merge_matrices(
    name: &str,
    matrices: &[FeatureBarcodeMatrix],
    sample_ids: Option<&[String]>,
) -> Result<FeatureBarcodeMatrix, Error> {
    if matrices.is_empty() {
        bail!("{}: nothing to merge", name);
    }
    if let Some(ids) = sample_ids {
        if ids.len() != matrices.len() {
            bail!("{}: {} sample ids for {} matrices", name, ids.len(), matrices.len());
        }
    }

    let mut feature_rows: HashMap<&str, usize> = HashMap::new();
    let mut feature_ids = Vec::new();
    let mut feature_names = Vec::new();
    let mut feature_types = Vec::new();
    let mut row_maps = Vec::with_capacity(matrices.len());
    for fbm in matrices {
        let types = fbm.feature_type_vector();
        let mut row_map = Vec::with_capacity(fbm.rows());
        for (i, id) in fbm.feature_ids.iter().enumerate() {
            let row = *feature_rows.entry(id.as_str()).or_insert_with(|| {
                feature_ids.push(id.clone());
                feature_names.push(fbm.feature_names[i].clone());
                feature_types.push(types[i].clone());
                feature_ids.len() - 1
            });
            row_map.push(row);
        }
        row_maps.push(row_map);
    }

    let total_cols = matrices.iter().map(FeatureBarcodeMatrix::cols).sum::<usize>();
    let nnz = matrices.iter().map(FeatureBarcodeMatrix::nnz).sum::<usize>();
    let mut tri = TriMat::with_capacity((feature_ids.len(), total_cols), nnz);
    let mut barcodes = Vec::with_capacity(total_cols);
    let mut offset = 0;
    for (k, (fbm, row_map)) in matrices.iter().zip(&row_maps).enumerate() {
        for (c, col) in fbm.matrix.outer_iterator().enumerate() {
            for (r, &v) in col.iter() {
                tri.add_triplet(row_map[r], offset + c, v);
            }
        }
        match sample_ids {
            Some(ids) => barcodes.extend(fbm.barcodes.iter().map(|b| format!("{}_{}", ids[k], b))),
            None => barcodes.extend(fbm.barcodes.iter().cloned()),
        }
        offset += fbm.cols();
    }

    info!(
        "{}: merged {} matrices into {} features x {} barcodes",
        name,
        matrices.len(),
        feature_ids.len(),
        total_cols
    );
    let feature_types = if feature_types.is_empty() {
        Default::default()
    } else {
        make_labelclass_from_feature_type_vector(&feature_types)?
    };
    FeatureBarcodeMatrix::new(
        name.to_string(),
        barcodes,
        feature_ids,
        feature_names,
        feature_types,
        tri.to_csc(),
    )
}

/// Concatenate metadata tables row-wise. Columns are the union in first-seen order; cells of
/// columns a table lacks are missing.
pub fn merge_metadata(tables: &[MetadataTable]) -> Result<MetadataTable, Error> {
    let mut columns: Vec<String> = Vec::new();
    for t in tables {
        for c in &t.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut barcodes = Vec::new();
    let mut values = Vec::new();
    for t in tables {
        let positions = columns
            .iter()
            .map(|c| t.columns.iter().position(|x| x == c))
            .collect::<Vec<_>>();
        for (barcode, row) in t.barcodes.iter().zip(&t.values) {
            barcodes.push(barcode.clone());
            values.push(positions.iter().map(|p| p.and_then(|i| row[i].clone())).collect());
        }
    }
    MetadataTable::new(barcodes, columns, values)
}
