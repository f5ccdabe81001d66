use anyhow::{bail, format_err, Error};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Cell values read as missing annotations
pub const MISSING_VALUES: &[&str] = &["", "NA", "NaN", "nan", "NULL", "None"];

/// True if `value` is one of the missing-value tokens
pub fn is_missing(value: &str) -> bool {
    MISSING_VALUES.contains(&value.trim())
}

/// Per-barcode annotations: one row per observation, one column per annotation field
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataTable {
    /// Row identifiers
    pub barcodes: Vec<String>,
    /// Annotation field names
    pub columns: Vec<String>,
    /// Row-major cell values, `None` where missing
    pub values: Vec<Vec<Option<String>>>,
}

impl MetadataTable {
    /// Assemble a table, checking the shape and that barcodes and column names are unique
    pub fn new(
        barcodes: Vec<String>,
        columns: Vec<String>,
        values: Vec<Vec<Option<String>>>,
    ) -> Result<MetadataTable, Error> {
        if barcodes.len() != values.len() {
            bail!("{} barcodes but {} metadata rows", barcodes.len(), values.len());
        }
        if let Some((i, row)) = values.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            bail!(
                "metadata row for '{}' has {} fields, expected {}",
                barcodes[i],
                row.len(),
                columns.len()
            );
        }
        let mut seen = HashSet::with_capacity(barcodes.len());
        for b in &barcodes {
            if !seen.insert(b.as_str()) {
                bail!("duplicate metadata row id '{}'", b);
            }
        }
        if let Some(dup) = columns.iter().duplicates().next() {
            bail!("duplicate metadata column '{}'", dup);
        }
        Ok(MetadataTable {
            barcodes,
            columns,
            values,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    /// True if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }

    /// Map from barcode to row index
    pub fn barcode_index(&self) -> HashMap<&str, usize> {
        self.barcodes.iter().enumerate().map(|(i, b)| (b.as_str(), i)).collect()
    }

    /// Position of a column, or an error listing the available columns
    pub fn column_index(&self, name: &str) -> Result<usize, Error> {
        self.columns.iter().position(|c| c == name).ok_or_else(|| {
            format_err!(
                "metadata column '{}' not found, available columns: {}",
                name,
                self.columns.iter().join(", ")
            )
        })
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Result<Vec<Option<&str>>, Error> {
        let idx = self.column_index(name)?;
        Ok(self.values.iter().map(|row| row[idx].as_deref()).collect())
    }

    /// Owned values of one column, for use as group labels
    pub fn labels(&self, name: &str) -> Result<Vec<Option<String>>, Error> {
        let idx = self.column_index(name)?;
        Ok(self.values.iter().map(|row| row[idx].clone()).collect())
    }

    /// New table holding the given rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> MetadataTable {
        MetadataTable {
            barcodes: rows.iter().map(|&r| self.barcodes[r].clone()).collect(),
            columns: self.columns.clone(),
            values: rows.iter().map(|&r| self.values[r].clone()).collect(),
        }
    }
}
