use crate::mtx::open_text;
use anyhow::{bail, Context, Error};
use atlas_types::metadata::{is_missing, MetadataTable};
use log::info;
use std::io::Read;
use std::path::Path;

/// A delimited text table with a header row, split into a leading identifier column and data
/// columns
#[derive(Clone, Debug)]
pub(crate) struct DelimitedTable {
    pub columns: Vec<String>,
    pub rows: Vec<(String, Vec<String>)>,
}

/// Field delimiter for a table: `.csv` is comma, `.tsv` / `.txt` is tab (ignoring a trailing
/// `.gz`), otherwise whichever of the two is more frequent in the header line.
pub(crate) fn sniff_delimiter(path: &Path, header: &str) -> u8 {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".csv") {
        b','
    } else if name.ends_with(".tsv") || name.ends_with(".txt") {
        b'\t'
    } else if header.matches('\t').count() >= header.matches(',').count() {
        b'\t'
    } else {
        b','
    }
}

/// Read a delimited table whose first column holds row identifiers. The header may name that
/// column or, as R's `write.table` does, leave it out.
pub(crate) fn read_delimited(path: impl AsRef<Path>) -> Result<DelimitedTable, Error> {
    let path = path.as_ref();
    let mut content = String::new();
    open_text(path)?
        .read_to_string(&mut content)
        .with_context(|| path.display().to_string())?;
    let delimiter = sniff_delimiter(path, content.lines().next().unwrap_or(""));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let Some(header) = records.next() else { bail!("{}: empty table", path.display()) };
    let header = header.with_context(|| path.display().to_string())?;
    let header = header.iter().map(str::to_string).collect::<Vec<_>>();

    let mut rows = Vec::new();
    let mut width = None;
    for (line_no, record) in records.enumerate() {
        let record = record.with_context(|| format!("{} line {}", path.display(), line_no + 2))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let n = record.len();
        match width {
            None => width = Some(n),
            Some(w) if w != n => bail!(
                "{} line {}: {} fields, expected {}",
                path.display(),
                line_no + 2,
                n,
                w
            ),
            _ => {}
        }
        let mut fields = record.iter().map(str::to_string);
        let id = fields.next().unwrap_or_default();
        rows.push((id, fields.collect::<Vec<_>>()));
    }

    let columns = match width {
        None => header.into_iter().skip(1).collect(),
        Some(w) if w == header.len() => header.into_iter().skip(1).collect(),
        Some(w) if w == header.len() + 1 => header,
        Some(w) => bail!(
            "{}: header has {} fields but rows have {}",
            path.display(),
            header.len(),
            w
        ),
    };
    Ok(DelimitedTable { columns, rows })
}

/// Load a per-barcode metadata table (CSV or TSV, optionally gzipped). The first column holds
/// the barcodes; missing-value tokens become `None`.
pub fn load_metadata(path: impl AsRef<Path>) -> Result<MetadataTable, Error> {
    let path = path.as_ref();
    let table = read_delimited(path)?;
    let mut barcodes = Vec::with_capacity(table.rows.len());
    let mut values = Vec::with_capacity(table.rows.len());
    for (id, fields) in table.rows {
        barcodes.push(id);
        values.push(
            fields
                .into_iter()
                .map(|v| if is_missing(&v) { None } else { Some(v) })
                .collect(),
        );
    }
    let meta = MetadataTable::new(barcodes, table.columns, values).with_context(|| path.display().to_string())?;
    info!(
        "loaded metadata for {} barcodes with {} columns from {}",
        meta.len(),
        meta.columns.len(),
        path.display()
    );
    Ok(meta)
}
