use crate::constants::NA_TOKENS;
use crate::error::{PipelineError, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many dropped line numbers are kept for the warning log
const MAX_REPORTED_LINES: usize = 10;

/// Outcome of a permissive read
#[derive(Debug, Clone)]
pub struct CsvReadReport {
    pub rows_read: usize,
    pub rows_dropped: usize,
    /// 1-based line numbers of the first few dropped rows
    pub dropped_lines: Vec<u64>,
    pub rows_padded: usize,
}

/// Read a delimited file into a single batch, dropping malformed rows.
pub fn read_delimited(path: &Path, delimiter: u8) -> Result<(RecordBatch, CsvReadReport)> {
    let file = File::open(path)?;
    read_delimited_from(file, delimiter).map_err(|e| match e {
        PipelineError::EmptyInput(_) => PipelineError::EmptyInput(path.to_path_buf()),
        other => other,
    })
}

/// Reader-based variant of [`read_delimited`].
///
/// A row is dropped when it has more fields than the header or when the
/// tokenizer rejects it (for example invalid UTF-8). Short rows are padded
/// with nulls. Column types are inferred from the whole column. A failed
/// read from the underlying source aborts with an error.
pub fn read_delimited_from<R: Read>(
    reader: R,
    delimiter: u8,
) -> Result<(RecordBatch, CsvReadReport)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header_names: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if header_names.is_empty() || header_names.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::EmptyInput(Default::default()));
    }
    let names = dedupe_header(header_names);
    let width = names.len();

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    let mut report = CsvReadReport {
        rows_read: 0,
        rows_dropped: 0,
        dropped_lines: Vec::new(),
        rows_padded: 0,
    };

    for result in rdr.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                debug!("Dropping unreadable row at line {}: {}", line, e);
                note_dropped(&mut report, line);
                continue;
            }
        };

        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            debug!(
                "Dropping row at line {}: expected {} fields, saw {}",
                line,
                width,
                record.len()
            );
            note_dropped(&mut report, line);
            continue;
        }
        if record.len() < width {
            report.rows_padded += 1;
        }

        for (i, column) in columns.iter_mut().enumerate() {
            column.push(record.get(i).and_then(normalize_cell));
        }
        report.rows_read += 1;
    }

    if report.rows_dropped > 0 {
        warn!(
            "Dropped {} malformed row(s); first at line(s) {:?}",
            report.rows_dropped, report.dropped_lines
        );
    }

    let mut fields = Vec::with_capacity(width);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(width);
    for (name, values) in names.into_iter().zip(columns) {
        let array = infer_column(values);
        fields.push(Field::new(name, array.data_type().clone(), true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = if arrays.is_empty() {
        RecordBatch::new_empty(schema)
    } else {
        RecordBatch::try_new(schema, arrays)?
    };
    Ok((batch, report))
}

fn note_dropped(report: &mut CsvReadReport, line: u64) {
    report.rows_dropped += 1;
    if report.dropped_lines.len() < MAX_REPORTED_LINES {
        report.dropped_lines.push(line);
    }
}

fn normalize_cell(raw: &str) -> Option<String> {
    if NA_TOKENS.contains(&raw) || NA_TOKENS.contains(&raw.trim()) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Repeated header names get `.1`, `.2`, ... suffixes
fn dedupe_header(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", name, suffix);
            suffix += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn infer_column(values: Vec<Option<String>>) -> ArrayRef {
    let non_null = || values.iter().flatten();

    if non_null().next().is_none() {
        return Arc::new(StringArray::from(values));
    }
    if non_null().all(|v| v.trim().parse::<i64>().is_ok()) {
        let ints: Int64Array = values
            .iter()
            .map(|v| v.as_ref().and_then(|s| s.trim().parse::<i64>().ok()))
            .collect();
        return Arc::new(ints);
    }
    if non_null().all(|v| v.trim().parse::<f64>().is_ok()) {
        let floats: Float64Array = values
            .iter()
            .map(|v| v.as_ref().and_then(|s| s.trim().parse::<f64>().ok()))
            .collect();
        return Arc::new(floats);
    }
    Arc::new(StringArray::from(values))
}
