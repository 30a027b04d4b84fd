use std::fs;

use camino::Utf8Path;

use crate::error::KiraError;

pub const DEFAULT_COLUMN: &str = "protein";

/// Reads identifiers from a CSV/TSV file (by column name) or a plain list with one id per line.
///
/// Without an explicit column, `protein` is used when present and the first column otherwise.
/// Blank cells are dropped; order and duplicates are kept.
pub fn read_identifiers(path: &Utf8Path, column: Option<&str>) -> Result<Vec<String>, KiraError> {
    let content = fs::read_to_string(path)
        .map_err(|err| KiraError::InputParse(format!("{path}: {err}")))?;
    match delimiter_for(path, &content) {
        Some(delimiter) => read_column(&content, delimiter, column),
        None => {
            if let Some(column) = column {
                return Err(KiraError::InputParse(format!(
                    "{path} is not a delimited table, cannot select column {column}"
                )));
            }
            Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect())
        }
    }
}

fn delimiter_for(path: &Utf8Path, content: &str) -> Option<u8> {
    match path.extension().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("csv") => return Some(b','),
        Some("tsv") | Some("tab") => return Some(b'\t'),
        _ => {}
    }
    let first = content.lines().next().unwrap_or("");
    if first.contains('\t') {
        Some(b'\t')
    } else if first.contains(',') {
        Some(b',')
    } else {
        None
    }
}

fn read_column(
    content: &str,
    delimiter: u8,
    column: Option<&str>,
) -> Result<Vec<String>, KiraError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| KiraError::InputParse(err.to_string()))?
        .clone();

    let index = match column {
        Some(name) => headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| KiraError::InputParse(format!("column {name} not found")))?,
        None => headers
            .iter()
            .position(|header| header.trim() == DEFAULT_COLUMN)
            .unwrap_or(0),
    };

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| KiraError::InputParse(err.to_string()))?;
        if let Some(value) = record.get(index).map(str::trim) {
            if !value.is_empty() {
                ids.push(value.to_string());
            }
        }
    }
    Ok(ids)
}
