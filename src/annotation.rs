use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::domain::{IdentifierBatch, partition};
use crate::error::KiraError;
use crate::uniprot::{MAX_SEARCH_SIZE, UniprotApi};

const BODY_EXCERPT_CHARS: usize = 200;
/// Header UniProtKB gives the `accession` return field.
pub const ENTRY_COLUMN: &str = "Entry";

/// One TSV row. Empty cells are left out of `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationRecord {
    pub accession: String,
    pub fields: BTreeMap<String, String>,
}

impl AnnotationRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Splits a multi-valued cell such as `GO:0005634; GO:0006915`.
    pub fn terms(&self, column: &str) -> Vec<&str> {
        self.get(column)
            .map(|value| {
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|term| !term.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationTable {
    columns: Vec<String>,
    records: Vec<AnnotationRecord>,
}

impl AnnotationTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn accessions(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|record| record.accession.as_str())
    }

    /// Appends another batch, widening the column list with any new headers.
    pub fn append(&mut self, other: AnnotationTable) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.records.extend(other.records);
    }

    pub fn write_tsv<W: Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut out = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);
        out.write_record(&self.columns)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for record in &self.records {
            let row = self
                .columns
                .iter()
                .map(|column| record.get(column).unwrap_or(""));
            out.write_record(row)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        out.flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

/// Parses a UniProtKB TSV body. The first row names the columns; rows are keyed by
/// the `Entry` column, or by the first column when no `Entry` header is present.
pub fn parse_tsv(body: &str) -> Result<AnnotationTable, KiraError> {
    if body.trim().is_empty() {
        return Ok(AnnotationTable::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| KiraError::UniprotDecode(err.to_string()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let key = columns
        .iter()
        .position(|column| column == ENTRY_COLUMN)
        .unwrap_or(0);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| KiraError::UniprotDecode(err.to_string()))?;
        let accession = row.get(key).unwrap_or("").trim().to_string();
        let fields = columns
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(column, value)| (column.clone(), value.trim().to_string()))
            .collect();
        records.push(AnnotationRecord { accession, fields });
    }
    Ok(AnnotationTable { columns, records })
}

/// `accession:A OR accession:B ...`
pub fn accession_query(accessions: &[String]) -> String {
    accessions
        .iter()
        .map(|acc| format!("accession:{acc}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[derive(Debug)]
pub struct BatchFailure {
    pub batch: usize,
    pub error: KiraError,
}

#[derive(Debug, Default)]
pub struct AnnotationReport {
    pub table: AnnotationTable,
    pub failures: Vec<BatchFailure>,
}

/// Batched, paced UniProtKB searches. A failed batch is logged and skipped.
pub struct AnnotationFetcher<C: UniprotApi, K: Clock> {
    client: C,
    clock: K,
    fields: Vec<String>,
    pacing_delay: Duration,
}

impl<C: UniprotApi, K: Clock> AnnotationFetcher<C, K> {
    pub fn new(client: C, clock: K, settings: &Settings) -> Self {
        Self {
            client,
            clock,
            fields: settings.annotation_fields.clone(),
            pacing_delay: settings.pacing_delay,
        }
    }

    pub fn fetch_annotations(
        &self,
        accessions: &[String],
        batch_size: usize,
    ) -> Result<AnnotationTable, KiraError> {
        Ok(self
            .fetch_annotations_with_report(accessions, batch_size)?
            .table)
    }

    pub fn fetch_annotations_with_report(
        &self,
        accessions: &[String],
        batch_size: usize,
    ) -> Result<AnnotationReport, KiraError> {
        if batch_size > MAX_SEARCH_SIZE {
            return Err(KiraError::BatchTooLarge {
                size: batch_size,
                max: MAX_SEARCH_SIZE,
            });
        }
        let batches = partition(accessions, batch_size)?;
        info!(
            accessions = accessions.len(),
            batches = batches.len(),
            "fetching annotations"
        );

        let mut report = AnnotationReport::default();
        for (position, batch) in batches.iter().enumerate() {
            if position > 0 {
                self.clock.sleep(self.pacing_delay);
            }
            match self.fetch_batch(batch) {
                Ok(rows) => {
                    info!(batch = batch.index, rows = rows.len(), "annotation batch fetched");
                    report.table.append(rows);
                }
                Err(error) => {
                    log_batch_failure(batch.index, &error);
                    report.failures.push(BatchFailure {
                        batch: batch.index,
                        error,
                    });
                }
            }
        }

        if report.table.is_empty() {
            warn!(
                failed_batches = report.failures.len(),
                "no annotation rows retrieved"
            );
        }
        Ok(report)
    }

    fn fetch_batch(&self, batch: &IdentifierBatch<'_>) -> Result<AnnotationTable, KiraError> {
        let query = accession_query(batch.ids);
        let body = self.client.search_tsv(&query, &self.fields, batch.len())?;
        parse_tsv(&body)
    }
}

fn log_batch_failure(batch: usize, error: &KiraError) {
    match error {
        KiraError::UniprotStatus { status, message } => {
            let excerpt: String = message.chars().take(BODY_EXCERPT_CHARS).collect();
            warn!(batch, status, body = %excerpt, "annotation batch failed");
        }
        other => warn!(batch, error = %other, "annotation batch failed"),
    }
}
