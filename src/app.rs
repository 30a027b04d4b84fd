use std::time::{Duration, Instant};

use serde::Serialize;

use crate::annotation::{AnnotationFetcher, AnnotationReport, AnnotationTable};
use crate::clock::{CancelToken, Clock};
use crate::config::Settings;
use crate::domain::{MappingTable, UniprotAccession};
use crate::error::KiraError;
use crate::mapper::{BatchMapper, ChunkOutcome, MappingReport};
use crate::uniprot::UniprotApi;

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch: usize,
    pub job_id: Option<String>,
    pub outcome: String,
    pub entries: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResult {
    pub requested: usize,
    pub mapped: usize,
    pub unmapped: Vec<String>,
    pub mapping: MappingTable,
    pub batches: Vec<BatchSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateResult {
    pub requested: usize,
    pub rows: usize,
    pub invalid: Vec<String>,
    pub failed_batches: Vec<BatchSummary>,
    #[serde(skip)]
    pub table: AnnotationTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub mapping: MapResult,
    pub annotations: AnnotateResult,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Drives both pipeline steps with one client, clock and settings value.
pub struct App<C: UniprotApi, K: Clock> {
    client: C,
    clock: K,
    settings: Settings,
    cancel: CancelToken,
}

impl<C: UniprotApi, K: Clock> App<C, K> {
    pub fn new(client: C, clock: K, settings: Settings) -> Self {
        Self {
            client,
            clock,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn map(&self, genes: &[String], sink: &dyn ProgressSink) -> Result<MapResult, KiraError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Map; submitting {} identifiers ({} -> {})",
                genes.len(),
                self.settings.from_db,
                self.settings.to_db
            ),
            elapsed: None,
        });

        let mapper = BatchMapper::new(&self.client, &self.clock, &self.settings)
            .with_cancel_token(self.cancel.clone());
        let report = mapper.map_identifiers_with_report(genes, self.settings.mapping_batch_size)?;
        let result = summarize_mapping(genes, report);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Map; mapped {}/{} identifiers",
                result.mapped, result.requested
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }

    /// Annotates caller-supplied accessions. Values that are not UniProt accessions are
    /// reported in `invalid` and left out of the queries.
    pub fn annotate(
        &self,
        accessions: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateResult, KiraError> {
        let mut valid = Vec::with_capacity(accessions.len());
        let mut invalid = Vec::new();
        for value in accessions {
            match value.parse::<UniprotAccession>() {
                Ok(acc) => valid.push(acc.as_str().to_string()),
                Err(_) => {
                    tracing::warn!(value = %value, "skipping invalid accession");
                    invalid.push(value.clone());
                }
            }
        }
        let mut result = self.fetch(&valid, sink)?;
        result.requested = accessions.len();
        result.invalid = invalid;
        Ok(result)
    }

    /// Maps gene symbols, then annotates the accessions in input order.
    pub fn run(&self, genes: &[String], sink: &dyn ProgressSink) -> Result<RunResult, KiraError> {
        let mapping = self.map(genes, sink)?;
        let accessions = mapping.mapping.accessions_in_order(genes);
        let annotations = self.fetch(&accessions, sink)?;
        Ok(RunResult {
            mapping,
            annotations,
        })
    }

    fn fetch(
        &self,
        accessions: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateResult, KiraError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Annotate; querying {} accessions", accessions.len()),
            elapsed: None,
        });

        let fetcher = AnnotationFetcher::new(&self.client, &self.clock, &self.settings);
        let AnnotationReport { table, failures } = fetcher
            .fetch_annotations_with_report(accessions, self.settings.annotation_batch_size)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Annotate; {} rows, {} failed batches",
                table.len(),
                failures.len()
            ),
            elapsed: Some(started.elapsed()),
        });

        Ok(AnnotateResult {
            requested: accessions.len(),
            rows: table.len(),
            invalid: Vec::new(),
            failed_batches: failures
                .into_iter()
                .map(|failure| BatchSummary {
                    batch: failure.batch,
                    job_id: None,
                    outcome: "skipped".to_string(),
                    entries: 0,
                    detail: Some(failure.error.to_string()),
                })
                .collect(),
            table,
        })
    }
}

fn summarize_mapping(genes: &[String], report: MappingReport) -> MapResult {
    let MappingReport { table, chunks } = report;
    let unmapped = genes
        .iter()
        .filter(|gene| table.get(gene).is_none())
        .cloned()
        .collect();
    let batches = chunks
        .into_iter()
        .map(|chunk| {
            let (outcome, detail) = match chunk.outcome {
                ChunkOutcome::Drained { pages } => ("drained", Some(format!("{pages} pages"))),
                ChunkOutcome::Truncated { pages, error } => {
                    ("truncated", Some(format!("after {pages} pages: {error}")))
                }
                ChunkOutcome::Skipped(error) => ("skipped", Some(error.to_string())),
            };
            BatchSummary {
                batch: chunk.batch,
                job_id: Some(chunk.job_id),
                outcome: outcome.to_string(),
                entries: chunk.entries,
                detail,
            }
        })
        .collect();
    MapResult {
        requested: genes.len(),
        mapped: table.len(),
        unmapped,
        mapping: table,
        batches,
    }
}
