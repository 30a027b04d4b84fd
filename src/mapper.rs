use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::clock::{CancelToken, Clock};
use crate::config::Settings;
use crate::domain::{IdentifierBatch, JobStatus, MappingJob, MappingTable, partition};
use crate::error::KiraError;
use crate::uniprot::{JobRequest, PageCursor, ResultsPage, UniprotApi};

/// Terminal state of one chunk that did not abort the call.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Every result page was folded in.
    Drained { pages: usize },
    /// A page fetch failed; pairs from the pages before it were kept.
    Truncated { pages: usize, error: KiraError },
    /// The job failed, timed out, or its status could not be read. No entries.
    Skipped(KiraError),
}

#[derive(Debug)]
pub struct ChunkReport {
    pub batch: usize,
    pub size: usize,
    pub job_id: String,
    pub entries: usize,
    pub outcome: ChunkOutcome,
}

impl ChunkReport {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Drained { .. })
    }
}

#[derive(Debug)]
pub struct MappingReport {
    pub table: MappingTable,
    pub chunks: Vec<ChunkReport>,
}

impl MappingReport {
    pub fn incomplete_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|chunk| !chunk.is_complete())
    }
}

struct Drain {
    pages: usize,
    error: Option<KiraError>,
}

/// Runs id mapping jobs chunk by chunk: submit, poll to a terminal status, drain result pages.
pub struct BatchMapper<C: UniprotApi, K: Clock> {
    client: C,
    clock: K,
    settings: Settings,
    cancel: CancelToken,
}

impl<C: UniprotApi, K: Clock> BatchMapper<C, K> {
    pub fn new(client: C, clock: K, settings: &Settings) -> Self {
        Self {
            client,
            clock,
            settings: settings.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn map_identifiers(
        &self,
        identifiers: &[String],
        batch_size: usize,
    ) -> Result<MappingTable, KiraError> {
        Ok(self
            .map_identifiers_with_report(identifiers, batch_size)?
            .table)
    }

    /// Fails only when a submission fails or the call is cancelled.
    /// Every other failure is logged and recorded in the chunk's report.
    pub fn map_identifiers_with_report(
        &self,
        identifiers: &[String],
        batch_size: usize,
    ) -> Result<MappingReport, KiraError> {
        let batches = partition(identifiers, batch_size)?;
        info!(
            identifiers = identifiers.len(),
            batches = batches.len(),
            from = %self.settings.from_db,
            to = %self.settings.to_db,
            "mapping identifiers"
        );

        let mut table = MappingTable::new();
        let mut chunks = Vec::with_capacity(batches.len());
        for batch in &batches {
            if self.cancel.is_cancelled() {
                return Err(KiraError::Cancelled);
            }
            let mut job = self.submit(batch)?;

            match self.poll(&mut job) {
                Ok(()) => {}
                Err(KiraError::Cancelled) => return Err(KiraError::Cancelled),
                Err(err) => {
                    warn!(batch = batch.index, job_id = %job.job_id, error = %err, "skipping batch");
                    chunks.push(ChunkReport {
                        batch: batch.index,
                        size: batch.len(),
                        job_id: job.job_id,
                        entries: 0,
                        outcome: ChunkOutcome::Skipped(err),
                    });
                    continue;
                }
            }

            let mut partial = BTreeMap::new();
            let drain = self.drain(&job, batch, &mut partial);
            let entries = partial.len();
            table.merge(partial);

            let outcome = match drain.error {
                None => {
                    info!(batch = batch.index, job_id = %job.job_id, pages = drain.pages, entries, "batch drained");
                    ChunkOutcome::Drained { pages: drain.pages }
                }
                Some(error) => {
                    warn!(
                        batch = batch.index,
                        job_id = %job.job_id,
                        pages = drain.pages,
                        entries,
                        error = %error,
                        "result pages truncated"
                    );
                    ChunkOutcome::Truncated {
                        pages: drain.pages,
                        error,
                    }
                }
            };
            chunks.push(ChunkReport {
                batch: batch.index,
                size: batch.len(),
                job_id: job.job_id,
                entries,
                outcome,
            });
        }

        info!(mapped = table.len(), "identifier mapping complete");
        Ok(MappingReport { table, chunks })
    }

    fn submit(&self, batch: &IdentifierBatch<'_>) -> Result<MappingJob, KiraError> {
        let request = JobRequest {
            from: &self.settings.from_db,
            to: &self.settings.to_db,
            ids: batch.joined(","),
            taxon_id: self.settings.taxon_id.as_deref(),
        };
        let submission = self.client.submit_job(&request).inspect_err(|err| {
            warn!(batch = batch.index, error = %err, "id mapping submission failed");
        })?;
        info!(batch = batch.index, size = batch.len(), job_id = %submission.job_id, "submitted id mapping job");
        Ok(MappingJob::submitted(submission.job_id, batch))
    }

    fn poll(&self, job: &mut MappingJob) -> Result<(), KiraError> {
        let started = self.clock.now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(KiraError::Cancelled);
            }
            job.status = self.client.job_status(&job.job_id)?.status();
            debug!(job_id = %job.job_id, status = %job.status, "polled job status");
            match job.status {
                JobStatus::Finished => return Ok(()),
                JobStatus::Failed => {
                    return Err(KiraError::JobFailed {
                        job_id: job.job_id.clone(),
                        batch: job.batch,
                    });
                }
                JobStatus::New | JobStatus::Running => {}
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if let Some(timeout) = self.settings.poll_timeout {
                if elapsed >= timeout {
                    return Err(KiraError::PollTimeout {
                        job_id: job.job_id.clone(),
                        elapsed,
                    });
                }
            }
            self.clock.sleep(self.settings.poll_interval);
        }
    }

    fn drain(
        &self,
        job: &MappingJob,
        batch: &IdentifierBatch<'_>,
        partial: &mut BTreeMap<String, String>,
    ) -> Drain {
        let sources: HashSet<&str> = batch.ids.iter().map(String::as_str).collect();
        let mut visited = HashSet::new();
        let mut cursor = Some(PageCursor::First {
            job_id: job.job_id.clone(),
        });
        let mut pages = 0usize;

        while let Some(current) = cursor.take() {
            let page = match self.client.results_page(&current) {
                Ok(page) => page,
                Err(error) => {
                    return Drain {
                        pages,
                        error: Some(error),
                    };
                }
            };
            pages += 1;
            fold_page(&page, &sources, partial);
            debug!(job_id = %job.job_id, page = pages, results = page.results.len(), "folded results page");

            if let Some(next) = page.next {
                if visited.insert(next.clone()) {
                    cursor = Some(PageCursor::Link(next));
                } else {
                    warn!(job_id = %job.job_id, url = %next, "results page links back to a visited page");
                }
            }
        }
        Drain { pages, error: None }
    }
}

fn fold_page(page: &ResultsPage, sources: &HashSet<&str>, partial: &mut BTreeMap<String, String>) {
    for item in &page.results {
        if !sources.contains(item.from.as_str()) {
            debug!(from = %item.from, "dropping result for identifier outside the batch");
            continue;
        }
        partial.insert(item.from.clone(), item.to.accession().to_string());
    }
    if !page.failed_ids.is_empty() {
        debug!(count = page.failed_ids.len(), "identifiers without a mapping");
    }
}
