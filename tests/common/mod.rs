#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kira_gene_annotator::clock::{CancelToken, Clock};
use kira_gene_annotator::domain::JobStatus;
use kira_gene_annotator::error::KiraError;
use kira_gene_annotator::uniprot::{
    JobRequest, JobStatusResponse, JobSubmission, MappingResult, MappingTarget, PageCursor,
    ResultsPage, UniprotApi,
};

#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Status(u16),
}

impl<T: Clone> Reply<T> {
    fn produce(&self) -> Result<T, KiraError> {
        match self {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Status(status) => Err(KiraError::UniprotStatus {
                status: *status,
                message: format!("scripted failure {status}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedJob {
    pub from: String,
    pub to: String,
    pub ids: String,
    pub taxon_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSearch {
    pub query: String,
    pub fields: Vec<String>,
    pub size: usize,
}

/// In-memory UniProt double driven by scripted replies.
#[derive(Default)]
pub struct ScriptedUniprot {
    submissions: Mutex<VecDeque<Reply<String>>>,
    statuses: Mutex<HashMap<String, VecDeque<Reply<JobStatusResponse>>>>,
    pages: Mutex<HashMap<PageCursor, Reply<ResultsPage>>>,
    searches: Mutex<HashMap<String, Reply<String>>>,
    cancel_on_status: Mutex<Option<CancelToken>>,
    pub jobs: Mutex<Vec<RecordedJob>>,
    pub status_calls: Mutex<Vec<String>>,
    pub page_calls: Mutex<Vec<PageCursor>>,
    pub search_calls: Mutex<Vec<RecordedSearch>>,
}

impl ScriptedUniprot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next submission returns `job_id`; its status polls walk through `statuses`,
    /// repeating the last one.
    pub fn job(self, job_id: &str, statuses: &[JobStatus]) -> Self {
        let replies = statuses
            .iter()
            .map(|status| Reply::Ok(JobStatusResponse::with_status(*status)))
            .collect();
        self.job_with_replies(job_id, replies)
    }

    pub fn job_with_replies(self, job_id: &str, replies: Vec<Reply<JobStatusResponse>>) -> Self {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Reply::Ok(job_id.to_string()));
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), replies.into());
        self
    }

    pub fn failing_submission(self, status: u16) -> Self {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Reply::Status(status));
        self
    }

    pub fn first_page(self, job_id: &str, pairs: &[(&str, &str)], next: Option<&str>) -> Self {
        let cursor = PageCursor::First {
            job_id: job_id.to_string(),
        };
        self.page(cursor, Reply::Ok(results_page(pairs, next)))
    }

    pub fn linked_page(self, url: &str, pairs: &[(&str, &str)], next: Option<&str>) -> Self {
        self.page(
            PageCursor::Link(url.to_string()),
            Reply::Ok(results_page(pairs, next)),
        )
    }

    pub fn failing_page(self, cursor: PageCursor, status: u16) -> Self {
        self.page(cursor, Reply::Status(status))
    }

    pub fn page(self, cursor: PageCursor, reply: Reply<ResultsPage>) -> Self {
        self.pages.lock().unwrap().insert(cursor, reply);
        self
    }

    pub fn search(self, query: &str, body: &str) -> Self {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), Reply::Ok(body.to_string()));
        self
    }

    pub fn failing_search(self, query: &str, status: u16) -> Self {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), Reply::Status(status));
        self
    }

    /// Fires `token` on the first status poll.
    pub fn cancel_on_status(self, token: CancelToken) -> Self {
        *self.cancel_on_status.lock().unwrap() = Some(token);
        self
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|job| job.ids.clone())
            .collect()
    }
}

impl UniprotApi for ScriptedUniprot {
    fn submit_job(&self, request: &JobRequest<'_>) -> Result<JobSubmission, KiraError> {
        self.jobs.lock().unwrap().push(RecordedJob {
            from: request.from.to_string(),
            to: request.to.to_string(),
            ids: request.ids.clone(),
            taxon_id: request.taxon_id.map(str::to_string),
        });
        let reply = self
            .submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Status(500));
        reply.produce().map(|job_id| JobSubmission { job_id })
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, KiraError> {
        self.status_calls.lock().unwrap().push(job_id.to_string());
        if let Some(token) = self.cancel_on_status.lock().unwrap().as_ref() {
            token.cancel();
        }
        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses
            .get_mut(job_id)
            .expect("status polled for unknown job");
        let reply = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("empty status script")
        };
        reply.produce()
    }

    fn results_page(&self, cursor: &PageCursor) -> Result<ResultsPage, KiraError> {
        self.page_calls.lock().unwrap().push(cursor.clone());
        self.pages
            .lock()
            .unwrap()
            .get(cursor)
            .cloned()
            .unwrap_or(Reply::Status(404))
            .produce()
    }

    fn search_tsv(
        &self,
        query: &str,
        fields: &[String],
        size: usize,
    ) -> Result<String, KiraError> {
        self.search_calls.lock().unwrap().push(RecordedSearch {
            query: query.to_string(),
            fields: fields.to_vec(),
            size,
        });
        self.searches
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or(Reply::Status(400))
            .produce()
    }
}

pub fn results_page(pairs: &[(&str, &str)], next: Option<&str>) -> ResultsPage {
    ResultsPage {
        results: pairs
            .iter()
            .map(|(from, to)| MappingResult {
                from: from.to_string(),
                to: MappingTarget::Entry {
                    primary_accession: to.to_string(),
                },
            })
            .collect(),
        failed_ids: Vec::new(),
        next: next.map(str::to_string),
    }
}

/// Virtual time: `sleep` records the duration and advances `now` without blocking.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
    pub sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
