use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::domain::JobStatus;
use crate::error::KiraError;

/// Largest page size the UniProtKB search endpoint accepts.
pub const MAX_SEARCH_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub ids: String,
    pub taxon_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    #[serde(default)]
    pub job_status: Option<JobStatus>,
    #[serde(default)]
    pub results: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub failed_ids: Option<Vec<String>>,
}

impl JobStatusResponse {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            job_status: Some(status),
            ..Self::default()
        }
    }

    /// Finished jobs are redirected to their results, which carry no `jobStatus`.
    pub fn status(&self) -> JobStatus {
        match self.job_status {
            Some(status) => status,
            None if self.results.is_some() || self.failed_ids.is_some() => JobStatus::Finished,
            None => JobStatus::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MappingTarget {
    Entry {
        #[serde(rename = "primaryAccession")]
        primary_accession: String,
    },
    Plain(String),
}

impl MappingTarget {
    pub fn accession(&self) -> &str {
        match self {
            MappingTarget::Entry { primary_accession } => primary_accession,
            MappingTarget::Plain(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappingResult {
    pub from: String,
    pub to: MappingTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsPage {
    #[serde(default)]
    pub results: Vec<MappingResult>,
    #[serde(default)]
    pub failed_ids: Vec<String>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Where the next results page lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageCursor {
    First { job_id: String },
    Link(String),
}

/// The two UniProt endpoints this crate talks to: id mapping and UniProtKB search.
pub trait UniprotApi: Send + Sync {
    fn submit_job(&self, request: &JobRequest<'_>) -> Result<JobSubmission, KiraError>;
    fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, KiraError>;
    fn results_page(&self, cursor: &PageCursor) -> Result<ResultsPage, KiraError>;
    /// Returns the raw TSV body of a search.
    fn search_tsv(
        &self,
        query: &str,
        fields: &[String],
        size: usize,
    ) -> Result<String, KiraError>;
}

impl<T: UniprotApi + ?Sized> UniprotApi for &T {
    fn submit_job(&self, request: &JobRequest<'_>) -> Result<JobSubmission, KiraError> {
        (**self).submit_job(request)
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, KiraError> {
        (**self).job_status(job_id)
    }

    fn results_page(&self, cursor: &PageCursor) -> Result<ResultsPage, KiraError> {
        (**self).results_page(cursor)
    }

    fn search_tsv(
        &self,
        query: &str,
        fields: &[String],
        size: usize,
    ) -> Result<String, KiraError> {
        (**self).search_tsv(query, fields, size)
    }
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
    base_url: String,
    annotation_timeout: Duration,
    max_retries: usize,
    clock: Arc<dyn Clock>,
}

impl UniprotHttpClient {
    pub fn new(settings: &Settings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ga/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            annotation_timeout: settings.annotation_timeout,
            max_retries: settings.max_retries,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used for retry backoff.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, attempt, "retrying uniprot request");
                        self.clock.sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, attempt, "retrying uniprot request");
                        self.clock.sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::UniprotHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "UniProt request failed".to_string());
        Err(KiraError::UniprotStatus { status, message })
    }

    fn run_url(&self) -> String {
        format!("{}/idmapping/run", self.base_url)
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/idmapping/status/{}", self.base_url, job_id)
    }

    fn results_url(&self, job_id: &str) -> String {
        format!("{}/idmapping/results/{}", self.base_url, job_id)
    }

    fn search_url(&self) -> String {
        format!("{}/uniprotkb/search", self.base_url)
    }
}

impl UniprotApi for UniprotHttpClient {
    fn submit_job(&self, request: &JobRequest<'_>) -> Result<JobSubmission, KiraError> {
        let url = self.run_url();
        let mut form = vec![
            ("from", request.from),
            ("to", request.to),
            ("ids", request.ids.as_str()),
        ];
        if let Some(taxon) = request.taxon_id {
            form.push(("taxId", taxon));
        }
        let response = self.send_with_retries(|| self.client.post(&url).form(&form))?;
        let response = Self::handle_status(response)?;
        decode_json(response)
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, KiraError> {
        let url = self.status_url(job_id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        decode_json(response)
    }

    fn results_page(&self, cursor: &PageCursor) -> Result<ResultsPage, KiraError> {
        let url = match cursor {
            PageCursor::First { job_id } => self.results_url(job_id),
            PageCursor::Link(url) => url.clone(),
        };
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let link_next = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_next_link);
        let mut page: ResultsPage = decode_json(response)?;
        if page.next.is_none() {
            page.next = link_next;
        }
        Ok(page)
    }

    fn search_tsv(
        &self,
        query: &str,
        fields: &[String],
        size: usize,
    ) -> Result<String, KiraError> {
        if size == 0 {
            return Err(KiraError::InvalidBatchSize(size));
        }
        if size > MAX_SEARCH_SIZE {
            return Err(KiraError::BatchTooLarge {
                size,
                max: MAX_SEARCH_SIZE,
            });
        }
        let url = self.search_url();
        let fields = fields.join(",");
        let size = size.to_string();
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .timeout(self.annotation_timeout)
                .query(&[
                    ("query", query),
                    ("fields", fields.as_str()),
                    ("format", "tsv"),
                    ("size", size.as_str()),
                ])
        })?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| KiraError::UniprotHttp(err.to_string()))
    }
}

fn decode_json<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, KiraError> {
    let body = response
        .text()
        .map_err(|err| KiraError::UniprotHttp(err.to_string()))?;
    serde_json::from_str(&body).map_err(|err| KiraError::UniprotDecode(err.to_string()))
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params.split(';').any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
