use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(usize),

    #[error("batch size {size} exceeds the UniProtKB search page limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("invalid UniProt accession: {0}")]
    InvalidAccession(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("failed to read identifier list: {0}")]
    InputParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("malformed uniprot response: {0}")]
    UniprotDecode(String),

    #[error("id mapping job {job_id} (batch {batch}) failed")]
    JobFailed { job_id: String, batch: usize },

    #[error("id mapping job {job_id} still running after {elapsed:?}")]
    PollTimeout { job_id: String, elapsed: Duration },

    #[error("operation cancelled")]
    Cancelled,
}

impl KiraError {
    /// True for errors raised by the upstream service or the network.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            KiraError::UniprotHttp(_)
                | KiraError::UniprotStatus { .. }
                | KiraError::UniprotDecode(_)
                | KiraError::JobFailed { .. }
                | KiraError::PollTimeout { .. }
        )
    }
}
