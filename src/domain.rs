use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9](?:[A-Z][A-Z0-9]{2}[0-9]){1,2})(?:-[0-9]+)?$",
    )
    .expect("accession regex")
});

/// UniProtKB accession, optionally with an isoform suffix (`P04637-2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniprotAccession(String);

impl UniprotAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniprotAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniprotAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One bounded slice of the caller's identifier list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierBatch<'a> {
    pub index: usize,
    pub offset: usize,
    pub ids: &'a [String],
}

impl IdentifierBatch<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn joined(&self, separator: &str) -> String {
        self.ids.join(separator)
    }
}

/// Cuts `ids` into consecutive batches of at most `batch_size`, keeping input order.
pub fn partition(ids: &[String], batch_size: usize) -> Result<Vec<IdentifierBatch<'_>>, KiraError> {
    if batch_size == 0 {
        return Err(KiraError::InvalidBatchSize(batch_size));
    }
    Ok(ids
        .chunks(batch_size)
        .enumerate()
        .map(|(index, ids)| IdentifierBatch {
            index,
            offset: index * batch_size,
            ids,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::New => write!(f, "NEW"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Finished => write!(f, "FINISHED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A submitted id mapping job. Lives only for the duration of one mapping call.
#[derive(Debug, Clone)]
pub struct MappingJob {
    pub job_id: String,
    pub batch: usize,
    pub identifiers: Vec<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl MappingJob {
    pub fn submitted(job_id: String, batch: &IdentifierBatch<'_>) -> Self {
        Self {
            job_id,
            batch: batch.index,
            identifiers: batch.ids.to_vec(),
            status: JobStatus::Running,
            created_at: Utc::now(),
        }
    }
}

/// Source identifier to accession, one accession per identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    entries: BTreeMap<String, String>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Folds one chunk's pairs in. Later pairs overwrite earlier ones for the same source.
    pub fn merge(&mut self, partial: BTreeMap<String, String>) {
        self.entries.extend(partial);
    }

    /// Distinct accessions, ordered by source identifier.
    pub fn accessions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .values()
            .filter(|acc| seen.insert(acc.as_str()))
            .cloned()
            .collect()
    }

    /// Distinct accessions in the order their source identifiers appear in `identifiers`.
    pub fn accessions_in_order(&self, identifiers: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        identifiers
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|acc| seen.insert(acc.as_str()))
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, String)> for MappingTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
