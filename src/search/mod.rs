pub mod client;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

pub use client::WebSearch;

/// 403 Quota Exceeded / 429 Too Many Requests.
const QUOTA_STATUSES: [u16; 2] = [403, 429];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    Bing,
}

impl Provider {
    /// Tag used in result file names.
    pub fn tag(self) -> &'static str {
        match self {
            Provider::Google => "GOOGLE",
            Provider::Bing => "BING",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GOOGLE" => Ok(Provider::Google),
            "BING" => Ok(Provider::Bing),
            other => Err(format!("unknown provider tag '{}'", other)),
        }
    }
}

/// Result of a single provider query.
///
/// `status` is `None` when no HTTP response was obtained at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub status: Option<u16>,
    pub file: Option<PathBuf>,
}

impl SearchOutcome {
    pub fn saved(status: u16, file: PathBuf) -> Self {
        SearchOutcome {
            status: Some(status),
            file: Some(file),
        }
    }

    pub fn failed(status: Option<u16>) -> Self {
        SearchOutcome { status, file: None }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.status.is_some_and(|s| QUOTA_STATUSES.contains(&s))
    }
}

/// One query per call; implementations never fail, they report.
pub trait Search {
    fn search(&self, provider: Provider, term: &str) -> SearchOutcome;
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub issued: usize,
    pub saved: Vec<PathBuf>,
    pub failed: usize,
    /// Status that stopped the batch early, if any.
    pub aborted: Option<u16>,
}

/// Google takes the first `per_provider` due terms, Bing the next
/// `per_provider`.
pub fn split_terms(due: &[String], per_provider: usize) -> (Vec<String>, Vec<String>) {
    let google = due.iter().take(per_provider).cloned().collect();
    let bing = due.iter().skip(per_provider).take(per_provider).cloned().collect();
    (google, bing)
}

/// Query `terms` in order against one provider, stopping at the first quota
/// signal. Terms that fail for any other reason are skipped.
pub fn run_batch<S: Search + ?Sized>(
    searcher: &S,
    provider: Provider,
    terms: &[String],
    verbose: bool,
) -> BatchReport {
    let mut report = BatchReport::default();

    for (i, term) in terms.iter().enumerate() {
        let outcome = searcher.search(provider, term);
        report.issued += 1;

        info!(
            provider = %provider,
            term = %term,
            status = ?outcome.status,
            file = ?outcome.file,
            "Searched item"
        );
        if verbose {
            println!(
                "{} {} {} {}",
                i,
                term,
                outcome.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                outcome
                    .file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
        }

        if outcome.is_quota_exhausted() {
            warn!(provider = %provider, status = ?outcome.status, "Search quota exceeded, skipping remaining items");
            println!("Exiting {} search: quota exceeded", provider);
            report.aborted = outcome.status;
            break;
        }

        match outcome.file {
            Some(file) => report.saved.push(file),
            None => report.failed += 1,
        }
    }

    report
}
