//! Result file naming and the search history derived from it.
//!
//! Every raw result is stored as `<timestamp>_<PROVIDER>_<term>[_<uuid>].json`
//! where the timestamp is `%Y%m%d%H%M%S` followed by six microsecond digits.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::search::Provider;

pub const RESULT_TS_FORMAT: &str = "%Y%m%d%H%M%S%6f";

const NAME_PATTERN: &str = r"^(\d{20})_(GOOGLE|BING)_(.+?)(?:_([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}))?\.json$";

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_PATTERN).unwrap())
}

/// Decoded result file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultName {
    pub searched_at: NaiveDateTime,
    pub provider: Provider,
    pub term: String,
    pub result_id: Option<Uuid>,
}

impl ResultName {
    pub fn new(searched_at: NaiveDateTime, provider: Provider, term: &str) -> Self {
        ResultName {
            searched_at,
            provider,
            term: term.to_string(),
            result_id: None,
        }
    }

    /// `Ok(None)` when the name does not follow the scheme at all; an error when
    /// it does but the timestamp is not a real instant.
    pub fn parse(file_name: &str) -> Result<Option<Self>> {
        let Some(caps) = name_re().captures(file_name) else {
            return Ok(None);
        };
        let searched_at = parse_result_ts(&caps[1])
            .ok_or_else(|| Error::ResultName(file_name.to_string()))?;
        let provider = caps[2]
            .parse::<Provider>()
            .map_err(|_| Error::ResultName(file_name.to_string()))?;
        let result_id = match caps.get(4) {
            Some(m) => Some(
                Uuid::parse_str(m.as_str()).map_err(|_| Error::ResultName(file_name.to_string()))?,
            ),
            None => None,
        };
        Ok(Some(ResultName {
            searched_at,
            provider,
            term: caps[3].to_string(),
            result_id,
        }))
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.result_id = Some(id);
        self
    }

    pub fn file_name(&self) -> String {
        let ts = self.searched_at.format(RESULT_TS_FORMAT);
        match self.result_id {
            Some(id) => format!("{}_{}_{}_{}.json", ts, self.provider.tag(), self.term, id),
            None => format!("{}_{}_{}.json", ts, self.provider.tag(), self.term),
        }
    }
}

/// Decode the fixed 20 digit timestamp; seconds precision plus microseconds.
pub fn parse_result_ts(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() != 20 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (secs, micros) = raw.split_at(14);
    let base = NaiveDateTime::parse_from_str(secs, "%Y%m%d%H%M%S").ok()?;
    let micros: u32 = micros.parse().ok()?;
    base.with_nanosecond(micros * 1_000)
}

/// When a certification number was last searched, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHistoryEntry {
    pub searched_at: NaiveDateTime,
    pub provider: Provider,
    pub term: String,
    pub result_id: Option<Uuid>,
}

impl From<ResultName> for SearchHistoryEntry {
    fn from(name: ResultName) -> Self {
        SearchHistoryEntry {
            searched_at: name.searched_at,
            provider: name.provider,
            term: name.term,
            result_id: name.result_id,
        }
    }
}

/// Read every identified result file under `dir`.
///
/// Only `*.json` names carrying a result identifier are history; anything else
/// in the directory is ignored. A missing directory means no history.
pub fn scan_dir(dir: &Path) -> Result<Vec<SearchHistoryEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(name) = ResultName::parse(file_name)? {
            if name.result_id.is_some() {
                entries.push(SearchHistoryEntry::from(name));
            }
        }
    }
    Ok(entries)
}

/// Keep only the most recent search per certification number.
pub fn latest_by_term(
    entries: impl IntoIterator<Item = SearchHistoryEntry>,
) -> HashMap<String, SearchHistoryEntry> {
    let mut latest: HashMap<String, SearchHistoryEntry> = HashMap::new();
    for entry in entries {
        match latest.get(&entry.term) {
            Some(existing) if existing.searched_at >= entry.searched_at => {}
            _ => {
                latest.insert(entry.term.clone(), entry);
            }
        }
    }
    latest
}
