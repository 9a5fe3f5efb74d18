use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{Duration, Local, NaiveDate};
use csv::{ReaderBuilder, StringRecord};
use itertools::Itertools;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::history::{self, SearchHistoryEntry};

/// Product category of interest in the SCH export.
pub const TARGET_CATEGORY: &str = "2";

const CATALOG_DATE_FORMAT: &str = "%d/%m/%Y";
const NAME_SEPARATOR: &str = " | ";

// Column offsets in the SCH export.
const COL_CERTIFIED_ON: usize = 0;
const COL_CERTIFICATION: usize = 1;
const COL_MANUFACTURER: usize = 11;
const COL_MODEL: usize = 12;
const COL_COMMERCIAL_NAME: usize = 13;
const COL_CATEGORY: usize = 14;
const COL_PRODUCT_TYPE: usize = 15;
const MIN_COLUMNS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastSearched {
    Never,
    At(SearchHistoryEntry),
}

impl LastSearched {
    pub fn is_never(&self) -> bool {
        matches!(self, LastSearched::Never)
    }
}

impl fmt::Display for LastSearched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastSearched::Never => f.write_str("-1"),
            LastSearched::At(entry) => write!(f, "{}", entry.searched_at.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub certified_on: NaiveDate,
    pub certification: String,
    pub manufacturer: String,
    pub category: String,
    pub product_type: String,
    pub models: String,
    pub commercial_names: String,
    pub last_searched: LastSearched,
}

/// Load the catalog, join it with the result files found in `history_dir`
/// plus any `extra_history` (e.g. from the manifest) and apply the grace
/// period relative to today.
pub fn reconcile(
    catalog_path: &Path,
    history_dir: Option<&Path>,
    extra_history: Vec<SearchHistoryEntry>,
    grace_period_days: u32,
) -> Result<Vec<CatalogItem>> {
    let mut history = match history_dir {
        Some(dir) => history::scan_dir(dir)?,
        None => Vec::new(),
    };
    history.extend(extra_history);
    reconcile_with(
        catalog_path,
        history,
        grace_period_days,
        Local::now().date_naive(),
    )
}

/// Same as [`reconcile`] with the history supplied by the caller.
pub fn reconcile_with(
    catalog_path: &Path,
    history: Vec<SearchHistoryEntry>,
    grace_period_days: u32,
    today: NaiveDate,
) -> Result<Vec<CatalogItem>> {
    let mut items = load(catalog_path)?;
    info!(items = items.len(), path = ?catalog_path, "Loaded catalog");

    if grace_period_days > 0 {
        let limit = today - Duration::days(i64::from(grace_period_days));
        items.retain(|item| item.certified_on <= limit);
        debug!(%limit, remaining = items.len(), "Applied grace period");
    }

    let mut latest = history::latest_by_term(history);
    for item in items.iter_mut() {
        if let Some(entry) = latest.remove(&item.certification) {
            item.last_searched = LastSearched::At(entry);
        }
    }
    Ok(items)
}

/// Items never searched, in reconciled order.
pub fn due(items: &[CatalogItem]) -> Vec<&CatalogItem> {
    items.iter().filter(|i| i.last_searched.is_never()).collect()
}

/// Parse the `;`-delimited export: target category only, newest first, one
/// row per certification number.
pub fn load(path: &Path) -> Result<Vec<CatalogItem>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_path(path)
        .map_err(|source| Error::Catalog {
            path: path.to_path_buf(),
            source,
        })?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|source| Error::Catalog {
            path: path.to_path_buf(),
            source,
        })?;
        // header is line 1
        let row = idx as u64 + 2;
        let item = parse_row(&record, row)?;
        if item.category == TARGET_CATEGORY {
            rows.push(item);
        }
    }

    // stable: ties keep file order
    rows.sort_by(|a, b| b.certified_on.cmp(&a.certified_on));
    Ok(dedup(rows))
}

fn parse_row(record: &StringRecord, row: u64) -> Result<CatalogItem> {
    if record.len() < MIN_COLUMNS {
        return Err(Error::CatalogRow {
            row,
            reason: format!("expected at least {} columns, got {}", MIN_COLUMNS, record.len()),
        });
    }
    let field = |col: usize| record.get(col).unwrap_or_default().trim().to_string();

    let raw_date = field(COL_CERTIFIED_ON);
    // some exports carry a time part after the date
    let date_part = raw_date.split_whitespace().next().unwrap_or_default();
    let certified_on = NaiveDate::parse_from_str(date_part, CATALOG_DATE_FORMAT).map_err(|e| {
        Error::CatalogRow {
            row,
            reason: format!("bad certification date '{}': {}", raw_date, e),
        }
    })?;

    let certification = field(COL_CERTIFICATION);
    if certification.is_empty() {
        return Err(Error::CatalogRow {
            row,
            reason: "missing certification number".into(),
        });
    }

    Ok(CatalogItem {
        certified_on,
        certification,
        manufacturer: field(COL_MANUFACTURER),
        category: field(COL_CATEGORY),
        product_type: field(COL_PRODUCT_TYPE),
        models: field(COL_MODEL),
        commercial_names: field(COL_COMMERCIAL_NAME),
        last_searched: LastSearched::Never,
    })
}

/// Collapse rows sharing a certification number into the first (newest) one,
/// appending the distinct model and commercial names of the others.
fn dedup(rows: Vec<CatalogItem>) -> Vec<CatalogItem> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<CatalogItem>> = HashMap::new();
    for row in rows {
        if !groups.contains_key(&row.certification) {
            order.push(row.certification.clone());
        }
        groups.entry(row.certification.clone()).or_default().push(row);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(|group| {
            let models = join_distinct(group.iter().map(|r| r.models.as_str()));
            let names = join_distinct(group.iter().map(|r| r.commercial_names.as_str()));
            let mut first = group.into_iter().next()?;
            first.models = models;
            first.commercial_names = names;
            Some(first)
        })
        .collect()
}

fn join_distinct<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .flat_map(|v| v.split(NAME_SEPARATOR.trim()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unique()
        .join(NAME_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ResultName;
    use crate::search::Provider;
    use std::collections::HashSet;
    use std::fs;
    use uuid::Uuid;

    const FIXTURE: &str = "tests/fixtures/catalog.csv";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    #[test]
    fn loads_target_category_newest_first() {
        let items = load(Path::new(FIXTURE)).unwrap();
        assert!(items.iter().all(|i| i.category == TARGET_CATEGORY));
        assert!(items
            .windows(2)
            .all(|w| w[0].certified_on >= w[1].certified_on));
        assert!(!items.iter().any(|i| i.certification == "099990000001"));
    }

    #[test]
    fn certification_numbers_are_unique() {
        let items = load(Path::new(FIXTURE)).unwrap();
        let unique: HashSet<_> = items.iter().map(|i| &i.certification).collect();
        assert_eq!(unique.len(), items.len());
    }

    #[test]
    fn most_recent_metadata_wins_and_models_concatenate() {
        let items = load(Path::new(FIXTURE)).unwrap();
        let item = items
            .iter()
            .find(|i| i.certification == "012342100170")
            .unwrap();
        assert_eq!(item.certified_on, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(item.manufacturer, "Acme Telecom Ltda");
        assert_eq!(item.models, "AX-200 | AX-100");
    }

    #[test]
    fn grace_period_excludes_recent_items() {
        let items = reconcile_with(Path::new(FIXTURE), Vec::new(), 180, today()).unwrap();
        let limit = today() - Duration::days(180);
        assert!(!items.is_empty());
        assert!(items.iter().all(|i| i.certified_on <= limit));

        let all = reconcile_with(Path::new(FIXTURE), Vec::new(), 0, today()).unwrap();
        assert!(all.len() > items.len());
    }

    #[test]
    fn history_marks_searched_items() {
        let dir = tempfile::tempdir().unwrap();
        let searched_at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let name = ResultName::new(searched_at, Provider::Google, "012342100170")
            .with_id(Uuid::new_v4());
        fs::write(dir.path().join(name.file_name()), "{}").unwrap();

        let items = reconcile(Path::new(FIXTURE), Some(dir.path()), Vec::new(), 0).unwrap();
        let searched = items
            .iter()
            .find(|i| i.certification == "012342100170")
            .unwrap();
        match &searched.last_searched {
            LastSearched::At(entry) => {
                assert_eq!(entry.searched_at, searched_at);
                assert_eq!(entry.provider, Provider::Google);
            }
            LastSearched::Never => panic!("expected a history entry"),
        }
        assert_eq!(due(&items).len(), items.len() - 1);
        assert_eq!(items.len(), load(Path::new(FIXTURE)).unwrap().len());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let searched_at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        for term in ["012342100170", "158572200160"] {
            let name = ResultName::new(searched_at, Provider::Bing, term).with_id(Uuid::new_v4());
            fs::write(dir.path().join(name.file_name()), "{}").unwrap();
        }
        let first = reconcile(Path::new(FIXTURE), Some(dir.path()), Vec::new(), 0).unwrap();
        let second = reconcile(Path::new(FIXTURE), Some(dir.path()), Vec::new(), 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn extra_history_marks_items_like_directory_history() {
        let dir = tempfile::tempdir().unwrap();
        let searched_at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let name = ResultName::new(searched_at, Provider::Google, "158572200160")
            .with_id(Uuid::new_v4());
        fs::write(dir.path().join(name.file_name()), "{}").unwrap();

        let from_dir = reconcile(Path::new(FIXTURE), Some(dir.path()), Vec::new(), 0).unwrap();
        let from_extra = reconcile(
            Path::new(FIXTURE),
            None,
            vec![SearchHistoryEntry::from(name)],
            0,
        )
        .unwrap();
        assert_eq!(from_dir, from_extra);
        assert!(!due(&from_extra)
            .iter()
            .any(|i| i.certification == "158572200160"));
    }

    #[test]
    fn without_history_everything_is_due() {
        let items = reconcile(Path::new(FIXTURE), None, Vec::new(), 0).unwrap();
        assert!(items.iter().all(|i| i.last_searched.is_never()));
        assert_eq!(items[0].last_searched.to_string(), "-1");
    }

    #[test]
    fn malformed_row_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let header = (0..16).map(|i| format!("c{}", i)).collect::<Vec<_>>().join(";");
        let row = "31/02/2024;1;;;;;;;;;;Maker;M;N;2;Phone";
        fs::write(&path, format!("{}\n{}\n", header, row)).unwrap();
        assert!(matches!(load(&path), Err(Error::CatalogRow { row: 2, .. })));
    }

    #[test]
    fn missing_catalog_is_fatal() {
        let err = load(Path::new("tests/fixtures/does-not-exist.csv"));
        assert!(matches!(err, Err(Error::Catalog { .. })));
    }
}
