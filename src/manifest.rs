//! SQLite index of every raw result file and the state it settled into.
//!
//! File names stay the source of truth for older runs; the manifest keeps the
//! same fields without relying on splitting names apart.

use std::fs;
use std::path::Path;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::Result;
use crate::history::{parse_result_ts, ResultName, SearchHistoryEntry, RESULT_TS_FORMAT};
use crate::parser::SettledResult;
use crate::search::Provider;

pub struct Manifest {
    conn: Connection,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ManifestStats {
    pub pending: usize,
    pub parsed: usize,
    pub error: usize,
}

impl Manifest {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let manifest = Manifest { conn };
        manifest.init_schema()?;
        Ok(manifest)
    }

    #[cfg(test)]
    fn in_memory() -> Result<Self> {
        let manifest = Manifest {
            conn: Connection::open_in_memory()?,
        };
        manifest.init_schema()?;
        Ok(manifest)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS results (
                pending_name TEXT PRIMARY KEY,
                searched_at  TEXT NOT NULL,
                provider     TEXT NOT NULL,
                term         TEXT NOT NULL,
                state        TEXT NOT NULL DEFAULT 'pending'
                             CHECK(state IN ('pending','parsed','error')),
                result_id    TEXT,
                location     TEXT,
                status       INTEGER,
                updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_results_term ON results(term);
            CREATE INDEX IF NOT EXISTS idx_results_state ON results(state);
            ",
        )?;
        Ok(())
    }

    /// Register a freshly saved raw result.
    pub fn record_search(&self, name: &ResultName) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO results (pending_name, searched_at, provider, term)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name.file_name(),
                name.searched_at.format(RESULT_TS_FORMAT).to_string(),
                name.provider.tag(),
                name.term,
            ],
        )?;
        Ok(())
    }

    /// Mark a result as consumed. Files never registered (e.g. saved by an
    /// older run) are added on the way.
    pub fn record_settled(
        &self,
        name: &ResultName,
        settled: &SettledResult,
        result_id: Uuid,
        status: i8,
    ) -> Result<()> {
        self.record_search(name)?;
        self.conn.execute(
            "UPDATE results
             SET state = ?2, result_id = ?3, location = ?4, status = ?5, updated_at = datetime('now')
             WHERE pending_name = ?1",
            params![
                name.file_name(),
                settled.state.to_string(),
                result_id.to_string(),
                settled.path.to_string_lossy().into_owned(),
                status,
            ],
        )?;
        Ok(())
    }

    /// Searches whose result was parsed, the same set a history directory
    /// scan yields. Pending and quarantined results leave the term due.
    pub fn history(&self) -> Result<Vec<SearchHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT searched_at, provider, term, result_id FROM results WHERE state = 'parsed'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (searched_at, provider, term, result_id) = row?;
            // rows written by this module always decode; skip anything else
            let (Some(searched_at), Ok(provider)) = (parse_result_ts(&searched_at), provider.parse::<Provider>())
            else {
                continue;
            };
            entries.push(SearchHistoryEntry {
                searched_at,
                provider,
                term,
                result_id: result_id.and_then(|id| Uuid::parse_str(&id).ok()),
            });
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<ManifestStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM results GROUP BY state")?;
        let mut rows = stmt.query([])?;
        let mut stats = ManifestStats::default();
        while let Some(row) = rows.next()? {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = count as usize;
            match state.as_str() {
                "pending" => stats.pending = count,
                "parsed" => stats.parsed = count,
                "error" => stats.error = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FileState;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn name(day: u32, provider: Provider, term: &str) -> ResultName {
        let at = NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_micro_opt(12, 0, 0, 17)
            .unwrap();
        ResultName::new(at, provider, term)
    }

    fn settled(state: FileState) -> SettledResult {
        SettledResult {
            origin: PathBuf::from("results/x.json"),
            path: PathBuf::from("history/x.json"),
            state,
            moved: true,
        }
    }

    #[test]
    fn tracks_state_transitions() {
        let manifest = Manifest::in_memory().unwrap();
        let a = name(1, Provider::Google, "111");
        let b = name(2, Provider::Bing, "222");
        let c = name(3, Provider::Google, "333");
        for n in [&a, &b, &c] {
            manifest.record_search(n).unwrap();
        }
        manifest
            .record_settled(&a, &settled(FileState::Parsed), Uuid::new_v4(), 1)
            .unwrap();
        manifest
            .record_settled(&b, &settled(FileState::Error), Uuid::new_v4(), -1)
            .unwrap();

        assert_eq!(
            manifest.stats().unwrap(),
            ManifestStats {
                pending: 1,
                parsed: 1,
                error: 1
            }
        );
    }

    #[test]
    fn history_round_trips_fields() {
        let manifest = Manifest::in_memory().unwrap();
        let a = name(1, Provider::Google, "term_with_underscore");
        let id = Uuid::new_v4();
        manifest
            .record_settled(&a, &settled(FileState::Parsed), id, 1)
            .unwrap();

        let history = manifest.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].term, "term_with_underscore");
        assert_eq!(history[0].searched_at, a.searched_at);
        assert_eq!(history[0].provider, Provider::Google);
        assert_eq!(history[0].result_id, Some(id));
    }

    #[test]
    fn only_parsed_results_count_as_history() {
        let manifest = Manifest::in_memory().unwrap();
        let parsed = name(1, Provider::Google, "111");
        let quarantined = name(2, Provider::Google, "222");
        let pending = name(3, Provider::Bing, "333");
        manifest.record_search(&pending).unwrap();
        manifest
            .record_settled(&parsed, &settled(FileState::Parsed), Uuid::new_v4(), 1)
            .unwrap();
        manifest
            .record_settled(&quarantined, &settled(FileState::Error), Uuid::new_v4(), -1)
            .unwrap();

        let terms: Vec<String> = manifest.history().unwrap().into_iter().map(|e| e.term).collect();
        assert_eq!(terms, vec!["111".to_string()]);
    }

    #[test]
    fn opens_on_disk_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("manifest.sqlite");
        {
            let manifest = Manifest::open(&path).unwrap();
            manifest.record_search(&name(1, Provider::Google, "111")).unwrap();
        }
        let manifest = Manifest::open(&path).unwrap();
        assert_eq!(manifest.stats().unwrap().pending, 1);
    }
}
