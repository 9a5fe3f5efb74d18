use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::Local;
use rust_xlsxwriter::{Format, Workbook};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::parser::AnnotationRecord;

pub const LEDGER_COLUMNS: [&str; 8] = [
    "ID",
    "DataHora",
    "Computador",
    "Usuário",
    "Homologação",
    "Atributo",
    "Valor",
    "Situação",
];

const LEDGER_NAME_FORMAT: &str = "Annotation_%Y.%m.%d_T%H.%M.%S.xlsx";

/// Successful outcomes of [`publish`]; write failures come back as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { path: PathBuf, rows: usize },
    NothingToPublish,
}

/// Write usable records not present in `previous` as a new ledger snapshot.
pub fn publish(
    records: &[AnnotationRecord],
    ledger_dir: &Path,
    previous: Option<&Path>,
) -> Result<PublishOutcome> {
    let known = match previous {
        Some(path) if path.exists() => published_ids(path)?,
        Some(path) => {
            debug!(path = ?path, "Previous ledger not found, nothing to exclude");
            HashSet::new()
        }
        None => HashSet::new(),
    };

    let fresh: Vec<&AnnotationRecord> = records
        .iter()
        .filter(|r| r.is_usable())
        .filter(|r| !known.contains(&r.id.to_string()))
        .collect();

    if fresh.is_empty() {
        info!(candidates = records.len(), "Nothing to publish");
        return Ok(PublishOutcome::NothingToPublish);
    }

    fs::create_dir_all(ledger_dir)?;
    let path = ledger_dir.join(Local::now().format(LEDGER_NAME_FORMAT).to_string());
    write_ledger(&path, &fresh)?;
    info!(path = ?path, rows = fresh.len(), "Annotation ledger saved");
    Ok(PublishOutcome::Published {
        path,
        rows: fresh.len(),
    })
}

fn write_ledger(path: &Path, records: &[&AnnotationRecord]) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, title) in LEDGER_COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, record.id.to_string())?;
        let text_cells = [
            &record.timestamp,
            &record.host,
            &record.user,
            &record.certification,
            &record.attribute,
            &record.value,
        ];
        for (offset, cell) in text_cells.iter().enumerate() {
            if let Some(text) = cell {
                sheet.write_string(row, offset as u16 + 1, text)?;
            }
        }
        sheet.write_number(row, 7, f64::from(record.status.code()))?;
    }

    workbook.save(path)?;
    Ok(())
}

/// Identifiers already present in a ledger file's `ID` column.
pub fn published_ids(path: &Path) -> Result<HashSet<String>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok(HashSet::new()),
    };

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(HashSet::new());
    };
    let id_col = header
        .iter()
        .position(|c| matches!(c, Data::String(s) if s.trim() == LEDGER_COLUMNS[0]))
        .ok_or_else(|| Error::Config(format!("ledger {:?} has no ID column", path)))?;

    Ok(rows
        .filter_map(|row| row.get(id_col))
        .map(|cell| cell.to_string())
        .filter(|id| !id.is_empty())
        .collect())
}
