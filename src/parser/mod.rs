pub mod extract;
pub mod words;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::history::ResultName;
use extract::{Blacklist, Snippet};
use words::{StopWords, WordCloud};

/// Display format of `DataHora`.
pub const ANNOTATION_TS_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
pub const WORD_CLOUD_ATTRIBUTE: &str = "WordCloud";

/// `Situação` column: whether the record carries a usable word cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationStatus {
    Usable,
    Unusable,
}

impl AnnotationStatus {
    pub fn code(self) -> i8 {
        match self {
            AnnotationStatus::Usable => 1,
            AnnotationStatus::Unusable => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub id: Uuid,
    pub timestamp: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub certification: Option<String>,
    pub attribute: Option<String>,
    pub value: Option<String>,
    pub status: AnnotationStatus,
}

impl AnnotationRecord {
    /// Record for a file that could not be read or decoded.
    pub fn malformed(id: Uuid) -> Self {
        AnnotationRecord {
            id,
            timestamp: None,
            host: None,
            user: None,
            certification: None,
            attribute: None,
            value: None,
            status: AnnotationStatus::Unusable,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == AnnotationStatus::Usable
    }
}

/// Machine and account the annotations are attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub host: String,
    pub user: String,
}

impl Operator {
    pub fn from_env() -> Self {
        Operator {
            host: whoami::fallible::hostname().unwrap_or_else(|_| whoami::devicename()),
            user: whoami::username(),
        }
    }
}

pub struct ParseOptions {
    pub blacklist: Blacklist,
    pub stop_words: StopWords,
    pub max_words: usize,
    pub bing_max_items: Option<usize>,
    pub operator: Operator,
}

/// Where settled result files go.
#[derive(Debug, Clone)]
pub struct ResultDirs {
    pub parsed: PathBuf,
    pub error: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Parsed,
    Error,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Parsed => "parsed",
            FileState::Error => "error",
        })
    }
}

/// A raw result file that has not been consumed yet.
#[derive(Debug)]
pub struct PendingResult {
    path: PathBuf,
    name: Option<ResultName>,
    id: Uuid,
    /// Names that already carry an id are history files and are not moved.
    movable: bool,
}

/// A consumed result file and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledResult {
    pub origin: PathBuf,
    pub path: PathBuf,
    pub state: FileState,
    pub moved: bool,
}

impl PendingResult {
    /// Names that are not valid UTF-8 or do not decode are quarantined like
    /// undecodable content.
    pub fn open(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| ResultName::parse(n).unwrap_or(None));
        let (id, movable) = match name.as_ref().and_then(|n| n.result_id) {
            Some(id) => (id, false),
            None => (Uuid::new_v4(), true),
        };
        PendingResult {
            path: path.to_path_buf(),
            name,
            id,
            movable,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&ResultName> {
        self.name.as_ref()
    }

    pub fn into_parsed(self, dirs: &ResultDirs) -> Result<SettledResult> {
        self.settle(&dirs.parsed, FileState::Parsed)
    }

    pub fn into_error(self, dirs: &ResultDirs) -> Result<SettledResult> {
        self.settle(&dirs.error, FileState::Error)
    }

    fn settle(self, dir: &Path, state: FileState) -> Result<SettledResult> {
        if !self.movable {
            return Ok(SettledResult {
                origin: self.path.clone(),
                path: self.path,
                state,
                moved: false,
            });
        }
        fs::create_dir_all(dir)?;
        let target = dir.join(self.settled_name());
        if target.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{:?} already exists", target),
            )));
        }
        fs::rename(&self.path, &target)?;
        debug!(from = ?self.path, to = ?target, %state, "Settled result file");
        Ok(SettledResult {
            origin: self.path,
            path: target,
            state,
            moved: true,
        })
    }

    fn settled_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone().with_id(self.id).file_name(),
            None => {
                let stem = self
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}_{}.json", stem, self.id)
            }
        }
    }
}

/// Outcome of consuming one result file.
#[derive(Debug, Clone)]
pub struct ParsedResult {
    pub record: AnnotationRecord,
    pub file: SettledResult,
    pub name: Option<ResultName>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudPayload<'a> {
    meta_data: Value,
    searched_word: &'a str,
    cloud_of_words: &'a WordCloud,
}

/// Consume a raw result file: settle it into the parsed or error directory and
/// build its annotation. Only filesystem failures while moving are errors.
pub fn parse_result_file(path: &Path, dirs: &ResultDirs, opts: &ParseOptions) -> Result<ParsedResult> {
    let pending = PendingResult::open(path);
    let id = pending.id();
    let name = pending.name().cloned();

    let payload = fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok());
    let (Some(payload), Some(name)) = (payload, name.clone()) else {
        let file = pending.into_error(dirs)?;
        return Ok(ParsedResult {
            record: AnnotationRecord::malformed(id),
            file,
            name,
        });
    };

    let file = pending.into_parsed(dirs)?;
    let snippets = extract::extract(name.provider, &payload, &opts.blacklist, opts.bing_max_items)
        .unwrap_or_default();
    let record = build_record(id, &name, &snippets, opts)?;

    Ok(ParsedResult {
        record,
        file,
        name: Some(name),
    })
}

fn build_record(
    id: Uuid,
    name: &ResultName,
    snippets: &[Snippet],
    opts: &ParseOptions,
) -> Result<AnnotationRecord> {
    let mut text = String::new();
    for hit in snippets {
        for line in [&hit.title, &hit.text].into_iter().flatten() {
            text.push_str(line);
            text.push('\n');
        }
    }
    let cloud = words::word_cloud(&text, &opts.stop_words, opts.max_words);

    let (value, status) = if cloud.is_empty() {
        (String::new(), AnnotationStatus::Unusable)
    } else {
        let mut sites: Vec<&str> = Vec::new();
        for hit in snippets {
            if !sites.contains(&hit.site.as_str()) {
                sites.push(&hit.site);
            }
        }
        let payload = CloudPayload {
            meta_data: json!({
                "searchEngine": name.provider.tag(),
                "searchDate": name.searched_at.format(ANNOTATION_TS_FORMAT).to_string(),
                "results": snippets.len(),
                "sites": sites,
            }),
            searched_word: &name.term,
            cloud_of_words: &cloud,
        };
        (serde_json::to_string(&payload)?, AnnotationStatus::Usable)
    };

    Ok(AnnotationRecord {
        id,
        timestamp: Some(name.searched_at.format(ANNOTATION_TS_FORMAT).to_string()),
        host: Some(opts.operator.host.clone()),
        user: Some(opts.operator.user.clone()),
        certification: Some(format_certification(&name.term)),
        attribute: Some(WORD_CLOUD_ATTRIBUTE.to_string()),
        value: Some(value),
        status,
    })
}

/// `12342100170` → `01234-21-00170`. Values that are not a certification
/// number of up to twelve digits are returned unchanged.
pub fn format_certification(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > 12 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    let padded = format!("{:0>12}", raw);
    format!("{}-{}-{}", &padded[..5], &padded[5..7], &padded[7..])
}
