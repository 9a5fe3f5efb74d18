use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::search::Provider;

/// Domain suffixes whose results are ignored.
#[derive(Debug, Clone, Default)]
pub struct Blacklist(Vec<String>);

impl Blacklist {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Blacklist(suffixes.into_iter().map(Into::into).collect())
    }

    /// Newline-delimited suffixes; `#` starts a comment line. A missing file
    /// yields an empty list, which disables filtering.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Blacklist::new(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_lowercase),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "No blacklist file, site filtering disabled");
                Ok(Blacklist::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn blocks(&self, domain: &str) -> bool {
        self.0.iter().any(|suffix| domain.contains(suffix.as_str()))
    }
}

/// One accepted search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub site: String,
    pub title: Option<String>,
    pub text: Option<String>,
}

/// Pull accepted hits out of a provider payload.
///
/// `None` when the payload lacks the provider's result key, i.e. the search
/// found nothing.
pub fn extract(
    provider: Provider,
    payload: &Value,
    blacklist: &Blacklist,
    bing_max_items: Option<usize>,
) -> Option<Vec<Snippet>> {
    match provider {
        Provider::Google => {
            let items = payload.get("items")?.as_array()?;
            Some(
                items
                    .iter()
                    .filter_map(|item| {
                        let domain = item
                            .get("displayLink")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or_else(|| item.get("link").and_then(Value::as_str).and_then(host_of))?;
                        accept(item, &domain, "title", blacklist)
                    })
                    .collect(),
            )
        }
        Provider::Bing => {
            let pages = payload.get("webPages")?;
            let items = pages.get("value").and_then(Value::as_array)?;
            let limit = bing_max_items.unwrap_or(items.len());
            Some(
                items
                    .iter()
                    .take(limit)
                    .filter_map(|item| {
                        let domain = item.get("url").and_then(Value::as_str).and_then(host_of)?;
                        accept(item, &domain, "name", blacklist)
                    })
                    .collect(),
            )
        }
    }
}

fn accept(item: &Value, domain: &str, title_key: &str, blacklist: &Blacklist) -> Option<Snippet> {
    let domain = domain.to_lowercase();
    if blacklist.blocks(&domain) {
        return None;
    }
    let title = item.get(title_key).and_then(Value::as_str).map(str::to_string);
    let text = item
        .get("snippet")
        .and_then(Value::as_str)
        .map(str::to_string);
    if title.is_none() && text.is_none() {
        return None;
    }
    Some(Snippet {
        site: canonical_site(&domain),
        title,
        text,
    })
}

fn host_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    parsed.host_str().map(str::to_string)
}

/// Keep the last three DNS labels: `loja.exemplo.com.br` → `exemplo.com.br`.
pub fn canonical_site(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let start = labels.len().saturating_sub(3);
    labels[start..].join(".")
}
