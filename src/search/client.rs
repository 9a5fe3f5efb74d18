use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Provider, Search, SearchOutcome};
use crate::error::{Error, Result};
use crate::history::ResultName;
use crate::settings::Credentials;

/// Google Custom Search returns at most 10 results per request.
const GOOGLE_MAX_RESULTS: u32 = 10;
/// Bing Web Search returns at most 50 results per request.
const BING_MAX_RESULTS: u32 = 50;

/// Blocking client for both providers; raw bodies land in `pending_dir`.
pub struct WebSearch {
    client: Client,
    credentials: Credentials,
    pending_dir: PathBuf,
}

impl WebSearch {
    pub fn new(credentials: Credentials, pending_dir: impl Into<PathBuf>) -> Result<Self> {
        let pending_dir = pending_dir.into();
        fs::create_dir_all(&pending_dir)?;
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        Ok(WebSearch {
            client,
            credentials,
            pending_dir,
        })
    }

    fn request(&self, provider: Provider, term: &str) -> RequestBuilder {
        match provider {
            Provider::Google => {
                let google = &self.credentials.google_search;
                let num = GOOGLE_MAX_RESULTS.to_string();
                self.client.get(&google.google_search_endpoint).query(&[
                    ("q", term),
                    ("key", google.google_search_api_key.as_str()),
                    ("cx", google.google_search_engine_id.as_str()),
                    ("num", num.as_str()),
                    ("cr", "countryBR"),
                    ("lr", "lang_pt"),
                ])
            }
            Provider::Bing => {
                let bing = &self.credentials.bing_search;
                let count = BING_MAX_RESULTS.to_string();
                self.client
                    .get(&bing.bing_search_endpoint)
                    .header("Ocp-Apim-Subscription-Key", bing.bing_search_api_key.as_str())
                    .query(&[
                        ("q", term),
                        ("cc", "BR"),
                        ("count", count.as_str()),
                        ("mkt", "pt-BR"),
                        ("responseFilter", "Webpages"),
                    ])
            }
        }
    }
}

impl Search for WebSearch {
    fn search(&self, provider: Provider, term: &str) -> SearchOutcome {
        let response = match self.request(provider, term).send() {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %provider, term, error = %e, "Search request failed");
                return SearchOutcome::failed(e.status().map(|s| s.as_u16()));
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(provider = %provider, term, status, "Search returned an error status");
            return SearchOutcome::failed(Some(status));
        }

        let body: Value = match response.json() {
            Ok(v) => v,
            Err(e) => {
                warn!(provider = %provider, term, error = %e, "Search body is not JSON");
                return SearchOutcome::failed(Some(status));
            }
        };

        match persist_raw(&self.pending_dir, provider, term, &body) {
            Ok(path) => SearchOutcome::saved(status, path),
            Err(e) => {
                warn!(provider = %provider, term, error = %e, "Could not save search result");
                SearchOutcome::failed(Some(status))
            }
        }
    }
}

/// Save a raw provider body as `<ts>_<PROVIDER>_<term>.json`.
///
/// The body is written to a `.part` sibling and renamed, so readers never see
/// a half-written result.
pub fn persist_raw(dir: &Path, provider: Provider, term: &str, body: &Value) -> Result<PathBuf> {
    persist_raw_at(dir, provider, term, body, Local::now().naive_local())
}

fn persist_raw_at(
    dir: &Path,
    provider: Provider,
    term: &str,
    body: &Value,
    mut stamp: NaiveDateTime,
) -> Result<PathBuf> {
    if term.is_empty() || term.contains(['/', '\\']) {
        return Err(Error::ResultName(term.to_string()));
    }
    fs::create_dir_all(dir)?;

    let mut target = dir.join(ResultName::new(stamp, provider, term).file_name());
    while target.exists() {
        stamp += chrono::Duration::microseconds(1);
        target = dir.join(ResultName::new(stamp, provider, term).file_name());
    }

    let partial = target.with_extension("json.part");
    {
        let mut writer = BufWriter::new(File::create(&partial)?);
        serde_json::to_writer_pretty(&mut writer, body)?;
        writer.flush()?;
    }
    fs::rename(&partial, &target)?;
    debug!(file = ?target, "Saved raw search result");
    Ok(target)
}
