mod catalog;
mod error;
mod history;
mod ledger;
mod manifest;
mod parser;
mod search;
mod settings;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use catalog::CatalogItem;
use ledger::PublishOutcome;
use manifest::Manifest;
use parser::extract::Blacklist;
use parser::words::StopWords;
use parser::{AnnotationRecord, Operator, ParseOptions, ResultDirs};
use search::{Provider, WebSearch};
use settings::{Credentials, Settings};

#[derive(Parser)]
#[command(name = "sch_websearch", about = "Search certified products and annotate them with word clouds")]
struct Cli {
    /// Settings file with a [SCHWEBSEARCH] section
    #[arg(short, long, default_value = "websearch_config.ini")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search due items on both providers, annotate the results, publish
    Run {
        /// Items per provider (default: total_items_to_query from settings)
        #[arg(short = 'n', long)]
        total_items: Option<usize>,
        /// Days a certification must age before it is searched
        #[arg(short, long)]
        grace_period: Option<u32>,
        /// Print every searched item and show parse progress
        #[arg(short, long)]
        verbose: bool,
    },
    /// List catalog items that were never searched
    Due {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(short, long)]
        grace_period: Option<u32>,
    },
    /// Parse pending result files and publish the annotations (no network)
    Annotate {
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show result file counts
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to read settings from {:?}", cli.config))?;
    info!(started = %Local::now().format("%d/%m/%Y %H:%M:%S"), ?settings, "Execution started");

    let result = match cli.command {
        Commands::Run {
            total_items,
            grace_period,
            verbose,
        } => {
            let total = total_items.unwrap_or(settings.total_items_to_query);
            let grace = grace_period.unwrap_or(settings.grace_period);
            run(&settings, total, grace, verbose)
        }
        Commands::Due {
            limit,
            grace_period,
        } => {
            let manifest = open_manifest(&settings)?;
            let grace = grace_period.unwrap_or(settings.grace_period);
            let items = reconcile(&settings, manifest.as_ref(), grace)?;
            let due = catalog::due(&items);
            if due.is_empty() {
                println!("Nothing due: every eligible item was already searched.");
                return Ok(());
            }
            print_due(&due, limit);
            println!("\n{} of {} eligible items never searched", due.len(), items.len());
            Ok(())
        }
        Commands::Annotate { verbose } => {
            let manifest = open_manifest(&settings)?;
            let records = annotate_pending(&settings, manifest.as_ref(), verbose)?;
            publish_records(&settings, &records)
        }
        Commands::Stats => {
            let manifest = open_manifest(&settings)?;
            println!("Pending:  {}", count_results(&settings.search_results_folder)?);
            println!("History:  {}", count_results(&settings.search_history_folder)?);
            println!("Errors:   {}", count_results(&settings.error_results_folder)?);
            if let Some(m) = manifest {
                let s = m.stats()?;
                println!(
                    "Manifest: {} pending, {} parsed, {} error",
                    s.pending, s.parsed, s.error
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    info!(elapsed = %format_duration(elapsed), "Execution completed");
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run(settings: &Settings, total: usize, grace: u32, verbose: bool) -> anyhow::Result<()> {
    // credentials first: nothing goes out over the network without them
    let creds_path = settings.credentials_path()?;
    let credentials = Credentials::load(creds_path)
        .with_context(|| format!("Failed to read credentials from {:?}", creds_path))?;
    let manifest = open_manifest(settings)?;

    let items = reconcile(settings, manifest.as_ref(), grace)?;
    let due: Vec<String> = catalog::due(&items)
        .into_iter()
        .map(|i| i.certification.clone())
        .collect();
    info!(eligible = items.len(), due = due.len(), "Reconciled catalog");

    let (google_terms, bing_terms) = search::split_terms(&due, total);

    let searcher = WebSearch::new(credentials, &settings.search_results_folder)?;
    for (provider, terms) in [(Provider::Google, &google_terms), (Provider::Bing, &bing_terms)] {
        if terms.is_empty() {
            continue;
        }
        let t = Instant::now();
        let report = search::run_batch(&searcher, provider, terms, verbose);
        if let Some(m) = manifest.as_ref() {
            for file in &report.saved {
                let name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(history::ResultName::parse)
                    .transpose()?
                    .flatten();
                if let Some(name) = name {
                    m.record_search(&name)?;
                }
            }
        }
        println!(
            "{}: {} queries, {} saved, {} failed in {:.1}s{}",
            provider,
            report.issued,
            report.saved.len(),
            report.failed,
            t.elapsed().as_secs_f64(),
            if report.aborted.is_some() { " (quota exceeded)" } else { "" }
        );
    }

    let records = annotate_pending(settings, manifest.as_ref(), verbose)?;
    publish_records(settings, &records)
}

fn open_manifest(settings: &Settings) -> anyhow::Result<Option<Manifest>> {
    settings
        .manifest_file
        .as_deref()
        .map(|path| {
            Manifest::open(path).with_context(|| format!("Failed to open manifest {:?}", path))
        })
        .transpose()
}

fn reconcile(
    settings: &Settings,
    manifest: Option<&Manifest>,
    grace: u32,
) -> anyhow::Result<Vec<CatalogItem>> {
    let extra = match manifest {
        Some(m) => m.history()?,
        None => Vec::new(),
    };
    let items = catalog::reconcile(
        &settings.sch_database_file,
        Some(&settings.search_history_folder),
        extra,
        grace,
    )
    .with_context(|| format!("Failed to reconcile catalog {:?}", settings.sch_database_file))?;
    Ok(items)
}

fn parse_options(settings: &Settings) -> anyhow::Result<ParseOptions> {
    let blacklist = match settings.blacklist_file.as_deref() {
        Some(path) => Blacklist::load(path)
            .with_context(|| format!("Failed to read blacklist {:?}", path))?,
        None => Blacklist::default(),
    };
    if blacklist.is_empty() {
        info!("No blacklisted sites, every result is kept");
    }
    Ok(ParseOptions {
        blacklist,
        stop_words: StopWords::portuguese(),
        max_words: settings.max_words,
        bing_max_items: settings.bing_max_items,
        operator: Operator::from_env(),
    })
}

fn pending_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry.with_context(|| format!("Failed to list {:?}", dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Consume every pending result file; each one is settled exactly once.
fn annotate_pending(
    settings: &Settings,
    manifest: Option<&Manifest>,
    verbose: bool,
) -> anyhow::Result<Vec<AnnotationRecord>> {
    let files = pending_files(&settings.search_results_folder)?;
    info!(files = files.len(), "Creating annotations");
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let opts = parse_options(settings)?;
    let dirs = ResultDirs {
        parsed: settings.search_history_folder.clone(),
        error: settings.error_results_folder.clone(),
    };

    let pb = if verbose {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")?
                .progress_chars("=> "),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut records = Vec::with_capacity(files.len());
    let mut unusable = 0usize;
    for file in &files {
        let parsed = parser::parse_result_file(file, &dirs, &opts)
            .with_context(|| format!("Failed to settle {:?}", file))?;
        if let (Some(m), Some(name)) = (manifest, parsed.name.as_ref()) {
            m.record_settled(name, &parsed.file, parsed.record.id, parsed.record.status.code())?;
        }
        if !parsed.record.is_usable() {
            unusable += 1;
        }
        records.push(parsed.record);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        parsed = records.len(),
        usable = records.len() - unusable,
        unusable,
        "Annotations created"
    );
    Ok(records)
}

fn publish_records(settings: &Settings, records: &[AnnotationRecord]) -> anyhow::Result<()> {
    let outcome = ledger::publish(
        records,
        &settings.annotation_folder,
        settings.actual_annotation_file.as_deref(),
    )
    .context("Error saving annotation file")?;

    match outcome {
        PublishOutcome::Published { path, rows } => {
            println!("Annotation file saved: {} ({} rows)", path.display(), rows);
        }
        PublishOutcome::NothingToPublish => {
            warn!("Annotation file not saved: empty results");
            println!("Annotation file not saved: empty results");
        }
    }
    Ok(())
}

fn print_due(items: &[&CatalogItem], limit: usize) {
    println!(
        "{:>3} | {:<12} | {:<10} | {:<24} | {:<28} | {:<20}",
        "#", "Homologação", "Data", "Fabricante", "Tipo", "Modelos"
    );
    println!("{}", "-".repeat(112));
    for (i, item) in items.iter().take(limit).enumerate() {
        println!(
            "{:>3} | {:<12} | {:<10} | {:<24} | {:<28} | {:<20}",
            i + 1,
            item.certification,
            item.certified_on.format("%d/%m/%Y"),
            truncate(&item.manufacturer, 24),
            truncate(&item.product_type, 28),
            truncate(&item.models, 20),
        );
    }
}

fn count_results(dir: &Path) -> anyhow::Result<usize> {
    Ok(pending_files(dir)?.len())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ResultName;

    struct Workspace {
        _tmp: tempfile::TempDir,
        settings: Settings,
    }

    impl Workspace {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path();
            let settings = Settings {
                sch_database_file: PathBuf::from("tests/fixtures/catalog.csv"),
                search_results_folder: root.join("results"),
                search_history_folder: root.join("history"),
                error_results_folder: root.join("errors"),
                annotation_folder: root.join("annotations"),
                actual_annotation_file: None,
                creds_file: None,
                blacklist_file: None,
                manifest_file: Some(root.join("manifest.sqlite")),
                grace_period: 0,
                total_items_to_query: 2,
                max_words: 25,
                bing_max_items: None,
            };
            fs::create_dir_all(&settings.search_results_folder).unwrap();
            Workspace { _tmp: tmp, settings }
        }

        /// Drop a pending result as the searcher would and register it.
        fn searched(&self, manifest: &Manifest, term: &str, body: &str) -> ResultName {
            let at = chrono::NaiveDate::from_ymd_opt(2024, 7, 2)
                .unwrap()
                .and_hms_micro_opt(14, 5, 9, 250)
                .unwrap();
            let name = ResultName::new(at, Provider::Google, term);
            fs::write(self.settings.search_results_folder.join(name.file_name()), body).unwrap();
            manifest.record_search(&name).unwrap();
            name
        }
    }

    fn due_terms(items: &[CatalogItem]) -> Vec<String> {
        catalog::due(items)
            .into_iter()
            .map(|i| i.certification.clone())
            .collect()
    }

    #[test]
    fn annotate_records_parsed_and_quarantined_results() {
        let ws = Workspace::new();
        let manifest = Manifest::open(ws.settings.manifest_file.as_deref().unwrap()).unwrap();
        let good = fs::read_to_string("tests/fixtures/google_results.json").unwrap();
        ws.searched(&manifest, "203450012345", &good);
        ws.searched(&manifest, "158572200160", "{ truncated");

        let records = annotate_pending(&ws.settings, Some(&manifest), false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(pending_files(&ws.settings.search_results_folder).unwrap().is_empty());

        let stats = manifest.stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.parsed, 1);
        assert_eq!(stats.error, 1);
    }

    #[test]
    fn manifest_history_agrees_with_history_dir() {
        let ws = Workspace::new();
        let manifest = Manifest::open(ws.settings.manifest_file.as_deref().unwrap()).unwrap();
        let good = fs::read_to_string("tests/fixtures/google_results.json").unwrap();
        ws.searched(&manifest, "203450012345", &good);
        ws.searched(&manifest, "158572200160", "{ truncated");
        annotate_pending(&ws.settings, Some(&manifest), false).unwrap();

        let without = due_terms(&reconcile(&ws.settings, None, 0).unwrap());
        let with = due_terms(&reconcile(&ws.settings, Some(&manifest), 0).unwrap());
        assert_eq!(without, with);
        assert!(!with.contains(&"203450012345".to_string()));
        assert!(with.contains(&"158572200160".to_string()));
    }

    #[test]
    fn pending_files_lists_json_in_name_order() {
        let ws = Workspace::new();
        let dir = &ws.settings.search_results_folder;
        fs::write(dir.join("b.json"), "{}").unwrap();
        fs::write(dir.join("a.json"), "{}").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        let files = pending_files(dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
        assert!(pending_files(&dir.join("missing")).unwrap().is_empty());
    }
}
