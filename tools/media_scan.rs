use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use library::{
    config_path_from_env, load_config, resolve_path, Catalog, ScanConfig, ScanManager, ScanPhase,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROGRESS_EVERY: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let config = load_config(&config_path)?;

    let mut args = env::args().skip(1).peekable();
    match args.peek().map(String::as_str) {
        Some("normalize-genres") => {
            args.next();
            let apply = args.peek().map(String::as_str) == Some("--apply");
            if apply {
                args.next();
            }
            let catalog_path = catalog_path(args.next(), &config, &config_path);
            normalize_genres(catalog_path, apply)
        }
        Some("report") => {
            args.next();
            let catalog_path = catalog_path(args.next(), &config, &config_path);
            print_report(&Catalog::open(&catalog_path)?)
        }
        _ => {
            if args.peek().map(String::as_str) == Some("scan") {
                args.next();
            }
            let root = args
                .next()
                .or_else(|| env::var("MEDIA_ROOT").ok())
                .ok_or("MEDIA_ROOT not set and no path argument")?;
            let catalog_path = catalog_path(args.next(), &config, &config_path);
            scan(PathBuf::from(root), catalog_path, config)
        }
    }
}

fn catalog_path(arg: Option<String>, config: &ScanConfig, config_path: &std::path::Path) -> PathBuf {
    match arg.or_else(|| env::var("MEDIA_CATALOG").ok()) {
        Some(path) => PathBuf::from(path),
        None => resolve_path(config_path, &config.catalog_path),
    }
}

fn scan(
    root: PathBuf,
    catalog_path: PathBuf,
    config: ScanConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let poll = config.poll_interval();
    let mut manager = ScanManager::new(config, catalog_path.clone());
    manager.start(root)?;

    if let Some(token) = manager.cancel_token() {
        ctrlc::set_handler(move || token.cancel())?;
    }

    let mut last_report = Instant::now();
    while manager.is_running() {
        thread::sleep(poll);
        if last_report.elapsed() >= PROGRESS_EVERY {
            last_report = Instant::now();
            let status = manager.status();
            info!(
                "{:?} {}/{} ({:.0}%) [{}] {} {}",
                status.phase,
                status.processed_files,
                status.total_files,
                status.progress() * 100.0,
                status.current_category,
                status.current_file,
                status.current_detail
            );
        }
    }

    let result = manager.wait();
    let status = manager.status();
    match &status.phase {
        ScanPhase::Done | ScanPhase::Cancelled => {
            println!(
                "{}: {} found, {} new, {} unchanged, {} removed, {} failed, {:.2} minutes",
                if status.phase == ScanPhase::Done {
                    "Scan complete"
                } else {
                    "Scan cancelled"
                },
                status.total_files,
                status.new_files,
                status.skipped_files,
                status.deleted_files,
                status.failed_files,
                status.total_duration_minutes
            );
            println!(
                "Probe errors: {}, missing durations: {}, path metadata used: {}, unreadable entries: {}",
                status.probe_errors,
                status.duration_errors,
                status.path_metadata_used,
                status.enumeration_errors
            );
        }
        ScanPhase::Failed(reason) => {
            warn!("Scan failed: {}", reason);
        }
        other => warn!("Scan ended in unexpected phase {:?}", other),
    }
    drop(manager);

    if let Some(Err(err)) = result {
        return Err(err.into());
    }
    print_report(&Catalog::open(&catalog_path)?)
}

fn print_report(catalog: &Catalog) -> Result<(), Box<dyn std::error::Error>> {
    println!("Catalog holds {} entries", catalog.len()?);
    for summary in catalog.category_summaries()? {
        println!(
            "  {}: {} files, {:.2} min, {} bytes, avg {} bps, {:.1}% complete",
            summary.category,
            summary.files,
            summary.total_minutes,
            summary.total_bytes,
            summary.average_bitrate,
            summary.metadata_completeness
        );
    }
    Ok(())
}

fn normalize_genres(catalog_path: PathBuf, apply: bool) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::open(&catalog_path)?;
    let outcome = if apply {
        catalog.apply_genre_renormalization()?
    } else {
        catalog.plan_genre_renormalization()?
    };
    for change in &outcome.changes {
        let to = if change.to.is_empty() {
            "<removed>"
        } else {
            change.to.as_str()
        };
        println!("{}: {} -> {}", change.path, change.from, to);
    }
    println!(
        "{} changed, {} removed, {} unchanged{}",
        outcome.changed(),
        outcome.removed(),
        outcome.unchanged,
        if apply { "" } else { " (preview, pass --apply to write)" }
    );
    Ok(())
}
