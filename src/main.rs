use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use tunesync::config::AppConfig;
use tunesync::dates::{self, DateFilter, Policy, TimePeriod};
use tunesync::diff::CompareMode;
use tunesync::exclude::ExclusionRules;
use tunesync::filter::FilterSet;
use tunesync::record::Record;
use tunesync::remote::MirrorLibrary;
use tunesync::report::{Event, EventKind, LogReporter, Outcome, Reporter};
use tunesync::scanner::ScanOptions;
use tunesync::scanner::metadata::LoftyTagReader;
use tunesync::sync::{self, Selection};
use tunesync::transfer::{self, OutputTemplate, TransferSummary};

#[derive(Parser)]
#[command(
    name = "tunesync",
    version,
    about = "Keep a local music folder and a music library in sync"
)]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Less output (-q, -qq)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Metadata filter such as 'artist[Beatles]-album[Help]' (repeatable, OR-ed)
    #[arg(short = 'f', long = "filter")]
    filters: Vec<String>,

    /// Keep songs created in a year or month (YYYY, YYYY-MM)
    #[arg(long)]
    created_in: Vec<String>,
    /// Keep songs created on a day (YYYY-MM-DD)
    #[arg(long)]
    created_on: Vec<String>,
    /// Keep songs created before a date
    #[arg(long)]
    created_before: Vec<String>,
    /// Keep songs created after a date
    #[arg(long)]
    created_after: Vec<String>,

    /// Keep songs modified in a year or month (YYYY, YYYY-MM)
    #[arg(long)]
    modified_in: Vec<String>,
    /// Keep songs modified on a day (YYYY-MM-DD)
    #[arg(long)]
    modified_on: Vec<String>,
    /// Keep songs modified before a date
    #[arg(long)]
    modified_before: Vec<String>,
    /// Keep songs modified after a date
    #[arg(long)]
    modified_after: Vec<String>,

    /// UTC offset for date flags (Z, +HH:MM); defaults to the local timezone
    #[arg(long)]
    timezone: Option<String>,
}

#[derive(Args)]
struct LocalArgs {
    /// Files or directories (defaults to config music_dirs)
    paths: Vec<PathBuf>,

    /// Only look at files directly inside the given directories
    #[arg(long, conflicts_with = "max_depth")]
    no_recursion: bool,

    /// Directory levels to descend (0 = no recursion)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Skip paths containing this text (repeatable)
    #[arg(long)]
    exclude_path: Vec<String>,

    /// Skip paths matching this regex (repeatable)
    #[arg(long)]
    exclude_regex: Vec<String>,

    /// Skip paths matching this glob, relative to the scanned directory (repeatable)
    #[arg(long)]
    exclude_glob: Vec<String>,
}

#[derive(Args)]
struct CompareArgs {
    /// Compare songs by content hash
    #[arg(long)]
    use_hash: bool,
    /// Don't compare songs by content hash
    #[arg(long)]
    no_use_hash: bool,
    /// Compare songs by artist/album/title/track
    #[arg(long)]
    use_metadata: bool,
    /// Don't compare songs by metadata
    #[arg(long)]
    no_use_metadata: bool,
}

#[derive(Args)]
struct LibraryArgs {
    /// Root of the mirror library (defaults to config library)
    #[arg(long)]
    library: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List local songs that pass the filters
    Scan {
        #[command(flatten)]
        local: LocalArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print songs as JSON
        #[arg(long)]
        json: bool,
    },

    /// List library songs that pass the filters
    Search {
        #[command(flatten)]
        library: LibraryArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print songs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload local songs the library doesn't have
    Upload {
        #[command(flatten)]
        local: LocalArgs,
        #[command(flatten)]
        library: LibraryArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        compare: CompareArgs,
        /// Delete local files once the library holds them
        #[arg(long)]
        delete_on_success: bool,
        /// Show what would be uploaded without uploading
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Download library songs missing locally
    Download {
        #[command(flatten)]
        local: LocalArgs,
        #[command(flatten)]
        library: LibraryArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        compare: CompareArgs,
        /// Output template, e.g. '~/Music/%artist%/%album%/%track2% - %title%'
        #[arg(short, long)]
        output: Option<String>,
        /// Show what would be downloaded without downloading
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Delete library songs that pass the filters
    Delete {
        #[command(flatten)]
        library: LibraryArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Show what would be deleted without deleting
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

enum Status {
    Done,
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match i16::from(cli.verbose) - i16::from(cli.quiet) {
        ..=-2 => "off",
        -1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // First Ctrl-C raises the flag, a second one exits with 130. The
    // conditional shutdown has to be registered first.
    let cancel = Arc::new(AtomicBool::new(false));
    let sigint = signal_hook::consts::SIGINT;
    if let Err(e) = signal_hook::flag::register_conditional_shutdown(sigint, 130, Arc::clone(&cancel))
        .and_then(|_| signal_hook::flag::register(sigint, Arc::clone(&cancel)))
    {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    let show_progress = cli.verbose == 0 && cli.quiet == 0;
    let status = run(cli.command, &cancel, show_progress);
    match status {
        Ok(Status::Done) => ExitCode::SUCCESS,
        Ok(Status::Interrupted) => interrupted(),
        Err(_) if cancel.load(Ordering::Relaxed) => interrupted(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn interrupted() -> ExitCode {
    eprintln!("Interrupted by user");
    ExitCode::from(130)
}

fn run(command: Commands, cancel: &Arc<AtomicBool>, show_progress: bool) -> Result<Status> {
    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    let workers = config.resolve_workers();
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
    {
        log::debug!("Using existing thread pool: {e}");
    }

    let reporter = ProgressReporter::new(show_progress);
    let reader = LoftyTagReader;

    match command {
        Commands::Scan {
            local,
            filter,
            json,
        } => {
            let selection = selection(&filter, &config)?;
            let roots = music_dirs(&local, &config)?;
            let options = scan_options(&local, &config, false, cancel)?;
            let mut songs = sync::local_songs(&roots, &options, &selection, &reader, &reporter)
                .context("Scan failed")?;
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }
            tunesync::record::sort_records(&mut songs);
            print_songs(&songs, json)?;
        }

        Commands::Search {
            library,
            filter,
            json,
        } => {
            let selection = selection(&filter, &config)?;
            let library = mirror(&library, &config, false, cancel)?;
            let mut songs =
                sync::remote_songs(&library, &selection).context("Library listing failed")?;
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }
            tunesync::record::sort_records(&mut songs);
            print_songs(&songs, json)?;
        }

        Commands::Upload {
            local,
            library,
            filter,
            compare,
            delete_on_success,
            dry_run,
        } => {
            let mode = compare_mode(&compare, &config)?;
            let selection = selection(&filter, &config)?;
            let roots = music_dirs(&local, &config)?;
            let options = scan_options(&local, &config, mode.hash, cancel)?;
            let library = mirror(&library, &config, mode.hash, cancel)?;

            let local_songs = sync::local_songs(&roots, &options, &selection, &reader, &reporter)
                .context("Scan failed")?;
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }
            let remote = sync::remote_songs(&library, &selection)
                .context("Library listing failed")?;
            let missing = sync::missing_songs(local_songs, &remote, mode);
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }

            if dry_run {
                println!("Would upload {} songs:", missing.len());
                print_songs(&missing, false)?;
                return Ok(Status::Done);
            }

            let summary =
                transfer::upload_songs(&library, &missing, delete_on_success, cancel, &reporter);
            return Ok(report_summary("Upload", &summary));
        }

        Commands::Download {
            local,
            library,
            filter,
            compare,
            output,
            dry_run,
        } => {
            let mode = compare_mode(&compare, &config)?;
            let selection = selection(&filter, &config)?;
            let template =
                OutputTemplate::new(output.unwrap_or_else(|| config.download_template.clone()));
            let options = scan_options(&local, &config, mode.hash, cancel)?;

            // Existing songs live under the template's fixed prefix unless told otherwise
            let roots = if local.paths.is_empty() {
                let base = template.base_path();
                if base.exists() { vec![base] } else { Vec::new() }
            } else {
                local.paths.clone()
            };

            let library = mirror(&library, &config, mode.hash, cancel)?;

            let local_songs = if roots.is_empty() {
                Vec::new()
            } else {
                sync::local_songs(&roots, &options, &selection, &reader, &reporter)
                    .context("Scan failed")?
            };
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }
            let remote = sync::remote_songs(&library, &selection)
                .context("Library listing failed")?;
            let missing = sync::missing_songs(remote, &local_songs, mode);
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }

            if dry_run {
                println!("Would download {} songs:", missing.len());
                for song in &missing {
                    println!("  {} -> {}", song, template.render(song).display());
                }
                return Ok(Status::Done);
            }

            let summary = transfer::download_songs(&library, &missing, &template, cancel, &reporter);
            return Ok(report_summary("Download", &summary));
        }

        Commands::Delete {
            library,
            filter,
            dry_run,
            yes,
        } => {
            let selection = selection(&filter, &config)?;
            let library = mirror(&library, &config, false, cancel)?;
            let mut songs =
                sync::remote_songs(&library, &selection).context("Library listing failed")?;
            if cancel.load(Ordering::Relaxed) {
                return Ok(Status::Interrupted);
            }
            tunesync::record::sort_records(&mut songs);

            if songs.is_empty() {
                println!("No songs to delete");
                return Ok(Status::Done);
            }
            if dry_run {
                println!("Would delete {} songs:", songs.len());
                print_songs(&songs, false)?;
                return Ok(Status::Done);
            }
            if !yes && !confirm(&songs)? {
                println!("Nothing deleted");
                return Ok(Status::Done);
            }

            let summary = transfer::delete_songs(&library, &songs, cancel, &reporter);
            return Ok(report_summary("Delete", &summary));
        }
    }

    Ok(Status::Done)
}

/// Filters and date periods: CLI > config.
fn selection(args: &FilterArgs, config: &AppConfig) -> Result<Selection> {
    let filters = if args.filters.is_empty() {
        &config.filters
    } else {
        &args.filters
    };
    let filters = FilterSet::parse(filters).context("Invalid filter")?;

    let offset = args
        .timezone
        .as_ref()
        .or(config.timezone.as_ref())
        .map(|tz| dates::parse_offset(tz))
        .transpose()
        .context("Invalid --timezone")?;

    let periods = |groups: [(&Vec<String>, Policy); 4]| -> Result<Vec<TimePeriod>> {
        let mut periods = Vec::new();
        for (values, policy) in groups {
            for value in values {
                let period = TimePeriod::parse(value, policy, offset)
                    .with_context(|| format!("Invalid date '{value}'"))?;
                periods.push(period);
            }
        }
        Ok(periods)
    };

    let dates = DateFilter {
        created: periods([
            (&args.created_in, Policy::In),
            (&args.created_on, Policy::On),
            (&args.created_before, Policy::Before),
            (&args.created_after, Policy::After),
        ])?,
        modified: periods([
            (&args.modified_in, Policy::In),
            (&args.modified_on, Policy::On),
            (&args.modified_before, Policy::Before),
            (&args.modified_after, Policy::After),
        ])?,
    };

    Ok(Selection { filters, dates })
}

/// Scan roots: CLI args > config music_dirs.
fn music_dirs(args: &LocalArgs, config: &AppConfig) -> Result<Vec<PathBuf>> {
    if !args.paths.is_empty() {
        Ok(args.paths.clone())
    } else if !config.music_dirs.is_empty() {
        Ok(config.music_dirs.clone())
    } else {
        anyhow::bail!("No music directories. Pass paths as arguments or set music_dirs in config.");
    }
}

/// Walk options: CLI > config. Exclusion rules from both are merged.
fn scan_options(
    args: &LocalArgs,
    config: &AppConfig,
    hash: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<ScanOptions> {
    let max_depth = if args.no_recursion {
        Some(0)
    } else {
        args.max_depth.or(config.max_depth)
    };

    let merge = |from_config: &[String], from_cli: &[String]| -> Vec<String> {
        from_config.iter().chain(from_cli).cloned().collect()
    };
    let rules = ExclusionRules::new(
        &merge(&config.exclude.paths, &args.exclude_path),
        &merge(&config.exclude.regexes, &args.exclude_regex),
        &merge(&config.exclude.globs, &args.exclude_glob),
    )
    .context("Invalid exclusion rule")?;

    Ok(ScanOptions {
        max_depth,
        rules,
        hash,
        interrupt: Some(Arc::clone(cancel)),
    })
}

fn compare_mode(args: &CompareArgs, config: &AppConfig) -> Result<CompareMode> {
    let defaults = CompareMode {
        hash: config.compare.hash,
        metadata: config.compare.metadata,
    };
    Ok(CompareMode::from_flags(
        defaults,
        args.use_hash,
        args.no_use_hash,
        args.use_metadata,
        args.no_use_metadata,
    )?)
}

fn mirror(
    args: &LibraryArgs,
    config: &AppConfig,
    hash: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<MirrorLibrary> {
    let Some(root) = args.library.clone().or(config.library.clone()) else {
        anyhow::bail!("No library configured. Pass --library or set library in config.");
    };
    Ok(MirrorLibrary::new(root)
        .hashing(hash)
        .interruptible(Arc::clone(cancel)))
}

/// List `songs` and ask before deleting them. Anything but y/yes declines.
fn confirm(songs: &[Record]) -> Result<bool> {
    print_songs(songs, false)?;
    print!("Delete {} songs from the library? [y/N] ", songs.len());
    io::stdout().flush().context("Failed to write prompt")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_songs(songs: &[Record], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(songs).context("Failed to encode songs")?;
        println!("{out}");
        return Ok(());
    }
    for song in songs {
        println!("{song}");
    }
    Ok(())
}

fn report_summary(verb: &str, summary: &TransferSummary) -> Status {
    println!(
        "{verb} complete: {} succeeded, {} skipped, {} failed (of {})",
        summary.succeeded, summary.skipped, summary.failed, summary.total
    );
    if summary.interrupted {
        Status::Interrupted
    } else {
        Status::Done
    }
}

/// Drives an indicatif bar from scan and transfer events and forwards every
/// event to the log.
struct ProgressReporter {
    enabled: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressReporter {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            bar: Mutex::new(None),
        }
    }
}

impl Reporter for ProgressReporter {
    fn start(&self, kind: EventKind, total: usize) {
        if !self.enabled {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(match kind {
            EventKind::Scan => "scanning",
            EventKind::Upload => "uploading",
            EventKind::Download => "downloading",
            EventKind::Delete => "deleting",
        });
        if let Ok(mut bar) = self.bar.lock() {
            *bar = Some(pb);
        }
    }

    fn event(&self, event: Event) {
        let bar = self.bar.lock().ok().and_then(|b| b.clone());
        match bar {
            Some(pb) => {
                pb.inc(1);
                if let Outcome::Failed(_) = event.outcome {
                    pb.suspend(|| LogReporter.event(event));
                }
            }
            None => LogReporter.event(event),
        }
    }

    fn finish(&self, _kind: EventKind) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        }
    }
}
