use std::{ffi::OsString, path::PathBuf, sync::mpsc, thread};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use neardup::{
    config,
    db::Database,
    search_task::{Event, SearchTask},
    settings::{DirectoryEntry, HashMethod, SearchSettings},
};
use neardup_common::{
    bin_common::{
        init::{init_eyre, init_logger},
        termination,
    },
    utils::fsutils,
};

#[derive(Parser, Debug)]
#[command()]
/// Finds perceptually duplicate videos.
///
/// Settings persist inside the database; flags override the stored values
/// and the merged result is written back before the run.
struct Cli {
    /// Folders to search for video files
    #[arg(long, short = 's', num_args = 1..)]
    src_dirs: Vec<PathBuf>,

    /// Do not descend into subdirectories of the given folders
    #[arg(long)]
    flat: bool,

    /// Path to the config file pointing at the database
    #[arg(long, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Use this database instead of the configured one, and remember it
    #[arg(long, short = 'f')]
    database_file: Option<PathBuf>,

    /// Where to place generated thumbnails
    #[arg(long, default_value = "thumbs")]
    thumbnail_dir: PathBuf,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Sampling strategy
    #[arg(long, value_enum)]
    method: Option<HashMethod>,

    /// File extensions to accept, with the leading dot
    #[arg(long, num_args = 1..)]
    extensions: Option<Vec<String>>,

    /// Filenames must match all of these patterns
    #[arg(long)]
    include_files: Vec<String>,

    /// Filenames must match none of these patterns
    #[arg(long)]
    exclude_files: Vec<String>,

    /// Directory paths must match all of these patterns
    #[arg(long)]
    include_dirs: Vec<String>,

    /// Directory paths must match none of these patterns
    #[arg(long)]
    exclude_dirs: Vec<String>,

    /// Treat the patterns as shell globs instead of regexes
    #[arg(long)]
    glob: bool,

    /// Match patterns case-insensitively
    #[arg(long)]
    case_insensitive: bool,

    /// Ignore files smaller than this many bytes
    #[arg(long)]
    min_bytes: Option<u64>,

    /// Ignore files larger than this many bytes
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Thumbnails rendered per video, 1-4
    #[arg(long)]
    thumbnails_per_video: Option<u32>,

    /// Percent of the head and tail to skip in slow mode, 0-40
    #[arg(long)]
    skip_percent: Option<u32>,

    /// Upper bound on sampled frames per video in slow mode
    #[arg(long)]
    max_frames: Option<u32>,

    /// Maximum differing bits for two hashes to count as a match, 0-64
    #[arg(long)]
    hamming_threshold: Option<u32>,

    /// Matching frames required to pair two videos
    #[arg(long, conflicts_with = "matching_percent")]
    matching_number: Option<u64>,

    /// Like --matching-number, as a percentage of the query video's frames
    #[arg(long)]
    matching_percent: Option<f64>,

    /// Fast mode: accept whatever frame the seek lands on
    #[arg(long)]
    keyframes_only: bool,
}

fn cli_arguments() -> eyre::Result<Cli> {
    const ARGS_FILE: &str = ".nearduprc";
    let mut args: Vec<OsString> = std::env::args_os().collect();

    if args.len() == 1 {
        if let Some(flags) = fsutils::read_optional_file(ARGS_FILE)
            .wrap_err_with(|| format!("Could not read config file at: {ARGS_FILE}"))?
        {
            args.extend(
                flags
                    .split_whitespace()
                    .map(|s| std::ffi::OsStr::new(s).to_owned()),
            );
        }
    }

    Ok(Cli::parse_from(args))
}

fn apply_cli(settings: &mut SearchSettings, cli: &Cli) {
    if !cli.src_dirs.is_empty() {
        settings.directories = cli
            .src_dirs
            .iter()
            .map(|path| DirectoryEntry {
                path: path.clone(),
                recursive: !cli.flat,
            })
            .collect();
    }
    if let Some(extensions) = &cli.extensions {
        settings.extensions = extensions.clone();
    }
    if !cli.include_files.is_empty() {
        settings.include_file_patterns = cli.include_files.clone();
    }
    if !cli.exclude_files.is_empty() {
        settings.exclude_file_patterns = cli.exclude_files.clone();
    }
    if !cli.include_dirs.is_empty() {
        settings.include_dir_patterns = cli.include_dirs.clone();
    }
    if !cli.exclude_dirs.is_empty() {
        settings.exclude_dir_patterns = cli.exclude_dirs.clone();
    }
    if cli.glob {
        settings.use_glob = true;
    }
    if cli.case_insensitive {
        settings.case_insensitive = true;
    }
    if cli.min_bytes.is_some() {
        settings.min_bytes = cli.min_bytes;
    }
    if cli.max_bytes.is_some() {
        settings.max_bytes = cli.max_bytes;
    }
    if let Some(n) = cli.thumbnails_per_video {
        settings.thumbnails_per_video = n;
    }
    if let Some(n) = cli.skip_percent {
        settings.skip_percent = n;
    }
    if let Some(n) = cli.max_frames {
        settings.max_frames = n;
    }
    if let Some(n) = cli.hamming_threshold {
        settings.hamming_threshold = n;
    }
    if let Some(n) = cli.matching_number {
        settings.matching_threshold_number = n;
        settings.use_percent_threshold = false;
    }
    if let Some(pct) = cli.matching_percent {
        settings.matching_threshold_percent = pct;
        settings.use_percent_threshold = true;
    }
    if let Some(method) = cli.method {
        settings.method = method;
    }
    if cli.keyframes_only {
        settings.use_keyframes_only = true;
    }
    settings.clamp_ranges();
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli = cli_arguments()?;
    init_logger(cli.logfile.as_deref())?;

    let db_path = match &cli.database_file {
        Some(path) => {
            config::save_database_path(&cli.config, path)
                .wrap_err("failed to remember the database path")?;
            path.clone()
        }
        None => config::load_database_path(&cli.config),
    };

    log::info!("Backing up the database file");
    fsutils::backup_file(&db_path).wrap_err("failed to backup the database file")?;

    let db = Database::open(&db_path)
        .wrap_err_with(|| format!("failed to open database at: {}", db_path.display()))?;
    log::info!("Opened database at: {}", db_path.display());

    let mut settings = db.load_settings().wrap_err("failed to load settings")?;
    apply_cli(&mut settings, &cli);
    settings
        .compile_patterns()
        .wrap_err("failed to compile the file patterns")?;
    db.save_settings(&settings)
        .wrap_err("failed to save settings")?;

    eyre::ensure!(
        !settings.directories.is_empty(),
        "No directories to search. Pass some with --src-dirs."
    );

    let cookie =
        termination::Cookie::new().wrap_err("failed to create term cookie")?;

    let (tx, rx) = mpsc::channel::<Event>();
    let task = SearchTask::new(
        db,
        db_path,
        settings,
        cli.thumbnail_dir.clone(),
        cookie,
        tx,
    );

    let mut groups = None;
    let result = thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("search".to_string())
            .spawn_scoped(scope, || task.run())
            .expect("the thread name contains no null bytes");

        for event in rx {
            match event {
                Event::DatabaseOpened(path) => {
                    log::debug!("Searching against {}", path.display());
                }
                Event::ScanProgress(found) => {
                    log::info!("Scanning... {found} files found");
                }
                Event::MetadataProgress(done, total) => {
                    log::info!("Metadata and thumbnails: {done}/{total}");
                }
                Event::HashProgress(done, total) => {
                    log::info!("Hashing: {done}/{total}");
                }
                Event::DuplicatesUpdated(found_groups) => {
                    groups = Some(found_groups);
                }
                Event::Error(message) => {
                    log::error!("{message}");
                }
                Event::Cancelled => {
                    log::warn!("Cancelled, the store keeps its last finished state");
                }
            }
        }

        worker.join()
    });

    match result {
        Ok(run_result) => run_result?,
        Err(panic) => std::panic::resume_unwind(panic),
    }

    if let Some(groups) = groups {
        println!("{} duplicate groups", groups.len());
        for (index, group) in groups.iter().enumerate() {
            println!("group {}:", index + 1);
            for video in group {
                println!("  {}", video.path.display());
            }
        }
    }

    Ok(())
}
