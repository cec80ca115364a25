mod signal;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::distributions::Alphanumeric;
use rand::Rng;

use rekord_core::commands::{get, init, list, put};
use rekord_core::error::{RekordError, Result};
use rekord_core::platform;
use rekord_core::repo::{DiskMode, Repository};
use rekord_core::storage::local_backend::LocalStore;

/// Generated repository passwords are this long (alphanumeric).
const GENERATED_PASSWORD_LEN: usize = 24;

#[derive(Parser)]
#[command(
    name = "rekord",
    version,
    about = "Encrypted, deduplicating backups in a flat object store"
)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Init new backup repository
    Init {
        /// Repository directory
        #[arg(short = 'R', long, env = "REPOSITORY")]
        repository: Option<PathBuf>,
    },

    /// Store encrypted directory or file
    Put {
        #[arg(short = 'R', long, env = "REPOSITORY")]
        repository: Option<PathBuf>,

        #[arg(long, env = "PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Set user friendly snapshot name
        #[arg(short, long)]
        name: Option<String>,

        /// Follow symbolic links (instead of storing them as-is)
        #[arg(long)]
        follow_symlinks: bool,

        /// Skip snapshot object and report data ID
        #[arg(long)]
        raw: bool,

        /// Change number of threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Files and directories to store
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Get and decrypt directory or file
    Get {
        #[arg(short = 'R', long, env = "REPOSITORY")]
        repository: Option<PathBuf>,

        #[arg(long, env = "PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Restore file or directory to this path
        #[arg(short = 'O', long)]
        output: PathBuf,

        /// Use flat names for snapshot files
        #[arg(long)]
        flat: bool,

        /// Change number of threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Snapshot ID (or unique prefix of at least 8 characters)
        id: String,
    },

    /// List snapshots
    List {
        #[arg(short = 'R', long, env = "REPOSITORY")]
        repository: Option<PathBuf>,

        #[arg(long, env = "PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    platform::raise_fd_limit(4096);
    signal::install_signal_handlers();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RekordError::Interrupted) => {
            eprintln!("Interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init { repository } => cmd_init(repository),
        Commands::Put {
            repository,
            password,
            name,
            follow_symlinks,
            raw,
            threads,
            paths,
        } => cmd_put(repository, password, name, follow_symlinks, raw, threads, paths),
        Commands::Get {
            repository,
            password,
            output,
            flat,
            threads,
            id,
        } => cmd_get(repository, password, output, flat, threads, &id),
        Commands::List {
            repository,
            password,
        } => cmd_list(repository, password),
    }
}

fn require_repository(repository: Option<PathBuf>) -> Result<PathBuf> {
    repository.ok_or_else(|| {
        RekordError::Config("missing repository directory (-R or REPOSITORY)".into())
    })
}

fn fill_password(password: Option<String>) -> Result<String> {
    match password {
        Some(pwd) => Ok(pwd),
        None => {
            let pwd = rpassword::prompt_password("Repository password: ")?;
            Ok(pwd)
        }
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn open_repository(
    repository: Option<PathBuf>,
    password: Option<String>,
    threads: Option<usize>,
) -> Result<Repository> {
    let path = require_repository(repository)?;
    let password = fill_password(password)?;

    let store = Box::new(LocalStore::new(&path)?);
    let mut repo = Repository::open(store, &password)?;
    if let Some(count) = threads {
        repo.set_threads(count.max(1));
    }
    if let Some(cache_dir) = platform::default_cache_dir() {
        if let Err(e) = repo.attach_index_cache(&cache_dir) {
            tracing::warn!("index cache unavailable, continuing without it: {e}");
        }
    }

    println!("Repository: {} ({})", path.display(), repo.mode().as_str());
    Ok(repo)
}

fn cmd_init(repository: Option<PathBuf>) -> Result<()> {
    let path = require_repository(repository)?;

    let full_password = generate_password();
    let write_password = generate_password();

    let store = Box::new(LocalStore::new(&path)?);
    init::run(store, &full_password, &write_password)?;

    println!("Repository: {}", path.display());
    println!();
    println!("Default full password: {full_password}");
    println!("  write-only password: {write_password}");
    println!();
    println!(
        "Please write them down, they cannot be recovered and the backup \
         will be lost if you lose them."
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_put(
    repository: Option<PathBuf>,
    password: Option<String>,
    name: Option<String>,
    follow_symlinks: bool,
    raw: bool,
    threads: Option<usize>,
    paths: Vec<PathBuf>,
) -> Result<()> {
    let repo = open_repository(repository, password, threads)?;
    if repo.mode() != DiskMode::WriteOnly {
        tracing::warn!("you should use the write-only key with this command");
    }

    println!();
    println!("Backing up...");
    let start = std::time::Instant::now();

    let settings = put::PutSettings {
        name,
        follow_symlinks,
        raw,
    };
    let outcome = put::run(&repo, &settings, &paths, &signal::CANCEL)?;

    println!();
    println!("{} ID: {}", if raw { "Data" } else { "Snapshot" }, outcome.id);
    println!("Stored size: {}", format_size(outcome.logical_size as u64));
    println!("Total written: {}", format_size(outcome.written));
    if outcome.stats.skipped > 0 {
        println!("Skipped entries: {}", outcome.stats.skipped);
    }
    println!("Execution time: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_get(
    repository: Option<PathBuf>,
    password: Option<String>,
    output: PathBuf,
    flat: bool,
    threads: Option<usize>,
    id: &str,
) -> Result<()> {
    let repo = open_repository(repository, password, threads)?;
    if repo.mode() != DiskMode::ReadWrite {
        return Err(RekordError::WriteOnly);
    }

    println!();
    println!("Extracting...");
    let start = std::time::Instant::now();

    let id = repo.resolve_id(id)?;
    let settings = get::GetSettings { flat };
    let stats = get::run(&repo, &id, &settings, &output, &signal::CANCEL)?;

    println!();
    println!("Restored: {} ({})", output.display(), format_size(stats.bytes));
    println!("Execution time: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_list(repository: Option<PathBuf>, password: Option<String>) -> Result<()> {
    let repo = open_repository(repository, password, None)?;
    println!();

    let snapshots = list::run(&repo)?;
    if snapshots.is_empty() {
        println!("There does not seem to be any snapshot");
        return Ok(());
    }

    for snapshot in snapshots {
        println!("{}", snapshot.id);
        if !snapshot.name.is_empty() {
            println!("+ Name: {}", snapshot.name);
        }
        println!("+ Time: {}", format_time(snapshot.time));
        println!("+ Size: {}", format_size(snapshot.logical_size.max(0) as u64));
        println!(
            "+ Storage: {}",
            format_size(snapshot.stored_size.max(0) as u64)
        );
        println!();
    }
    Ok(())
}

/// Human-readable byte size.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Render a snapshot timestamp (Unix microseconds) in local time.
fn format_time(micros: i64) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_micros(micros) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => format!("@{micros}us"),
    }
}
