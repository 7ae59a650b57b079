//! dir-merge command-line tool.
//!
//! `merge` builds a staging repository from a source and a target tree and
//! drops the user into a shell inside it; `finish`, `status` and `abort` are
//! run later from inside that shell.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dir_merge_core::config::MergeConfig;
use dir_merge_core::errors::ConfigError;
use dir_merge_core::process::SESSION_ENV_VAR;
use dir_merge_core::status::LiveStatus;
use dir_merge_core::{DefaultController, StartRequest};

/// Shown under every help screen: the one rule users trip over.
const PROPAGATION_POLICY: &str = "\
PROPAGATION POLICY:
  Only STAGED or COMMITTED content in the staging repository reaches the
  output directory. 'finish' first discards every unstaged edit and deletes
  every untracked file, including ones matched by .gitignore. Run
  'git add' on anything you change before 'dir-merge finish'.

  Empty directories cannot be staged. Those present in the target are kept;
  empty directories created in the shell are dropped.

  The target tree is already staged on top of the BASE commit (the source
  tree) when the shell opens. 'git diff --cached' shows source -> target;
  'git diff' shows your unstaged edits, which will be lost.";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Reconcile two directory trees in a throwaway git working copy.
#[derive(Parser, Debug)]
#[command(
    name = "dir-merge",
    version,
    about = "Reconcile two directory trees in a throwaway git working copy",
    after_help = PROPAGATION_POLICY
)]
struct Cli {
    /// Path to the TOML configuration file.
    /// [default: ~/.config/dir-merge/config.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a merge session and open a shell in the staging repository.
    ///
    /// SOURCE is committed as BASE, TARGET is mirrored over it (files only in
    /// SOURCE are deleted) and staged. Edit, 'git add' what you keep, then run
    /// 'dir-merge finish' from the staging directory.
    #[command(after_help = PROPAGATION_POLICY)]
    Merge {
        /// Base tree.
        source: PathBuf,

        /// Overlay tree.
        target: PathBuf,

        /// Where 'finish' writes the result. Defaults to SOURCE.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Propagate the staged result to the output directory and end the session.
    ///
    /// Must be run from the staging directory, inside the session's shell.
    /// Unstaged edits and untracked files are discarded first.
    #[command(after_help = PROPAGATION_POLICY)]
    Finish,

    /// Show the active session and the staging repository's changes.
    Status,

    /// Discard the active session without writing any output.
    Abort,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        /// [default: ~/.config/dir-merge/config.toml]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = MergeConfig::load_or_default(cli.config.as_deref());

    init_tracing(config.as_ref().ok().map(|c| c.session.log_level.as_str()));

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins, then the configured level, then `warn`.
fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli, config: Result<MergeConfig, ConfigError>) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(output.as_deref()),
        Commands::Validate => cmd_validate(cli.config.as_deref(), config),
        Commands::Merge {
            source,
            target,
            output,
        } => cmd_merge(&loaded(config)?, source, target, output).await,
        Commands::Finish => cmd_finish(&loaded(config)?).await,
        Commands::Status => cmd_status(&loaded(config)?).await,
        Commands::Abort => cmd_abort(&loaded(config)?),
    }
}

fn loaded(config: Result<MergeConfig, ConfigError>) -> Result<MergeConfig> {
    config.context("failed to load configuration")
}

/// The invoking shell's working directory. Falls back to `$PWD` when the
/// directory itself has been removed.
fn working_dir() -> Result<PathBuf> {
    match std::env::current_dir() {
        Ok(dir) => Ok(dir),
        Err(e) => std::env::var_os("PWD")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .ok_or(e)
            .context("failed to determine the current directory"),
    }
}

// ---------------------------------------------------------------------------
// Session commands
// ---------------------------------------------------------------------------

async fn cmd_merge(
    config: &MergeConfig,
    source: PathBuf,
    target: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let request = StartRequest {
        source,
        target,
        output,
        cwd: working_dir()?,
    };
    let mut controller = DefaultController::from_config(config);
    debug!(
        staging_root = %config.staging_root().display(),
        mirror = ?config.tools.mirror,
        "starting merge session"
    );

    let spinner = style::spinner("Building staging repository...");
    let prepared = controller.prepare(&request).await;
    spinner.finish_and_clear();
    let session = prepared.context("failed to start merge session")?;

    println!();
    println!("{}", style::header(&format!("Merge session {}", session.id())));
    println!("  Source     {}", session.source_dir.display());
    println!("  Target     {}", session.target_dir.display());
    println!("  Output     {}", session.output_dir.display());
    println!("  Staging    {}", session.staging_path.display());
    println!();
    println!("  Resolve the merge with any tools, then stage what you keep:");
    println!("    git add <paths>        {}", style::dim("unstaged edits are discarded"));
    println!("    dir-merge finish       {}", style::dim("write the result and close this shell"));
    println!("    dir-merge abort        {}", style::dim("discard everything"));
    println!();
    println!(
        "{}",
        style::dim(&format!(
            "Opening {} in the staging repository (${} is set).",
            controller.settings().shell.program,
            SESSION_ENV_VAR
        ))
    );
    println!();

    let outcome = controller
        .enter_shell(session)
        .await
        .context("interactive shell failed")?;

    println!();
    if outcome.still_active {
        println!(
            "{}",
            style::warn("Shell exited without 'dir-merge finish'; the session is still active.")
        );
        println!(
            "  Finish:  cd {} && dir-merge finish",
            outcome.session.staging_path.display()
        );
        println!("  Discard: dir-merge abort");
    } else {
        println!("{}", style::success("Merge session closed."));
    }
    Ok(())
}

async fn cmd_finish(config: &MergeConfig) -> Result<()> {
    let cwd = working_dir()?;
    let mut controller = DefaultController::from_config(config);

    let spinner = style::spinner("Propagating staged tree...");
    let result = controller.finish(&cwd).await;
    spinner.finish_and_clear();
    let report = result?;

    println!(
        "{}",
        style::success(&format!(
            "Merged into {}",
            report.session.output_dir.display()
        ))
    );
    if !report.shell_killed {
        println!(
            "  {}",
            style::dim(&format!(
                "Return to {} to continue.",
                report.session.original_cwd.display()
            ))
        );
    }
    Ok(())
}

async fn cmd_status(config: &MergeConfig) -> Result<()> {
    let controller = DefaultController::from_config(config);
    let report = controller.status().await?;
    let session = &report.session;

    println!();
    println!("{}", style::header(&format!("Merge session {}", session.id())));
    println!("{}", "═".repeat(40));
    println!();
    println!("  Staging    {}", session.staging_path.display());
    println!("  Source     {}", session.source_dir.display());
    println!("  Target     {}", session.target_dir.display());
    println!("  Output     {}", session.output_dir.display());
    println!("  Started in {}", session.original_cwd.display());
    if let Some(started_at) = session.started_at {
        println!(
            "  Started at {}",
            started_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
        );
    }
    let shell = match (session.shell_pid, report.shell_alive) {
        (Some(handle), Some(true)) => style::shell_running(handle.pid()),
        _ => style::shell_stopped(),
    };
    println!("  Shell      {}", shell);

    println!();
    match &report.live {
        LiveStatus::Clean => {
            println!("  {}", style::dim("No changes relative to the index."));
        }
        LiveStatus::Changes(lines) => {
            println!("  {}", style::header("Changes"));
            println!("  {}", "─".repeat(40));
            for line in lines {
                println!("  {}", style::status_line(line));
            }
        }
        LiveStatus::StagingMissing => {
            println!(
                "  {}",
                style::warn("Staging directory is missing; run 'dir-merge abort'.")
            );
        }
        LiveStatus::Unavailable(reason) => {
            println!(
                "  {}",
                style::warn(&format!("Live status unavailable: {}", reason))
            );
        }
    }
    println!();
    Ok(())
}

fn cmd_abort(config: &MergeConfig) -> Result<()> {
    let mut controller = DefaultController::from_config(config);
    let report = controller.abort()?;

    match &report.session {
        Some(session) => {
            println!(
                "{}",
                style::success(&format!("Discarded merge session {}", session.id()))
            );
            if report.shell_killed {
                println!("  {}", style::dim("Closed the session's shell."));
            }
        }
        None => {
            println!(
                "{}",
                style::success("Removed an unreadable session record.")
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration commands
// ---------------------------------------------------------------------------

fn cmd_init(output: Option<&Path>) -> Result<()> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(MergeConfig::default_path);

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(&output, MergeConfig::default_template())
        .context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust tool paths, mirror backend or shell if needed");
    println!(
        "  2. Validate with: dir-merge validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(path: Option<&Path>, config: Result<MergeConfig, ConfigError>) -> Result<()> {
    let shown = path
        .map(Path::to_path_buf)
        .unwrap_or_else(MergeConfig::default_path);
    println!("Validating configuration: {}", shown.display());
    println!();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("  [FAIL] {}", e);
            anyhow::bail!("configuration validation failed");
        }
    };
    if path.is_none() && !shown.exists() {
        println!("  [OK] No configuration file; using built-in defaults");
    } else {
        println!("  [OK] TOML structure is valid");
    }
    println!("  [OK] All required fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Session record : {}", config.session_file().display());
    println!("  Staging root   : {}", config.staging_root().display());
    println!("  Staging prefix : {}", config.session.staging_prefix);
    println!("  git            : {}", config.tools.git);
    println!("  Mirror         : {:?}", config.tools.mirror);
    println!("  rsync          : {}", config.tools.rsync);
    println!(
        "  Identity       : {} <{}>",
        config.identity.name, config.identity.email
    );
    println!("  Shell          : {}", config.shell.resolve_program());
    println!("  Log level      : {}", config.session.log_level);
    Ok(())
}
