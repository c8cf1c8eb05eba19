mod commands;
mod operator;
mod settings;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, Context, PlatformChoice};
use labcycle_core::{install_signal_handler, BackupMode};
use settings::{Settings, ToolConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "labcycle",
    version,
    about = "Install, personalize and reset weather-station lab workspaces"
)]
struct Cli {
    /// Workspace root (default: ~/weather-station).
    #[arg(long, global = true)]
    root: Option<String>,

    /// Directory receiving backup archives; must be outside the workspace
    /// (default: ~/weather-station-backups).
    #[arg(long, global = true)]
    backup_root: Option<String>,

    /// Tool configuration file (default: ~/.config/labcycle/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override platform detection.
    #[arg(long, value_enum, default_value_t = PlatformChoice::Auto, global = true)]
    platform: PlatformChoice,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct BackupArgs {
    /// Archive logs, data and configuration first; a failed backup only warns.
    #[arg(long, default_value_t = false)]
    backup: bool,
    /// Archive first and abort if the backup fails.
    #[arg(long, default_value_t = false, conflicts_with = "backup")]
    require_backup: bool,
    /// Name recorded in the archive file name (default: from config or $USER).
    #[arg(long)]
    owner: Option<String>,
}

impl BackupArgs {
    fn mode(&self) -> BackupMode {
        if self.require_backup {
            BackupMode::Required
        } else if self.backup {
            BackupMode::BestEffort
        } else {
            BackupMode::Skip
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the workspace, repair it in place, or finish an interrupted soft reset.
    Install,
    /// Record the student's identity, experience level and sensor choice.
    Personalize {
        /// Student name.
        #[arg(long)]
        name: Option<String>,
        /// Experience level: beginner, intermediate or advanced.
        #[arg(long)]
        level: Option<String>,
        /// Sensor: AUTO, BME280, DHT22, AHT20_BMP280 or SIMULATED.
        #[arg(long)]
        sensor: Option<String>,
    },
    /// Wipe logs, data and credentials, rotate every secret, keep the skeleton.
    SoftReset {
        #[command(flatten)]
        backup: BackupArgs,
        /// Answer the confirmation prompt with yes.
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
    /// Delete the whole workspace after two confirmations.
    HardReset {
        #[command(flatten)]
        backup: BackupArgs,
    },
    /// Remove caches and temporary files.
    Clean,
    /// Show lifecycle state, platform and findings.
    Status,
    /// Run diagnostic checks on the host and workspace.
    Doctor,
    /// Print the workspace configuration.
    Config {
        /// Show secret values instead of masking them.
        #[arg(long, default_value_t = false)]
        reveal: bool,
    },
    /// List backup archives.
    Backups,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn context(cli: &Cli) -> Result<Context, String> {
    let file = ToolConfig::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(file, cli.root.as_deref(), cli.backup_root.as_deref())?;
    Ok(Context {
        settings,
        platform: cli.platform,
        json: cli.json,
    })
}

fn dispatch(cli: &Cli) -> Result<u8, String> {
    let ctx = || context(cli);
    match &cli.command {
        Commands::Install => commands::install::run(&ctx()?),
        Commands::Personalize {
            name,
            level,
            sensor,
        } => commands::personalize::run(
            &ctx()?,
            name.as_deref(),
            level.as_deref(),
            sensor.as_deref(),
        ),
        Commands::SoftReset { backup, yes } => {
            commands::soft_reset::run(&ctx()?, backup.mode(), *yes, backup.owner.as_deref())
        }
        Commands::HardReset { backup } => {
            commands::hard_reset::run(&ctx()?, backup.mode(), backup.owner.as_deref())
        }
        Commands::Clean => commands::clean::run(&ctx()?),
        Commands::Status => commands::status::run(&ctx()?),
        Commands::Doctor => commands::doctor::run(&ctx()?),
        Commands::Config { reveal } => commands::config::run(&ctx()?, *reveal),
        Commands::Backups => commands::backups::run(&ctx()?),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(dir),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LABCYCLE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    match dispatch(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
