use anyhow::Result;
use clap::{Parser, Subcommand};
use nmsmods::config::Paths;
use nmsmods::App;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nmsmods")]
#[command(author, version, about = "A profile-aware mod manager for No Man's Sky")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Repository directory (defaults to $NMSMODS_HOME, then ~/.nmsmods)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a local zip archive into the repository
    Import {
        path: PathBuf,
        /// Mod id to use instead of one derived from the file name
        #[arg(long)]
        id: Option<String>,
    },

    /// List tracked mods with their index
    Downloads {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install a mod into a profile (deploys when the profile is active)
    Install {
        /// Mod id or index from `downloads`
        #[arg(value_name = "MOD")]
        target: String,
        /// Target profile (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
        /// Show what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Install an already extracted mod directory
    InstallDir {
        path: PathBuf,
        /// Mod id to use instead of one derived from the directory name
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        /// Refuse to replace an existing installation
        #[arg(long)]
        no_overwrite: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-extract a mod over its existing installation
    Reinstall {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        profile: Option<String>,
        /// Refuse to replace an existing store copy
        #[arg(long)]
        no_overwrite: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Enable an installed mod and deploy it
    Enable {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        profile: Option<String>,
    },

    /// Disable an installed mod and remove it from the game
    Disable {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        profile: Option<String>,
    },

    /// Remove a mod from a profile (by id, index, or installed folder name)
    Uninstall {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Forget a mod that is not installed anywhere
    RmDownload {
        #[arg(value_name = "MOD")]
        target: String,
        /// Leave the archive in downloads/
        #[arg(long)]
        keep_archive: bool,
    },

    /// Check an installation's files
    Verify {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        profile: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List mods installed in the active profile
    Installed,

    /// Show everything recorded about a mod
    Info {
        #[arg(value_name = "MOD")]
        target: String,
        #[arg(long)]
        json: bool,
    },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Set the game installation directory
    SetPath { path: PathBuf },

    /// Show repository and game paths
    Where,

    /// Check the repository and game directory for problems
    Doctor {
        #[arg(long)]
        json: bool,
    },

    /// Forget tracked state and scratch data
    Reset {
        /// Remove everything under the repository directory
        #[arg(long)]
        all: bool,
        /// Keep archives in downloads/ (pass `--keep-downloads=false` to delete them)
        #[arg(
            long,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true",
            action = clap::ArgAction::Set
        )]
        keep_downloads: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Wipe staging leftovers
    Clean {
        /// Also delete archives no mod refers to
        #[arg(long)]
        orphan_archives: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List profiles
    List,
    /// Show the active profile
    Status,
    /// Switch the active profile and redeploy
    Use { name: String },
    /// Redeploy the active profile
    Deploy,
}

fn setup_logging(verbosity: u8, log_file: &Path) {
    let filter = match verbosity {
        0 => "nmsmods=warn",
        1 => "nmsmods=info",
        2 => "nmsmods=debug",
        _ => "nmsmods=trace",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file);
    let file_layer = file.ok().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Arc::new(file))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = Paths::resolve(cli.home)?;
    let mut app = App::new(paths)?;
    setup_logging(cli.verbose, &app.paths.log_file());

    match cli.command {
        Commands::Import { path, id } => app.cmd_import(&path, id.as_deref())?,
        Commands::Downloads { json } => app.cmd_downloads(json)?,
        Commands::Install {
            target,
            profile,
            dry_run,
        } => app.cmd_install(&target, profile.as_deref(), dry_run)?,
        Commands::InstallDir {
            path,
            id,
            profile,
            no_overwrite,
            dry_run,
        } => app.cmd_install_dir(&path, id.as_deref(), profile.as_deref(), no_overwrite, dry_run)?,
        Commands::Reinstall {
            target,
            profile,
            no_overwrite,
            dry_run,
        } => app.cmd_reinstall(&target, profile.as_deref(), no_overwrite, dry_run)?,
        Commands::Enable { target, profile } => app.cmd_enable(&target, profile.as_deref())?,
        Commands::Disable { target, profile } => app.cmd_disable(&target, profile.as_deref())?,
        Commands::Uninstall {
            target,
            profile,
            dry_run,
        } => app.cmd_uninstall(&target, profile.as_deref(), dry_run)?,
        Commands::RmDownload {
            target,
            keep_archive,
        } => app.cmd_rm_download(&target, keep_archive)?,
        Commands::Verify {
            target,
            profile,
            json,
        } => app.cmd_verify(&target, profile.as_deref(), json)?,
        Commands::Installed => app.cmd_installed()?,
        Commands::Info { target, json } => app.cmd_info(&target, json)?,
        Commands::Profile { action } => match action {
            ProfileCommands::List => app.cmd_profile_list()?,
            ProfileCommands::Status => app.cmd_profile_status()?,
            ProfileCommands::Use { name } => app.cmd_profile_use(&name)?,
            ProfileCommands::Deploy => app.cmd_profile_deploy()?,
        },
        Commands::SetPath { path } => app.cmd_set_path(&path)?,
        Commands::Where => app.cmd_where()?,
        Commands::Doctor { json } => app.cmd_doctor(json)?,
        Commands::Reset {
            all,
            keep_downloads,
            dry_run,
        } => app.cmd_reset(all, keep_downloads, dry_run)?,
        Commands::Clean {
            orphan_archives,
            dry_run,
        } => app.cmd_clean(orphan_archives, dry_run)?,
    }

    Ok(())
}
