use std::{process::ExitCode, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use drivemirror::{
    oauth2,
    session::{self, Session},
};
use inquire::Confirm;
use treemirror::{loc, Config, Direction};

mod ui;

#[derive(Parser)]
#[command(name = "drivemirror")]
#[command(author, version, about, long_about=None)]
struct Cli {
    /// Path to the config file
    #[clap(long, short = 'c')]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Clone, Copy)]
enum Commands {
    /// Authorize access, then pull the remote folder into the staging directory
    Start,
    /// Push the staging directory to the bucket and to the remote folder
    End {
        /// Don't ask for confirmation
        #[clap(long, short = 'y')]
        yes: bool,
    },
    /// Start, wait for the work in the staging directory to be done, then end
    Session,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            log::error!("Can't start the runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(Cli::parse())) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn load_config(path: Option<&Utf8Path>) -> anyhow::Result<Config> {
    let cwd = loc::user::current_dir()?;
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("No such config file: {path}");
            }
            Config::load_from_file(path).await?
        }
        None => {
            let path = loc::config_file()?;
            if path.exists() {
                log::info!("Found config file: {path}");
                Config::load_from_file(&path).await?
            } else {
                log::info!("No config file at {path}, using defaults");
                Config::default()
            }
        }
    };
    config.resolve_paths(&cwd);
    log::trace!("Loaded config: {config:?}");
    Ok(config)
}

async fn confirm(message: &'static str) -> anyhow::Result<bool> {
    let ans = tokio::task::spawn_blocking(move || {
        Confirm::new(message)
            .with_default(false)
            .with_help_message("Make sure everything is saved and closed before exiting.")
            .prompt()
    })
    .await??;
    Ok(ans)
}

/// Runs a pass while showing its progress, then prints its report.
/// Returns whether every entry was mirrored.
async fn mirror(session: &Arc<Session<oauth2::Client>>, direction: Direction) -> anyhow::Result<bool> {
    let what = match direction {
        Direction::Pull => "Pulling",
        Direction::Push => "Pushing",
    };
    let (handle, rx) = session::spawn_mirror(session.clone(), direction);
    ui::follow(rx, what.to_string()).await;
    let report = handle.await??;
    ui::print_report(&report);
    Ok(report.is_success())
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_deref()).await?;

    if let Commands::End { yes: false } = cli.command {
        if !confirm("Push the staging directory now?").await? {
            println!("Nothing was pushed.");
            return Ok(true);
        }
    }

    let session = Arc::new(Session::open(&config).await?);
    let res = run_command(&session, cli.command).await;
    if let Err(err) = session.shutdown().await {
        log::error!("Could not save the tokens: {err:#}");
    }
    res
}

async fn run_command(
    session: &Arc<Session<oauth2::Client>>,
    command: Commands,
) -> anyhow::Result<bool> {
    match command {
        Commands::Start => mirror(session, Direction::Pull).await,
        Commands::End { .. } => mirror(session, Direction::Push).await,
        Commands::Session => {
            let pulled = mirror(session, Direction::Pull).await?;
            println!("Staging directory is ready: {}", session.staging_dir());
            while !confirm("End the session and push the staging directory?").await? {}
            let pushed = mirror(session, Direction::Push).await?;
            Ok(pulled && pushed)
        }
    }
}
