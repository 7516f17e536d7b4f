use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::models::{Config, Direction, Privacy, SortBy};
use crate::paths::AppPaths;
use crate::upload::{PublishOutcome, Publisher};
use crate::youtube_api::Client;
use crate::{auth, stats, store, sync};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Local};
use colored::Colorize;

/// Authenticated API client for the current user.
fn connect(paths: &AppPaths, cfg: &Config) -> Result<Client> {
    let credentials = auth::get_credentials(paths, cfg)?;
    Ok(Client::new(&credentials.access_token))
}

fn print_warnings(outcome: &PublishOutcome) {
    if outcome.warnings.is_empty() {
        return;
    }
    for warning in &outcome.warnings {
        println!("{} {warning}", "Warning:".yellow());
    }
    println!("The video is safely published and the ID is saved.");
}

pub fn upload(metadata: &Path, privacy: Privacy) -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);
    let api = connect(&paths, &cfg)?;

    let mut report = |pct: u8| {
        print!("\rUploading: {pct:>3}%");
        let _ = io::stdout().flush();
    };

    let outcome = Publisher::new(&api).publish(metadata, privacy, &mut report)?;
    println!();

    println!("{}", "Upload completed successfully!".green());
    println!("Video ID:  {}", outcome.video_id);
    println!("Video URL: {}", outcome.url);
    print_warnings(&outcome);

    Ok(())
}

pub fn update(metadata: &Path) -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);
    let api = connect(&paths, &cfg)?;

    let outcome = Publisher::new(&api).update(metadata)?;

    println!("{}", "Video metadata updated successfully!".green());
    println!("Video URL: {}", outcome.url);
    print_warnings(&outcome);

    Ok(())
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn sync(
    source: Option<&Path>,
    destination: Option<&Path>,
    force_direction: Option<Direction>,
) -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);

    let source: PathBuf = source
        .map(Path::to_path_buf)
        .or(cfg.sync_source)
        .ok_or_else(|| {
            anyhow!(
                "no source directory given.\n\
                 Pass --source or set it via: vbyt config sync_source <path>"
            )
        })?;
    let destination: PathBuf = destination
        .map(Path::to_path_buf)
        .or(cfg.sync_destination)
        .ok_or_else(|| {
            anyhow!(
                "no destination directory given.\n\
                 Pass --destination or set it via: vbyt config sync_destination <path>"
            )
        })?;

    let plan = sync::plan(&source, &destination, force_direction)?;

    match plan.decision.times {
        Some((source_time, destination_time)) => match plan.decision.direction {
            Direction::ToLocal => {
                println!("SSD is newer (modified {})", format_time(source_time));
                println!("Local is older (modified {})", format_time(destination_time));
            }
            Direction::ToSsd => {
                println!("Local is newer (modified {})", format_time(destination_time));
                println!("SSD is older (modified {})", format_time(source_time));
            }
        },
        None => println!("Forcing direction: {}", plan.decision.direction.as_str()),
    }

    let label = match plan.decision.direction {
        Direction::ToLocal => "Syncing from SSD to Local",
        Direction::ToSsd => "Syncing from Local to SSD",
    };
    let (from, to) = plan.endpoints();
    println!("{}", label.bold());
    println!();
    println!("Excluding video files...");
    println!("From: {}", from.display());
    println!("To:   {}", to.display());

    sync::execute(&plan, &sync::Rsync)?;

    println!();
    println!("{}", "Sync completed successfully!".green());
    Ok(())
}

pub fn stats() -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);
    let api = connect(&paths, &cfg)?;

    match stats::channel_stats(&api).context("failed to fetch channel statistics")? {
        Some(channel) => stats::print_channel_stats(&channel),
        None => println!("{}", "No channel found!".yellow()),
    }
    Ok(())
}

pub fn videos(sort_by: SortBy, limit: usize, top: bool) -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);
    let api = connect(&paths, &cfg)?;

    match stats::list_videos(&api, sort_by, limit, top).context("failed to fetch videos")? {
        None => println!("{}", "No channel found!".yellow()),
        Some(videos) if videos.is_empty() => println!("{}", "No videos found!".yellow()),
        Some(videos) => stats::print_videos(&videos, sort_by, limit, top),
    }
    Ok(())
}

/// Empty values clear optional settings.
fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

pub fn config(key: &str, value: &str) -> Result<()> {
    let paths = AppPaths::init()?;
    let mut cfg = store::load_config(&paths.config_file);

    match key {
        "oauth_port" => {
            cfg.oauth_port = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid oauth_port '{value}': use a port number"))?;
        }
        "client_secrets" => cfg.client_secrets = optional_path(value),
        "sync_source" => cfg.sync_source = optional_path(value),
        "sync_destination" => cfg.sync_destination = optional_path(value),
        _ => bail!(
            "unknown config key '{key}': available keys are \
             'oauth_port', 'client_secrets', 'sync_source', 'sync_destination'"
        ),
    }

    store::save_config(&paths.config_file, &cfg)?;
    println!("{}", "Config updated.".green());
    Ok(())
}

pub fn info() -> Result<()> {
    let paths = AppPaths::init()?;
    let cfg = store::load_config(&paths.config_file);
    let secrets = cfg.effective_client_secrets(&paths.client_secret_file);

    println!("{}", "Data Paths".bold());
    println!("---------------");
    println!("Directory:      {}", paths.config_dir.display());
    println!("Config:         {}", paths.config_file.display());
    println!("Client Secrets: {}", secrets.display());
    println!("Token:          {}", paths.token_file.display());

    println!();
    println!("{}", "Settings".bold());
    println!("---------------");
    println!("OAuth Port:       {}", cfg.oauth_port);
    let show = |p: &Option<PathBuf>| {
        p.as_ref()
            .map_or_else(|| "(not set)".to_string(), |p| p.display().to_string())
    };
    println!("Sync Source:      {}", show(&cfg.sync_source));
    println!("Sync Destination: {}", show(&cfg.sync_destination));
    if let Some(state) = cfg.sync_destination.as_deref().and_then(store::load_sync_state) {
        println!(
            "Last Sync:        {}",
            state.last_sync.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("Client Secrets Exist? {}", secrets.exists());
    println!("Signed In? {}", paths.token_file.exists());

    Ok(())
}
