//! `taskrec` command line tool
//!
//! Records desktop input into task files and replays or schedules them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use taskrec::{
    abort_keys, list_tasks, InputInjector, LoopMode, MemoryInjector, PlaybackConfig,
    PlaybackSettings, PlaybackUpdate, Player, RdevInjector, Recorder, RecorderConfig, Scheduler,
    TaskFile, DEFAULT_TICK_INTERVAL,
};
use tokio::signal::ctrl_c;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

mod logging;

#[derive(Parser, Debug)]
#[command(name = "taskrec")]
#[command(about = "Record, replay and schedule mouse and keyboard tasks")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a recorded task
    Play {
        /// Task file to play
        file: PathBuf,

        /// Playback speed between 0.1 and 10
        #[arg(long)]
        speed: Option<f64>,

        /// Play the task this many times
        #[arg(long = "loop", value_name = "N", conflicts_with = "until_stopped")]
        loop_count: Option<u32>,

        /// Repeat until stopped with Esc, F9 or Ctrl+C
        #[arg(long)]
        until_stopped: bool,

        /// Listen for Esc/F9 (stop) and F10 (pause) while playing
        #[arg(long)]
        hotkeys: bool,

        /// Walk through the task without injecting any input
        #[arg(long)]
        dry_run: bool,
    },

    /// List saved tasks
    List {
        #[arg(long, default_value = "tasks")]
        dir: PathBuf,
    },

    /// Show details about a task
    Info {
        file: PathBuf,

        /// Also list every event
        #[arg(long)]
        events: bool,
    },

    /// Record a new task until Esc, F9 or Ctrl+C
    Record {
        file: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },

    /// Run a task on its saved schedule until Ctrl+C
    Schedule {
        file: PathBuf,

        /// Seconds between schedule checks
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose)?;
    debug!(?args, "Parsed arguments");

    match args.command {
        Command::Play {
            file,
            speed,
            loop_count,
            until_stopped,
            hotkeys,
            dry_run,
        } => play(file, speed, loop_count, until_stopped, hotkeys, dry_run).await,
        Command::List { dir } => list(dir),
        Command::Info { file, events } => show_info(file, events),
        Command::Record { file, name } => record(file, name).await,
        Command::Schedule { file, interval } => schedule(file, interval).await,
    }
}

fn load_task(file: &PathBuf) -> Result<TaskFile> {
    TaskFile::load_from_file(file).with_context(|| format!("failed to load {}", file.display()))
}

/// Start from the task's saved settings and apply command line overrides
fn playback_config(
    saved: &PlaybackSettings,
    speed: Option<f64>,
    loop_count: Option<u32>,
    until_stopped: bool,
) -> Result<PlaybackConfig> {
    let saved = saved.to_config().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring invalid saved playback settings");
        PlaybackConfig::default()
    });
    let loop_mode = if until_stopped {
        LoopMode::UntilCancelled
    } else if let Some(n) = loop_count {
        LoopMode::FixedCount(n)
    } else {
        saved.loop_mode()
    };
    Ok(PlaybackConfig::new(speed.unwrap_or(saved.speed()), loop_mode)?)
}

async fn play(
    file: PathBuf,
    speed: Option<f64>,
    loop_count: Option<u32>,
    until_stopped: bool,
    hotkeys: bool,
    dry_run: bool,
) -> Result<()> {
    let task = load_task(&file)?;
    if task.events.is_empty() {
        bail!("{} has no events to play", file.display());
    }
    let config = playback_config(&task.playback, speed, loop_count, until_stopped)?;

    let injector: Arc<dyn InputInjector> = if dry_run {
        Arc::new(MemoryInjector::new())
    } else {
        Arc::new(RdevInjector::new())
    };
    let player = Player::new(injector);

    let _listener = if hotkeys {
        Some(abort_keys(player.clone())?)
    } else {
        None
    };
    let interrupt = player.clone();
    tokio::spawn(async move {
        if ctrl_c().await.is_ok() {
            interrupt.stop();
        }
    });

    println!("Playing {} ({} events, {})", file.display(), task.events.len(), config);
    let outcome = player
        .play(&task.events, config, |update| match update {
            PlaybackUpdate::Progress { iteration, .. } if config.loop_mode() != LoopMode::OneShot => {
                println!("[pass {}] {}", iteration, update)
            }
            _ => println!("{}", update),
        })
        .await?;

    println!(
        "{:?} after {} pass(es): {} events, {} errors",
        outcome.state, outcome.iterations, outcome.events_executed, outcome.errors
    );
    Ok(())
}

fn list(dir: PathBuf) -> Result<()> {
    let tasks = list_tasks(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
    if tasks.is_empty() {
        println!("No tasks found in {}", dir.display());
        return Ok(());
    }
    println!("Tasks in {}:", dir.display());
    for name in tasks {
        println!("  {}", name);
    }
    Ok(())
}

fn show_info(file: PathBuf, events: bool) -> Result<()> {
    let task = load_task(&file)?;
    println!("{}", task.summary());

    if events {
        println!();
        for (i, event) in task.events.iter().enumerate() {
            println!("[{:>4}] {:>8.3}s - {}", i + 1, event.timestamp(), event);
        }
    }
    Ok(())
}

async fn record(file: PathBuf, name: Option<String>) -> Result<()> {
    let recorder = Recorder::new(RecorderConfig::default());

    let mut status_stream = recorder.status_stream();
    tokio::spawn(async move {
        while let Some(status) = status_stream.next().await {
            println!("{}", status);
        }
    });

    let _listener = recorder.attach()?;
    recorder.start();
    println!("Recording... press Esc or F9 to finish");

    tokio::select! {
        _ = recorder.stop_requested() => debug!("Stop chord received"),
        result = ctrl_c() => result.context("failed to wait for Ctrl+C")?,
    }

    let sequence = recorder.stop();
    if sequence.is_empty() {
        warn!("No events were captured");
    }
    let task = TaskFile::new(name, sequence, PlaybackSettings::default(), None);
    task.save_to_file(&file)
        .with_context(|| format!("failed to save {}", file.display()))?;
    info!(path = %file.display(), events = task.event_count, "Task saved");
    println!("Saved {} events to {}", task.event_count, file.display());
    Ok(())
}

async fn schedule(file: PathBuf, interval: Option<u64>) -> Result<()> {
    let task = load_task(&file)?;
    let Some(config) = task.schedule.clone() else {
        bail!("{} has no schedule", file.display());
    };
    if !config.enabled {
        bail!("the schedule in {} is disabled", file.display());
    }

    let scheduler = Scheduler::new(Player::with_host_injector())
        .with_progress(|update| println!("{}", update));
    scheduler.configure(config.clone())?;
    scheduler.set_sequence(task.events);

    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TICK_INTERVAL)
        .max(Duration::from_secs(1));
    let _listener = abort_keys(scheduler.player().clone())?;
    let handle = scheduler.spawn(interval);
    println!("Scheduled: {}. Press Ctrl+C to exit", config);

    ctrl_c().await.context("failed to wait for Ctrl+C")?;
    scheduler.disable();
    scheduler.player().stop();
    handle.abort();
    println!("Scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_play_flags() {
        let args = Args::parse_from(["taskrec", "play", "task.json", "--speed", "2", "--loop", "3"]);
        match args.command {
            Command::Play {
                speed, loop_count, ..
            } => {
                assert_eq!(speed, Some(2.0));
                assert_eq!(loop_count, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_loop_conflicts_with_until_stopped() {
        let parsed = Args::try_parse_from([
            "taskrec",
            "play",
            "task.json",
            "--loop",
            "2",
            "--until-stopped",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides_apply_on_top_of_saved_settings() {
        let saved = PlaybackSettings {
            speed: 3.0,
            looped: true,
            loop_count: 4,
            run_until_stop: false,
        };
        let config = playback_config(&saved, None, None, false).unwrap();
        assert_eq!(config.speed(), 3.0);
        assert_eq!(config.loop_mode(), LoopMode::FixedCount(4));

        let config = playback_config(&saved, Some(0.5), None, true).unwrap();
        assert_eq!(config.speed(), 0.5);
        assert_eq!(config.loop_mode(), LoopMode::UntilCancelled);

        assert!(playback_config(&saved, Some(20.0), None, false).is_err());
        assert!(playback_config(&saved, None, Some(0), false).is_err());
    }
}
