use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use show_runner::audio::{AudioBackend, RodioBackend, TimedBackend};
use show_runner::bus::ShowEvent;
use show_runner::clock::PauseClock;
use show_runner::config::ShowConfig;
use show_runner::segment_index::SegmentDirectoryIndex;
use show_runner::show::{survey, ShowHandle, ShowRunner};
use show_runner::state::StateStore;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "showrunner", about = "Unattended segment broadcast runner")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// State file (default: user config dir)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play every segment under a base path, one after another
    Run {
        /// Base path holding one folder per segment (default: last used)
        path: Option<PathBuf>,
        /// Don't open an audio device; voiced lines still take their clip length
        #[arg(long)]
        silent: bool,
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seconds to show a line that has no audio (overrides config)
        #[arg(long)]
        display_secs: Option<f32>,
        /// Pause after each voiced line in seconds (overrides config)
        #[arg(long)]
        inter_line_secs: Option<f32>,
        /// Play segment folders in name order
        #[arg(long)]
        sort: bool,
        /// Keep running after the last segment, waiting for `load <path>`
        #[arg(long)]
        stay: bool,
    },
    /// List the segment folders a base path would play, in order
    List {
        path: PathBuf,
        #[arg(long)]
        sort: bool,
    },
    /// Load every segment without playing and report what was found
    Check {
        path: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show remembered state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let state_path = cli.state_file.unwrap_or_else(StateStore::default_path);

    match cli.command {
        Commands::Status => {
            let store = StateStore::load(&state_path);
            println!("showrunner v{}", env!("CARGO_PKG_VERSION"));
            println!("State file: {}", store.path().display());
            match store.last_base_path() {
                Some(p) => println!("Last base path: {}", p.display()),
                None => println!("Last base path: none"),
            }
        }
        Commands::List { path, sort } => {
            let mut index = if sort {
                SegmentDirectoryIndex::sorted()
            } else {
                SegmentDirectoryIndex::new()
            };
            let count = index.set_base_path(&path)?;
            for (i, folder) in index.pending().enumerate() {
                println!("{:>3}. {}", i + 1, folder.display());
            }
            println!("{} segment(s)", count);
        }
        Commands::Check { path, config, json } => {
            let config = load_config(config)?;
            let report = survey(&config, &path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for s in &report {
                    match &s.error {
                        None => println!(
                            "OK   {}: {} [{} lines, {} voiced]",
                            s.folder,
                            s.title.as_deref().unwrap_or(""),
                            s.lines,
                            s.voiced_lines
                        ),
                        Some(e) => println!("FAIL {}: {}", s.folder, e),
                    }
                }
            }
            if report.iter().all(|s| s.error.is_some()) && !report.is_empty() {
                bail!("no playable segments under {}", path.display());
            }
        }
        Commands::Run {
            path,
            silent,
            config,
            display_secs,
            inter_line_secs,
            sort,
            stay,
        } => {
            let mut config = load_config(config)?;
            if let Some(s) = display_secs {
                config.display_secs = s;
            }
            if let Some(s) = inter_line_secs {
                config.inter_line_pause_secs = s;
            }
            config.sort_segments |= sort;
            config.validate()?;

            let clock = PauseClock::new();
            let backend: Box<dyn AudioBackend> = if silent {
                Box::new(TimedBackend::new(clock.clone()))
            } else {
                match RodioBackend::spawn() {
                    Ok(b) => Box::new(b),
                    Err(e) => {
                        warn!("{}; continuing without sound", e);
                        Box::new(TimedBackend::new(clock.clone()))
                    }
                }
            };

            let store = StateStore::load(&state_path);
            let remembered = store.last_base_path().map(Path::to_path_buf);
            if path.is_none() && remembered.is_none() && !stay {
                bail!("no base path given and none remembered; run `showrunner run <PATH>`");
            }
            let mut runner = ShowRunner::new(config, clock, backend)
                .with_state(store)
                .exit_when_complete(!stay);

            match path {
                Some(p) => {
                    let count = runner
                        .set_base_path(&p)
                        .with_context(|| format!("cannot play {}", p.display()))?;
                    println!("Playing {} segment(s) from {}", count, p.display());
                }
                None => {
                    if let Some(p) = &remembered {
                        println!("Resuming from {}", p.display());
                    }
                }
            }

            runner.lines().subscribe(|text: &String| println!("  {}", text));
            runner.events().subscribe(|e: &ShowEvent| match e {
                ShowEvent::Title(t) => println!("== {} ==", t),
                ShowEvent::SegmentFailed { path, reason } => {
                    eprintln!("Skipping {}: {}", path.display(), reason)
                }
                ShowEvent::Paused(true) => println!("[paused]"),
                ShowEvent::Paused(false) => println!("[resumed]"),
                ShowEvent::Stopped => println!("[stopped]"),
                ShowEvent::Completed => println!("Show completed."),
                _ => {}
            });

            spawn_console(runner.handle());
            runner.run().await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ShowConfig> {
    Ok(match path {
        Some(p) => ShowConfig::from_file(&p)?,
        None => ShowConfig::default(),
    })
}

/// Read operator commands from stdin on a plain thread.
fn spawn_console(handle: ShowHandle) {
    let spawned = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                match line.split_once(' ') {
                    Some(("load", path)) => handle.set_base_path(path.trim()),
                    _ => match line {
                        "pause" | "p" => handle.pause(true),
                        "resume" | "r" => handle.pause(false),
                        "stop" | "s" => handle.stop(),
                        "quit" | "q" => {
                            handle.shutdown();
                            break;
                        }
                        "" => {}
                        other => eprintln!(
                            "Unknown command '{}'. Try: pause, resume, stop, load <path>, quit",
                            other
                        ),
                    },
                }
            }
        });
    if let Err(e) = spawned {
        warn!("no console control: {}", e);
    }
}
