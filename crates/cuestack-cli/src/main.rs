//! cuestack CLI - the `cuestack` command.
//!
//! Runs a show headless: the cue list scheduler, the OSC control endpoint,
//! time/MIDI/key triggers and an audio output stream, until Ctrl+C.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cuestack_core::osc::{OscArg, OscClient, OscDispatcher, OscMessage, OscServer};
use cuestack_core::{
    list_output_devices, show, AudioOutput, CueList, CueListConfig, CueListHandle, EngineConfig, MidiInputManager,
    ShowInfo,
};

/// cuestack - live show cueing
#[derive(Parser, Debug)]
#[command(name = "cuestack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Headless cue list runner with OSC remote control", long_about = None)]
struct Args {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a show until Ctrl+C
    Run {
        /// Show document to load
        #[arg(value_name = "SHOW")]
        file: PathBuf,

        /// Output channel count
        #[arg(long)]
        channels: Option<usize>,

        /// OSC listen port
        #[arg(long)]
        osc_port: Option<u16>,

        /// OSC address prefix
        #[arg(long)]
        osc_prefix: Option<String>,

        /// Do not open an audio device
        #[arg(long)]
        no_audio: bool,

        /// Do not listen for OSC
        #[arg(long)]
        no_osc: bool,
    },

    /// Print the cues of a show
    List {
        #[arg(value_name = "SHOW")]
        file: PathBuf,
    },

    /// Send one OSC message
    Send {
        /// Target as host:port
        target: String,

        /// OSC address, e.g. /cue/play
        address: String,

        /// Arguments (int, float, else string)
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List audio output and MIDI input devices
    Devices,

    /// Show the configuration file location
    Config {
        /// Write the commented default configuration
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },

    /// Create an empty show document
    New {
        #[arg(value_name = "SHOW")]
        file: PathBuf,

        #[arg(long, default_value = "Untitled show")]
        name: String,

        #[arg(long, default_value = "")]
        designer: String,

        #[arg(long, default_value_t = 2)]
        channels: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger();

    match args.command {
        Commands::Run {
            file,
            channels,
            osc_port,
            osc_prefix,
            no_audio,
            no_osc,
        } => {
            let mut config = load_config(args.config.as_deref())?;
            if let Some(channels) = channels {
                config.audio.channels = channels;
            }
            if let Some(port) = osc_port {
                config.osc.port = port;
            }
            if let Some(prefix) = osc_prefix {
                config.osc.prefix = prefix;
            }
            if no_osc {
                config.osc.enabled = false;
            }
            run_show(&file, &config, !no_audio)
        }
        Commands::List { file } => list_show(&file),
        Commands::Send { target, address, args } => {
            let msg = OscMessage::new(address, args.iter().map(|a| OscArg::parse(a)).collect());
            let client = OscClient::new(&target).with_context(|| format!("Cannot reach {}", target))?;
            client.send(&msg).context("Failed to send OSC message")?;
            println!("Sent {} to {}", msg, client.target());
            Ok(())
        }
        Commands::Devices => print_devices(),
        Commands::Config { init, force } => {
            let path = match args.config {
                Some(path) => path,
                None => EngineConfig::config_path()?,
            };
            if init {
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                EngineConfig::write_default_config(&path)?;
                println!("Wrote default configuration to {}", path.display());
            } else {
                println!("{}", path.display());
                if !path.exists() {
                    println!("(not created yet; run `cuestack config --init`)");
                }
            }
            Ok(())
        }
        Commands::New {
            file,
            name,
            designer,
            channels,
        } => {
            if file.exists() {
                anyhow::bail!("{} already exists", file.display());
            }
            let info = ShowInfo {
                show_name: name,
                designer,
                revision: 0,
            };
            show::write_empty(&file, &info, channels).with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Created {}", file.display());
            Ok(())
        }
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            EngineConfig::load_from(path).with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => EngineConfig::load_or_default(),
    };
    Ok(config)
}

fn check_config(config: &EngineConfig) -> Result<()> {
    let problems = config.validate();
    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        log::error!("Config: {}", problem);
    }
    anyhow::bail!("Invalid configuration ({} problem(s))", problems.len())
}

fn run_show(file: &Path, config: &EngineConfig, audio: bool) -> Result<()> {
    check_config(config)?;

    let list = CueList::new(CueListConfig::from(config)).context("Failed to start cue list")?;
    list.set_midi_source(Arc::new(MidiInputManager::new(config.midi.default_device.clone())));

    let report = show::load(&mut list.lock(), file).with_context(|| format!("Failed to load {}", file.display()))?;
    println!(
        "Loaded {} cue(s), {} trigger(s){}",
        report.cues,
        report.triggers,
        if report.skipped > 0 {
            format!(", {} skipped (see log)", report.skipped)
        } else {
            String::new()
        }
    );

    let osc = if config.osc.enabled {
        let dispatcher = OscDispatcher::new(&config.osc.prefix, list.handle());
        Some(OscServer::bind(&config.osc.bind_address(), dispatcher).context("Failed to start OSC endpoint")?)
    } else {
        None
    };

    let output = if audio {
        let channels = list.lock().channels();
        match AudioOutput::start(
            list.handle(),
            config.audio.output_device.as_deref(),
            channels,
            config.audio.sample_rate,
        ) {
            Ok(output) => Some(output),
            Err(e) => {
                log::error!("Running without audio: {}", e);
                None
            }
        }
    } else {
        None
    };

    spawn_key_reader(list.handle());

    let term = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, term.clone()).context("Failed to install signal handler")?;
    }

    println!("Running. Type a key name and Enter to fire key triggers, 'go' to play the next cue. Ctrl+C to exit.");
    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
        list.reap();
    }

    log::info!("Shutting down");
    drop(output);
    if let Some(osc) = osc {
        osc.shutdown();
    }
    list.lock().stop_all();
    list.shutdown();
    Ok(())
}

/// Forward stdin lines as key presses. The thread is left blocked on stdin at exit.
fn spawn_key_reader(handle: CueListHandle) {
    let spawned = std::thread::Builder::new()
        .name("cuestack-keys".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let key = line.trim();
                if key.is_empty() {
                    continue;
                }
                let handled = handle.with_lock(|list| {
                    if key.eq_ignore_ascii_case("go") {
                        usize::from(list.go())
                    } else {
                        list.dispatch_key(key)
                    }
                });
                match handled {
                    Some(0) => println!("'{}': nothing to do", key),
                    Some(n) => log::debug!("'{}' fired {} action(s)", key, n),
                    None => break,
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Key input disabled: {}", e);
    }
}

fn list_show(file: &Path) -> Result<()> {
    let list = CueList::without_scheduler(CueListConfig::default());
    let mut guard = list.lock();
    let report = show::load(&mut guard, file).with_context(|| format!("Failed to load {}", file.display()))?;

    println!("{} ({} channels)", guard.info.show_name, guard.channels());
    if !guard.info.designer.is_empty() {
        println!("Designer: {}", guard.info.designer);
    }
    println!();
    println!("{:<10} {:<10} {:<24} {:>10} {:>10} {:>10}  STATUS", "ID", "CLASS", "NAME", "PRE", "ACTION", "POST");
    for uid in guard.walk() {
        let Some(cue) = guard.cue(uid) else {
            continue;
        };
        let depth = std::iter::successors(cue.core.parent(), |p| guard.cue(*p).and_then(|c| c.core.parent())).count();
        let id = format!("{}{}", "  ".repeat(depth), cue.core.id);
        let field = |name: &str| cue.field(name).unwrap_or_default();
        let status = match cue.error() {
            Some(error) => format!("error: {}", error),
            None => format!("{} trigger(s)", cue.triggers.len()),
        };
        println!(
            "{:<10} {:<10} {:<24} {:>10} {:>10} {:>10}  {}",
            id,
            cue.class_name(),
            field("name"),
            field("pre_time"),
            field("action_time"),
            field("post_time"),
            status
        );
    }
    if report.skipped > 0 {
        println!("\n{} entries could not be read", report.skipped);
    }
    Ok(())
}

fn print_devices() -> Result<()> {
    println!("Audio outputs:");
    match list_output_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none)"),
        Ok(devices) => {
            for device in devices {
                let marker = if device.is_default_output { " [default]" } else { "" };
                println!("  {}{}", device.name, marker);
                println!("    Channels:     {}", device.max_output_channels);
                if !device.sample_rates.is_empty() {
                    let rates: Vec<String> = device.sample_rates.iter().map(|r| r.to_string()).collect();
                    println!("    Sample rates: {}", rates.join(", "));
                }
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!();
    println!("MIDI inputs:");
    match MidiInputManager::list_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none)"),
        Ok(devices) => {
            for device in devices {
                println!("  [{}] {}", device.port_index, device.name);
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }
    Ok(())
}
