use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use earprint_control::config::{ChannelMapping, Configuration};
use earprint_control::devices::{self, DeviceDiscovery, DeviceList};
use earprint_control::jobs::{self, JobEvent, JobKind, JobState, ProcessSupervisor};
use earprint_control::monitor::LevelMonitorPair;
use earprint_control::services::{AppSettings, Toolchain};

#[derive(Debug, Parser)]
#[command(
    name = "earprint-control",
    version,
    about = "Drive the Earprint measurement toolchain from the command line"
)]
struct Cli {
    /// Application settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Session configuration (JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List playback and recording devices
    Devices {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the speaker layouts the toolchain knows
    Layouts,
    /// Print the channel labels of a speaker layout
    Labels { layout: String },
    /// Print the command a job would run
    Args {
        #[arg(value_enum, default_value_t = KindArg::Processing)]
        kind: KindArg,
    },
    /// Run a job and stream its output; Ctrl-C cancels it
    Run {
        #[arg(value_enum)]
        kind: KindArg,
    },
    /// Show live input/output levels
    Monitor {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Map channels sequentially from the selected devices and layout
    Automap {
        /// Write the mapping back to the configuration file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Processing,
    Measurement,
    Headphones,
    Room,
    CaptureWizard,
    LayoutWizard,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Processing => JobKind::Processing,
            KindArg::Measurement => JobKind::Measurement,
            KindArg::Headphones => JobKind::HeadphoneRecording,
            KindArg::Room => JobKind::RoomRecording,
            KindArg::CaptureWizard => JobKind::CaptureWizard,
            KindArg::LayoutWizard => JobKind::LayoutWizard,
        }
    }
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let panic_msg = format!("{:?}", panic_info);
        if panic_msg.contains("get_htstamp") || panic_msg.contains("get_trigger_htstamp") {
            log::warn!("ALSA timing issue detected (known cpal bug), ignoring...");
            return;
        }
        default_hook(panic_info);
    }));
}

struct Session {
    toolchain: Toolchain,
    config: Configuration,
    config_path: Option<PathBuf>,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let settings = match &cli.settings {
            Some(path) => AppSettings::load(path),
            None => AppSettings::load_default(),
        };
        let config = match &cli.config {
            Some(path) => Configuration::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => Configuration::default(),
        };
        Ok(Self {
            toolchain: Toolchain::new(settings),
            config,
            config_path: cli.config.clone(),
        })
    }

    async fn discover(&self) -> Arc<DeviceList> {
        let discovery = Arc::new(DeviceDiscovery::with_toolchain(&self.toolchain));
        let report = discovery.discover_async().await;
        for diagnostic in &report.diagnostics {
            eprintln!("{}", diagnostic);
        }
        report.devices
    }

    /// Configuration with empty device choices filled from discovery.
    async fn config_with_devices(&self) -> Configuration {
        if !self.config.playback_device.trim().is_empty()
            && !self.config.recording_device.trim().is_empty()
        {
            return self.config.clone();
        }
        let found = self.discover().await;
        devices::apply_default_devices(&self.config, &found)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    install_panic_hook();

    let cli = Cli::parse();
    let session = Session::load(&cli)?;

    match cli.command {
        Command::Devices { json } => list_devices(&session, json).await,
        Command::Layouts => {
            let toolchain = session.toolchain.clone();
            let layouts = tokio::task::spawn_blocking(move || devices::list_layouts(&toolchain)).await??;
            for layout in layouts {
                println!("{}", layout);
            }
            Ok(())
        }
        Command::Labels { layout } => {
            let labels = speaker_labels(&session.toolchain, &layout).await?;
            println!("{}", labels.join(" "));
            Ok(())
        }
        Command::Args { kind } => {
            let config = session.config_with_devices().await;
            let spec = jobs::job_spec(kind.into(), &config, &session.toolchain);
            println!("{}", spec.command);
            Ok(())
        }
        Command::Run { kind } => run_job(&session, kind.into()).await,
        Command::Monitor { seconds } => monitor(&session, seconds).await,
        Command::Automap { write } => automap(&session, write).await,
    }
}

async fn speaker_labels(toolchain: &Toolchain, layout: &str) -> Result<Vec<String>> {
    let toolchain = toolchain.clone();
    let layout = layout.to_string();
    let labels =
        tokio::task::spawn_blocking(move || devices::layout_labels(&toolchain, &layout)).await??;
    Ok(labels)
}

async fn list_devices(session: &Session, json: bool) -> Result<()> {
    let devices = session.discover().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&*devices)?);
        return Ok(());
    }

    let marker = |id: usize, default: Option<usize>| if default == Some(id) { "*" } else { " " };
    println!("Playback devices:");
    for device in &devices.playback {
        println!(
            " {} {:>3}  {} ({} out)",
            marker(device.id, devices.default_playback),
            device.id,
            device.name,
            device.max_output_channels
        );
    }
    println!("Recording devices:");
    for device in &devices.recording {
        println!(
            " {} {:>3}  {} ({} in)",
            marker(device.id, devices.default_recording),
            device.id,
            device.name,
            device.max_input_channels
        );
    }
    Ok(())
}

async fn run_job(session: &Session, kind: JobKind) -> Result<()> {
    let config = session.config_with_devices().await;
    let spec = jobs::prepare(kind, &config, &session.toolchain)?;

    let supervisor = ProcessSupervisor::new();
    let mut events = supervisor.subscribe();
    let handle = supervisor.launch(spec)?;
    log::info!("Started {} job {}", handle.kind, handle.id);

    let report = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(JobEvent::Log { text, terminated, .. }) => {
                    if terminated {
                        println!("{}", text);
                    } else {
                        print!("{}", text);
                    }
                }
                Ok(JobEvent::Progress { progress, .. }) => match progress.remaining_seconds {
                    Some(remaining) => eprintln!("[{:>3.0}%] {:.0}s remaining", progress.fraction * 100.0, remaining),
                    None => eprintln!("[{:>3.0}%]", progress.fraction * 100.0),
                },
                Ok(JobEvent::Finished(report)) => break report,
                Ok(JobEvent::Started { .. }) => {}
                Err(RecvError::Lagged(skipped)) => log::warn!("Skipped {} job events", skipped),
                Err(RecvError::Closed) => bail!("Job event stream closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling...");
                supervisor.cancel();
            }
        }
    };

    match report.state {
        JobState::Completed => Ok(()),
        JobState::Cancelled => bail!("{} job cancelled", report.kind),
        JobState::Failed { reason, .. } => bail!("{} job failed: {}", report.kind, reason),
    }
}

async fn monitor(session: &Session, seconds: Option<u64>) -> Result<()> {
    let config = session.config_with_devices().await;
    let mut monitors = LevelMonitorPair::new();
    monitors.start(&session.toolchain, &config)?;

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let levels = monitors.levels();
                println!("in {:>5.2}  out {:>5.2}", levels.input, levels.output);
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    monitors.stop();
    Ok(())
}

async fn automap(session: &Session, write: bool) -> Result<()> {
    let found = session.discover().await;
    let config = devices::apply_default_devices(&session.config, &found);

    let playback_id: usize = config
        .playback_device
        .trim()
        .parse()
        .context("No playback device selected")?;
    let recording_id: usize = config
        .recording_device
        .trim()
        .parse()
        .context("No recording device selected")?;
    let playback = found
        .playback_device(playback_id)
        .with_context(|| format!("Playback device {} not found", playback_id))?;
    let recording = found
        .recording_device(recording_id)
        .with_context(|| format!("Recording device {} not found", recording_id))?;

    let labels = speaker_labels(&session.toolchain, &config.layout).await?;
    let mapping = devices::auto_map_channels(playback, recording, &config.layout, labels.len())?;
    println!(
        "--output_channels {} --input_channels {}",
        ChannelMapping::join(&mapping.output_channels),
        ChannelMapping::join(&mapping.input_channels)
    );

    if write {
        let Some(path) = &session.config_path else {
            bail!("--write needs --config");
        };
        let updated = Configuration {
            channel_mapping: mapping,
            ..config
        };
        updated.save(path)?;
    }
    Ok(())
}
