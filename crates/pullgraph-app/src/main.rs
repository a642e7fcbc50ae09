//! pullgraph - audio graph renderer
//!
//! Builds a tone -> gain graph and renders it offline into a WAV file, or
//! plays it through the default output device.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use pullgraph_core::{Format, PcmBuffer, Time};
use pullgraph_engine::builtin::{GainUnit, ToneUnit};
use pullgraph_engine::{EngineConfig, Graph, Node, OfflineAction, OfflineOutputNode, UnitNode};
use pullgraph_file::{AudioFile, CreateArgs, FileSettings, WavFile, WriteError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pullgraph")]
#[command(about = "Render audio graphs offline or in real time", long_about = None)]
struct Cli {
    /// Engine configuration file (RON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a test tone through a gain stage into a WAV file
    Render {
        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Write 16-bit integer samples instead of 32-bit float
        #[arg(long)]
        int16: bool,

        #[command(flatten)]
        tone: ToneArgs,
    },

    /// Write the effective engine configuration to a file
    Config {
        /// Destination RON file
        path: PathBuf,
    },

    /// Play a test tone through the default output device
    #[cfg(feature = "cpal")]
    Play {
        #[command(flatten)]
        tone: ToneArgs,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct ToneArgs {
    /// Length in seconds
    #[arg(short, long, default_value_t = 2.0)]
    seconds: f64,

    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Gain applied after the tone (0.0 to 2.0)
    #[arg(short, long, default_value_t = 0.5)]
    gain: f32,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pullgraph=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    tracing::info!("Engine config: {:?}", config);

    match cli.command {
        Command::Render {
            output,
            int16,
            tone,
        } => {
            let frames = render_to_file(&config, &output, int16, tone)?;
            println!("Rendered {frames} frames to {}", output.display());
            Ok(())
        }
        Command::Config { path } => {
            config
                .save(&path)
                .with_context(|| format!("Failed to write config: {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        #[cfg(feature = "cpal")]
        Command::Play { tone } => play(tone),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    EngineConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display()))
}

/// Tone and gain unit nodes, wired tone -> gain
struct ToneChain {
    tone: Arc<UnitNode>,
    gain: Arc<UnitNode>,
}

impl ToneChain {
    fn build(graph: &Graph, format: Format, args: ToneArgs) -> Result<Self> {
        let tone = UnitNode::new(Box::new(ToneUnit::default()));
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        graph
            .connect(tone.node(), gain.node(), format)
            .context("Failed to connect tone to gain")?;

        tone.set_parameter(ToneUnit::FREQUENCY, 0, args.frequency)
            .context("Failed to set tone frequency")?;
        gain.set_parameter(GainUnit::GAIN, 0, args.gain)
            .context("Failed to set gain")?;
        if tone.prepared_format().is_none() || gain.prepared_format().is_none() {
            bail!("Units cannot render {format}");
        }
        Ok(Self { tone, gain })
    }

    fn output(&self) -> &Arc<Node> {
        self.gain.node()
    }
}

/// Render the tone chain offline into `path`; returns the frames written
fn render_to_file(
    config: &EngineConfig,
    path: &Path,
    int16: bool,
    args: ToneArgs,
) -> Result<u64> {
    let format = config.format().context("Invalid engine format")?;
    let sample_rate = config.sample_rate.round() as u32;
    let channels = u16::try_from(config.channel_count).context("Too many channels")?;
    let settings = if int16 {
        FileSettings::int16(sample_rate, channels)
    } else {
        FileSettings::float32(sample_rate, channels)
    };
    let file = WavFile::created(
        CreateArgs::new(path, settings)
            .pcm_format(format.pcm_format())
            .interleaved(format.is_interleaved()),
    )
    .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let file = Arc::new(Mutex::new(file));

    let graph = Graph::new();
    let chain = ToneChain::build(&graph, format, args)?;
    let offline = OfflineOutputNode::with_frames_per_slice(config.frames_per_slice);
    offline.set_render_length(Some((args.seconds * config.sample_rate).round() as u64));
    graph.set_offline_output(&offline);
    graph
        .connect(chain.output(), offline.node(), format)
        .context("Failed to connect gain to output")?;

    let write_error: Arc<Mutex<Option<WriteError>>> = Arc::new(Mutex::new(None));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let render = {
        let file = Arc::clone(&file);
        let write_error = Arc::clone(&write_error);
        move |buffer: &mut PcmBuffer<'_>, _: &Time| match file.lock().write_from_buffer(buffer) {
            Ok(()) => OfflineAction::Continue,
            Err(e) => {
                *write_error.lock() = Some(e);
                OfflineAction::Stop
            }
        }
    };
    graph
        .start_offline_render(render, move |outcome| {
            let _ = done_tx.send(outcome);
        })
        .context("Failed to start offline render")?;

    let outcome = done_rx
        .recv()
        .context("Offline render ended without completing")?;
    file.lock().close();
    tracing::debug!("Tone node {} finished", chain.tone.node().id());

    if let Some(e) = write_error.lock().take() {
        return Err(e).context("Failed to write output file");
    }
    tracing::info!("Offline render complete: {:?}", outcome);
    Ok(outcome.frames())
}

#[cfg(feature = "cpal")]
fn play(args: ToneArgs) -> Result<()> {
    use pullgraph_engine::{CpalDevice, Device, DeviceIoNode};
    use std::time::Duration;

    let device = CpalDevice::default_output().context("No output device available")?;
    let format = device
        .output_format()
        .context("Output device has no output format")?;

    let graph = Graph::new();
    let chain = ToneChain::build(&graph, format, args)?;
    let io = DeviceIoNode::new(Some(device));
    graph.set_device_io(&io);
    graph
        .connect(chain.output(), io.node(), format)
        .context("Failed to connect gain to device")?;

    graph.start_render().context("Failed to start playback")?;
    std::thread::sleep(Duration::from_secs_f64(args.seconds.max(0.0)));
    graph.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullgraph_file::OpenArgs;

    fn tone() -> ToneArgs {
        ToneArgs {
            seconds: 0.05,
            frequency: 1000.0,
            gain: 1.0,
        }
    }

    #[test]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let config = EngineConfig {
            frames_per_slice: 256,
            ..EngineConfig::default()
        };

        let frames = render_to_file(&config, &path, false, tone()).unwrap();
        assert_eq!(frames, 2400);

        let mut file = WavFile::opened(OpenArgs::new(&path)).unwrap();
        assert_eq!(file.processing_length(), 2400);
        let format = file.processing_format().unwrap();
        let mut buffer = PcmBuffer::new(format, 2400).unwrap();
        file.read_into_buffer(&mut buffer, 0).unwrap();

        let left = buffer.data::<f32>(0).unwrap();
        let right = buffer.data::<f32>(1).unwrap();
        assert_eq!(left, right);
        assert!(left.iter().any(|s| s.abs() > 0.4));
        assert!(left.iter().all(|s| s.abs() <= 0.5 + f32::EPSILON));
    }

    #[test]
    fn test_render_rejects_integer_processing() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            pcm_format: pullgraph_core::PcmFormat::Int16,
            ..EngineConfig::default()
        };
        assert!(render_to_file(&config, &dir.path().join("x.wav"), true, tone()).is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());

        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("missing.ron").as_path())).is_err());
    }
}
