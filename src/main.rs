// src/main.rs - Command line front end
use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tcode_host::config::{self, Config};
use tcode_host::output::{Connector, LoopbackConnector, SerialConnector, list_ports};
use tcode_host::player::ParameterUpdate;
use tcode_host::script::ScriptSet;
use tcode_host::stroke::StrokeGenerator;
use tcode_host::tcode::{Encoder, Interval};
use tcode_host::{Axis, AxisMap, MotionCommand, Session};

type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "tcode-host", about = "Drive T-code devices from scripts or random strokes")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,
    /// Encode axis values into a single frame
    Encode {
        /// Axis values on the 0-1000 scale, e.g. L0=500 R0=250
        #[arg(value_parser = parse_axis_value, required = true)]
        values: Vec<(Axis, f64)>,
        #[arg(short, long)]
        interval_ms: Option<f64>,
    },
    /// Play the scripts belonging to a media file
    Play {
        /// Media file or one of its scripts
        path: PathBuf,
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long)]
        latency: Option<i64>,
        #[arg(long)]
        pause_fill: bool,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Generate random strokes
    Random {
        /// Stroke speed in percent
        #[arg(long)]
        speed: Option<u32>,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(short, long, value_enum, default_value_t = OutputKind::Serial)]
    output: OutputKind,
    /// Serial port, overrides the configured one
    #[arg(short, long)]
    port: Option<String>,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    duration: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputKind {
    Serial,
    Visualize,
}

fn parse_axis_value(s: &str) -> Result<(Axis, f64), BoxError> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid AXIS=VALUE: no `=` found in `{s}`"))?;
    let axis: Axis = s[..pos].parse()?;
    let value: f64 = s[pos + 1..].parse()?;
    Ok((axis, value))
}

fn load(path: Option<&PathBuf>) -> Result<Config, BoxError> {
    let Some(path) = path else {
        tracing::info!("No configuration given, using defaults");
        return Ok(Config::default());
    };
    let path = path.display().to_string();
    tracing::info!("Loading configuration from: {}", path);
    config::load_config(&path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", path, e);
        Box::new(e) as BoxError
    })
}

fn connector(config: &Config, run: &RunArgs) -> Arc<dyn Connector> {
    match run.output {
        OutputKind::Serial => {
            let port = run.port.clone().or_else(|| config.device.port.clone());
            Arc::new(SerialConnector::new(port, config.device.baud))
        }
        OutputKind::Visualize => Arc::new(LoopbackConnector::visualizer()),
    }
}

async fn wait(duration: Option<f64>) {
    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

async fn play(
    mut config: Config,
    path: PathBuf,
    rate: Option<f64>,
    latency: Option<i64>,
    pause_fill: bool,
    run: RunArgs,
) -> Result<(), BoxError> {
    if let Some(rate) = rate {
        config.player.playback_rate = rate;
    }
    if let Some(latency) = latency {
        config.player.latency_ms = latency;
    }
    config.player.pause_fill |= pause_fill;

    let scripts = ScriptSet::load_for(&path)?;
    tracing::info!(
        "Loaded {} script(s), {:.1}s",
        scripts.len(),
        scripts.duration_ms() as f64 / 1000.0
    );

    let connector = connector(&config, &run);
    let mut session = Session::start(config, connector)?;
    session.connect().await?;
    let player = session.script_player();
    player
        .set_parameters(ParameterUpdate::default().scripts(scripts).running(true))
        .await;
    session.spawn_media_clock(0.0);

    wait(run.duration).await;
    session.shutdown().await?;
    Ok(())
}

async fn random(mut config: Config, speed: Option<u32>, run: RunArgs) -> Result<(), BoxError> {
    if let Some(speed) = speed {
        config.stroke.speed = speed;
    }
    let generator = StrokeGenerator::new(&config.stroke);
    let connector = connector(&config, &run);
    let mut session = Session::start(config, connector)?;
    session.connect().await?;
    let player = session.stroke_player(Some(generator));
    player.set_running(true).await;

    wait(run.duration).await;
    session.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load(cli.config.as_ref())?;

    match cli.command {
        Command::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        Command::Encode { values, interval_ms } => {
            let values: AxisMap<f64> = values.into_iter().collect();
            let interval = interval_ms.map(Interval::from_millis_f64).unwrap_or_default();
            let encoder = Encoder::new(config.output.output_range()?);
            match encoder.encode(&MotionCommand::new(values, interval)) {
                Some(frame) => println!("{}", frame),
                None => println!("(empty frame)"),
            }
        }
        Command::Play {
            path,
            rate,
            latency,
            pause_fill,
            run,
        } => play(config, path, rate, latency, pause_fill, run).await?,
        Command::Random { speed, run } => random(config, speed, run).await?,
    }
    Ok(())
}
