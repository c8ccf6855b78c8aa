use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{ContainerGeometry, FitMode, SourceFrame};

use player::config::Config;
use player::gpu::{BackendChoice, GpuBackend, SoftwareBackend, SurfaceId};
use player::manager::ResourceManager;
use player::media::{self, MediaSource};
use player::observer::ContainerId;
use player::{Player, PlayerOptions, layout};

const SURFACE: SurfaceId = SurfaceId(1);
const CONTAINER: ContainerId = ContainerId(1);

/// How long `render` waits for a decodable frame
const RENDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "alphastack")]
#[command(about = "Stacked-alpha video compositor", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/alphastack/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rendering backend (auto, gpu, cpu), overrides the config
    #[arg(short, long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct SurfaceArgs {
    /// Container size in CSS pixels, as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_container, default_value = "640x360")]
    container: (f64, f64),

    /// Device pixel ratio
    #[arg(long, default_value = "1")]
    dpr: f64,

    /// Fit mode (fill, contain, cover), overrides the config
    #[arg(short, long)]
    fit: Option<String>,

    /// Color channels are already multiplied by alpha
    #[arg(long)]
    premultiplied: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layout computed for a raw stacked frame size
    Layout {
        /// Raw stacked frame size (color and alpha halves together), as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_source)]
        source: (u32, u32),

        #[command(flatten)]
        surface: SurfaceArgs,
    },

    /// Composite one frame of an input and write it as PNG
    Render {
        /// Video file, image, directory or glob of stacked frames
        #[arg(short, long)]
        input: String,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Position to render, in seconds
        #[arg(long)]
        at: Option<f64>,

        #[command(flatten)]
        surface: SurfaceArgs,
    },

    /// Play an input against a simulated display refresh
    Play {
        /// Video file, image, directory or glob of stacked frames
        #[arg(short, long)]
        input: String,

        /// Stop after this many composited frames
        #[arg(long)]
        frames: Option<u64>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Write the last composited frame to this PNG on exit
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        surface: SurfaceArgs,
    },
}

fn parse_pair<T: std::str::FromStr>(value: &str) -> Result<(T, T), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", value))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<T>()
            .map_err(|_| format!("invalid dimension: {}", part))
    };
    Ok((parse(width)?, parse(height)?))
}

fn parse_source(value: &str) -> Result<(u32, u32), String> {
    parse_pair(value)
}

fn parse_container(value: &str) -> Result<(f64, f64), String> {
    parse_pair(value)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let level = loaded
        .as_ref()
        .map(|cfg| cfg.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match loaded {
        Ok(cfg) => {
            log::debug!("✓ Configuration loaded");
            cfg
        }
        Err(e) => {
            if cli.config.is_some() {
                return Err(e);
            }
            log::warn!("Failed to load config: {}. Using defaults.", e);
            Config::default()
        }
    };

    if let Some(backend) = cli.backend {
        player::validate_enum!(backend.as_str(), "auto", "gpu", "cpu")?;
        config.general.backend = backend;
    }

    match cli.command {
        Commands::Layout { source, surface } => print_layout(source, &surface, &config),
        Commands::Render {
            input,
            output,
            at,
            surface,
        } => {
            let media = media::open(&input, config.playback.fps, config.playback.looping)?;
            let at = at.map(Duration::from_secs_f64);
            if use_gpu(&config)? {
                #[cfg(feature = "gpu")]
                return render(
                    player::gpu::WgpuBackend::new(config.power_preference())?,
                    media,
                    &surface,
                    &config,
                    at,
                    &output,
                );
            }
            render(SoftwareBackend::new(), media, &surface, &config, at, &output)
        }
        Commands::Play {
            input,
            frames,
            duration,
            output,
            surface,
        } => {
            let media = media::open(&input, config.playback.fps, config.playback.looping)?;
            let limits = PlayLimits {
                frames,
                duration: duration.map(Duration::from_secs_f64),
            };
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            if use_gpu(&config)? {
                #[cfg(feature = "gpu")]
                return runtime.block_on(play(
                    player::gpu::WgpuBackend::new(config.power_preference())?,
                    media,
                    &surface,
                    &config,
                    limits,
                    output,
                ));
            }
            runtime.block_on(play(
                SoftwareBackend::new(),
                media,
                &surface,
                &config,
                limits,
                output,
            ))
        }
    }
}

/// Resolve the backend choice against the adapters present
#[cfg(feature = "gpu")]
fn use_gpu(config: &Config) -> Result<bool> {
    match config.backend() {
        BackendChoice::Cpu => Ok(false),
        BackendChoice::Gpu => Ok(true),
        BackendChoice::Auto => {
            if player::gpu::is_available(config.power_preference()) {
                Ok(true)
            } else {
                log::info!("No suitable GPU found, using CPU rendering");
                Ok(false)
            }
        }
    }
}

#[cfg(not(feature = "gpu"))]
fn use_gpu(config: &Config) -> Result<bool> {
    if config.backend() == BackendChoice::Gpu {
        anyhow::bail!("GPU rendering not compiled (build with --features gpu to enable)");
    }
    Ok(false)
}

fn geometry(surface: &SurfaceArgs) -> ContainerGeometry {
    let (width, height) = surface.container;
    ContainerGeometry::new(width, height, surface.dpr)
}

fn fit_mode(surface: &SurfaceArgs, config: &Config) -> Result<FitMode> {
    match &surface.fit {
        Some(fit) => fit.parse::<FitMode>().map_err(anyhow::Error::msg),
        None => Ok(config.fit_mode()),
    }
}

fn options(surface: &SurfaceArgs, config: &Config) -> Result<PlayerOptions> {
    let mut options = PlayerOptions::from_config(config);
    options.fit = fit_mode(surface, config)?;
    options.premultiplied_alpha |= surface.premultiplied;
    Ok(options)
}

fn print_layout(raw: (u32, u32), surface: &SurfaceArgs, config: &Config) -> Result<()> {
    let source = SourceFrame::from_raw(raw.0, raw.1);
    let result = layout::fit(source, &geometry(surface), fit_mode(surface, config)?);

    println!("{}", serde_json::to_string_pretty(&result)?);
    log::info!("CSS transform: {}", result.transform.to_css());
    Ok(())
}

fn save_snapshot<B: GpuBackend, M: MediaSource>(player: &mut Player<B, M>, path: &Path) -> Result<()> {
    let image = player.snapshot()?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!(
        "✓ Wrote {}x{} frame to {}",
        image.width(),
        image.height(),
        path.display()
    );
    Ok(())
}

fn render<B: GpuBackend, M: MediaSource>(
    backend: B,
    media: M,
    surface: &SurfaceArgs,
    config: &Config,
    at: Option<Duration>,
    output: &Path,
) -> Result<()> {
    log::info!("Rendering with the {} backend", backend.name());

    let mut options = options(surface, config)?;
    options.autoplay = false;

    let manager = ResourceManager::new(backend);
    let mut player = Player::mount(manager, media, SURFACE, CONTAINER, geometry(surface), options)?;
    if let Some(position) = at {
        player.seek(position)?;
    }

    let started = Instant::now();
    loop {
        player.pump(Instant::now());
        if player.force_update()? == player::compositor::DrawOutcome::Drawn {
            break;
        }
        if started.elapsed() > RENDER_TIMEOUT {
            anyhow::bail!("No frame became ready within {:?}", RENDER_TIMEOUT);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    if let Some(fit) = player.fit_result() {
        log::info!("CSS transform: {}", fit.transform.to_css());
    }
    save_snapshot(&mut player, output)
}

/// When `play` stops on its own
#[derive(Debug, Clone, Copy)]
struct PlayLimits {
    frames: Option<u64>,
    duration: Option<Duration>,
}

async fn play<B: GpuBackend, M: MediaSource>(
    backend: B,
    media: M,
    surface: &SurfaceArgs,
    config: &Config,
    limits: PlayLimits,
    output: Option<PathBuf>,
) -> Result<()> {
    log::info!("Playing with the {} backend", backend.name());

    let mut options = options(surface, config)?;
    options.autoplay = true;

    let manager = ResourceManager::new(backend);
    let mut player = Player::mount(manager, media, SURFACE, CONTAINER, geometry(surface), options)?;
    player.on_play_state_change(|playing| {
        log::info!("Playback {}", if playing { "started" } else { "stopped" });
    });

    let mut refresh = tokio::time::interval(config.refresh_interval());
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let stop_at = limits.duration.map(|d| tokio::time::Instant::now() + d);
    let deadline = async {
        match stop_at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                player.on_display_refresh(Instant::now());
                if limits.frames.is_some_and(|n| player.frames_drawn() >= n) {
                    log::info!("Frame limit reached");
                    break;
                }
                if player.media().is_ended() && !player.scheduler().is_running() {
                    log::info!("Playback ended");
                    break;
                }
            }
            _ = &mut deadline => {
                log::info!("Duration elapsed, stopping");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    log::info!("Composited {} frames", player.frames_drawn());

    if let Some(path) = output {
        save_snapshot(&mut player, &path)?;
    }
    Ok(())
}
