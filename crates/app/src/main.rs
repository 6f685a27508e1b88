use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use clap::{Parser, Subcommand};
use party_picker_core::{
    Activation, AppConfig, AudioGraphLifecycle, PartyMode, PcmPlayer, PcmTrack, RandomColors,
    RealtimeFrames, SoftwareHost, SystemClock,
};
use tracing_subscriber::EnvFilter;

fn main() -> party_picker_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Party {
            track,
            config,
            seconds,
            block_autoplay,
        } => run_party(track, config.as_deref(), seconds, block_autoplay),
        Commands::InitConfig { output } => run_init_config(&output),
    }
}

fn run_party(
    track: Option<PathBuf>,
    config: Option<&Path>,
    seconds: f32,
    block_autoplay: bool,
) -> party_picker_core::Result<()> {
    let config = match config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::live_defaults(),
    };
    let track = track.unwrap_or_else(|| PathBuf::from(&config.audio.source));
    tracing::info!(?track, seconds, "starting party mode");

    let clock = SystemClock::new();
    let mut player = PcmPlayer::new(PcmTrack::from_wav_file(&track)?, Rc::new(clock));
    player.set_autoplay_blocked(block_autoplay);

    let lifecycle = AudioGraphLifecycle::from_config(SoftwareHost::new(), player, &config)?;
    let mut party = PartyMode::new(
        lifecycle,
        RandomColors::new(),
        config.party.initial_background()?,
    );

    // Party mode failing must not take the picker down with it.
    match party.start() {
        Ok(Activation::Playing) => {}
        Ok(Activation::Silent { reason }) => {
            tracing::warn!(%reason, "party mode is on but the track is silent");
        }
        Err(err) => {
            tracing::error!(%err, "party mode could not start");
            return Ok(());
        }
    }

    let interval = config.party.frame_interval();
    let limit = (seconds.max(0.0) / interval.as_secs_f32()).ceil() as usize;
    let mut frames = RealtimeFrames::new(clock, interval);
    let beats = party.run(&mut frames, limit, |now, color| {
        let [r, g, b] = color.to_normalized();
        tracing::info!(at = ?now, %color, r, g, b, "beat");
    })?;

    party.stop()?;
    tracing::info!(beats, background = %party.background(), "party over");
    party.shutdown()
}

fn run_init_config(output: &Path) -> party_picker_core::Result<()> {
    tracing::info!(?output, "writing default configuration");
    std::fs::write(output, AppConfig::default().to_json_pretty()?)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Color picker with an audio-reactive party mode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a WAV track and repaint the background on every detected beat.
    Party {
        /// Track to play. Defaults to the source named in the configuration.
        track: Option<PathBuf>,
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long to party before switching off.
        #[arg(short, long, default_value_t = 30.0)]
        seconds: f32,
        /// Refuse playback as a browser does without a user gesture.
        #[arg(long)]
        block_autoplay: bool,
    },
    /// Write the default configuration as JSON.
    InitConfig {
        /// Output path for the configuration file.
        output: PathBuf,
    },
}
