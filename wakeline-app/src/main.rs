//! `wakeline`: host binary.
//!
//! Loads settings, wires the bundled collaborators into a `VoiceAssistant`,
//! prints every assistant event as one JSON line on stdout, and exits with
//! status 1 on the first fatal error. Logs go to stderr.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use wakeline_core::{
    audio::device::list_input_devices, AudioCapture, AudioSource, LedIndicator, LogPwmChannel,
    LogStrip, PwmDispatcher, StubEngine, VoiceAssistant, WakelineError, WavSource,
};

use crate::settings::{load_settings, resolve_settings_path, AppSettings};

#[derive(Debug, Default)]
struct Args {
    settings: Option<PathBuf>,
    replay: Option<PathBuf>,
    list_devices: bool,
}

const USAGE: &str = "Usage: wakeline [--settings <file.json>] [--replay <file.wav>] [--list-devices]";

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --settings".into());
                };
                args.settings = Some(PathBuf::from(v));
            }
            "--replay" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --replay".into());
                };
                args.replay = Some(PathBuf::from(v));
            }
            "--list-devices" => args.list_devices = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}\n{USAGE}"));
            }
        }
    }
    Ok(args)
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wakeline=info,wakeline_core=info".into()),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        error!("wakeline halted: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    info!("wakeline starting");

    let settings_path = resolve_settings_path(args.settings);
    let app_settings = load_settings(&settings_path)?;
    let assistant = Arc::new(VoiceAssistant::new(
        app_settings.to_config().context("invalid settings")?,
    ));
    let config = assistant.config();
    info!(
        settings_path = ?settings_path,
        sample_rate = config.audio.sample_rate,
        channels = config.audio.layout.channel_count(),
        wake_model = %config.wake_model,
        command_language = %config.command_language,
        window_ms = config.command_window_ms,
        "settings loaded"
    );

    if args.list_devices {
        for device in list_input_devices(config.audio.sample_rate) {
            println!("{}", serde_json::to_string(&device)?);
        }
        return Ok(());
    }

    let audio: Box<dyn AudioSource> = match args.replay {
        Some(path) => {
            info!(path = %path.display(), "replaying recording instead of capturing");
            Box::new(WavSource::new(path, app_settings.replay_paced))
        }
        None => Box::new(AudioCapture::new(app_settings.preferred_input_device.clone())),
    };

    let indicator = Arc::new(
        LedIndicator::start(
            LogStrip::default(),
            Duration::from_millis(app_settings.led_refresh_ms),
        )
        .context("starting indicator")?,
    );
    let pwm = Arc::new(PwmDispatcher::new(
        Box::new(LogPwmChannel::new(0)),
        Box::new(LogPwmChannel::new(1)),
    ));

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    let outcome = runtime.block_on(supervise(
        Arc::clone(&assistant),
        &app_settings,
        audio,
        indicator,
        Arc::clone(&pwm),
    ));

    if let Err(e) = pwm.stop() {
        warn!("pwm stop failed: {e}");
    }
    let diagnostics = assistant.diagnostics_snapshot();
    info!(
        frames_fed = diagnostics.frames_fed,
        frames_fetched = diagnostics.frames_fetched,
        wake_detections = diagnostics.wake_detections,
        command_detections = diagnostics.command_detections,
        listening_timeouts = diagnostics.listening_timeouts,
        "pipeline totals"
    );
    outcome
}

/// Initialize, then wait for a fatal task error or Ctrl-C; always shut down.
async fn supervise(
    assistant: Arc<VoiceAssistant>,
    app_settings: &AppSettings,
    audio: Box<dyn AudioSource>,
    indicator: Arc<LedIndicator>,
    pwm: Arc<PwmDispatcher>,
) -> Result<()> {
    // Subscribe before initialize so the `ready` status is printed too.
    let mut events = assistant.subscribe_events();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to encode event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = StubEngine::new(app_settings.stub.clone());
    let init = {
        let assistant = Arc::clone(&assistant);
        tokio::task::spawn_blocking(move || assistant.initialize(audio, &engine, indicator, pwm))
    };
    init.await.context("initialize task panicked")??;

    let waiter = {
        let assistant = Arc::clone(&assistant);
        tokio::task::spawn_blocking(move || assistant.wait())
    };
    let outcome: Result<()> = tokio::select! {
        res = waiter => res.context("wait task panicked")?.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("interrupt received");
            Ok(())
        }
    };

    let stopped = {
        let assistant = Arc::clone(&assistant);
        tokio::task::spawn_blocking(move || assistant.shutdown())
    };
    match stopped.await.context("shutdown task panicked")? {
        Ok(()) | Err(WakelineError::NotRunning) => {}
        Err(e) => warn!("shutdown failed: {e}"),
    }

    // Let the final status event reach stdout.
    tokio::time::sleep(Duration::from_millis(20)).await;
    forwarder.abort();
    outcome
}
