//! Feed task: audio source → engine, one feed chunk at a time.
//!
//! The audio source is the pacing clock; the loop never sleeps on its own.
//! A read failure ends the task with the error. There is no retry.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSource,
    engine::FrontEnd,
    error::{alloc_frame, Result, WakelineError},
    pipeline::PipelineDiagnostics,
};

pub struct FeedContext {
    pub audio: Box<dyn AudioSource>,
    pub front_end: Arc<dyn FrontEnd>,
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run until `running` clears or a fatal error occurs. The audio source is
/// torn down on every exit path.
pub fn run(mut ctx: FeedContext) -> Result<()> {
    let result = feed_loop(&mut ctx);
    if let Err(e) = ctx.audio.teardown() {
        warn!("audio teardown failed: {e}");
    }
    result
}

fn feed_loop(ctx: &mut FeedContext) -> Result<()> {
    let chunk = ctx.front_end.feed_chunk_size();
    let channels = ctx.audio.channel_count();
    let mut frame = alloc_frame(chunk * channels).map_err(|e| {
        error!("feed buffer allocation failed: {e}");
        e
    })?;
    info!(feed_chunk = chunk, channels, "feed task started");

    let mut fed: u64 = 0;
    while ctx.running.load(Ordering::Acquire) {
        if let Err(e) = ctx.audio.read_frame(&mut frame) {
            error!(frame = fed, "audio read failed: {e}");
            return Err(e);
        }

        match ctx.front_end.feed(&frame) {
            Ok(()) => {}
            Err(WakelineError::EngineClosed) if !ctx.running.load(Ordering::Acquire) => break,
            Err(e) => {
                error!(frame = fed, "engine feed failed: {e}");
                return Err(e);
            }
        }

        fed += 1;
        PipelineDiagnostics::bump(&ctx.diagnostics.frames_fed);
        if fed % 500 == 0 {
            debug!(frames = fed, "feed progress");
        }
    }

    info!(frames = fed, "feed task stopped");
    Ok(())
}
