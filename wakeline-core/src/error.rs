use thiserror::Error;

/// All errors produced by wakeline-core.
#[derive(Debug, Error)]
pub enum WakelineError {
    #[error("audio init error: {0}")]
    AudioInit(String),

    #[error("audio read error: {0}")]
    AudioRead(String),

    #[error("audio teardown error: {0}")]
    AudioTeardown(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("model not found: prefix={prefix} keyword={keyword}")]
    ModelNotFound { prefix: String, keyword: String },

    #[error("model partition unavailable: {0}")]
    ModelPartition(String),

    #[error("session creation failed: {0}")]
    SessionCreate(String),

    #[error("command model chunk size {command} does not match fetch chunk size {fetch}")]
    ChunkSizeMismatch { command: usize, fetch: usize },

    #[error("engine needs {required} channels but the audio source delivers {available}")]
    ChannelMismatch { required: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not allocate a working buffer of {samples} samples")]
    Allocation { samples: usize },

    #[error("failed to spawn {task} task: {reason}")]
    TaskSpawn { task: &'static str, reason: String },

    #[error("fed frame has {got} samples, engine expects {expected}")]
    FrameSize { expected: usize, got: usize },

    #[error("voice assistant is already initialized")]
    AlreadyInitialized,

    #[error("voice assistant initialization previously failed")]
    InitializationFailed,

    #[error("voice assistant has been shut down")]
    ShutDown,

    #[error("voice assistant is not running")]
    NotRunning,

    #[error("recognition session is closed")]
    EngineClosed,

    #[error("indicator is busy")]
    IndicatorBusy,

    #[error("indicator error: {0}")]
    Indicator(String),

    #[error("pwm output is busy")]
    PwmBusy,

    #[error("pwm output error: {0}")]
    Pwm(String),

    #[error("{task} task exited unexpectedly")]
    TaskDied { task: &'static str },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WakelineError {
    /// Errors that can only surface while bringing the assistant up.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            WakelineError::AudioInit(_)
                | WakelineError::NoDefaultInputDevice
                | WakelineError::ModelNotFound { .. }
                | WakelineError::ModelPartition(_)
                | WakelineError::SessionCreate(_)
                | WakelineError::ChunkSizeMismatch { .. }
                | WakelineError::ChannelMismatch { .. }
                | WakelineError::InvalidConfig(_)
                | WakelineError::TaskSpawn { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WakelineError>;

/// Allocate a zeroed working buffer, reporting exhaustion instead of aborting.
pub(crate) fn alloc_frame(samples: usize) -> Result<Vec<i16>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(samples)
        .map_err(|_| WakelineError::Allocation { samples })?;
    buf.resize(samples, 0);
    Ok(buf)
}
