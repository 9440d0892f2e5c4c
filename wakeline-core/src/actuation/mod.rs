//! Command dispatch: what happens to a recognised command.
//!
//! The detect task hands every ranked result list to a [`CommandSink`].
//! [`PwmDispatcher`] drives a two-channel PWM output from the top-ranked
//! command id.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    engine::CommandResult,
    error::{Result, WakelineError},
};

/// Longest wait for the PWM outputs before reporting busy.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// Duty cycle per command id, indexed by `id mod 6`. 256 is fully on at
/// 8-bit resolution.
pub const DUTY_TABLE: [u32; 6] = [256, 0, 64, 128, 192, 25];

pub const PWM_FREQUENCY_HZ: u32 = 5_000;
pub const PWM_RESOLUTION_BITS: u8 = 8;

/// Receives the ranked results of each completed command utterance.
pub trait CommandSink: Send + Sync {
    fn dispatch(&self, results: &[CommandResult]) -> Result<()>;
}

/// One PWM output channel.
pub trait PwmChannel: Send {
    fn set_duty(&mut self, duty: u32) -> Result<()>;
    /// Drive the output to its idle level.
    fn stop(&mut self) -> Result<()>;
}

/// Which channels a command drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmTarget {
    Channel(usize),
    Both,
}

impl PwmTarget {
    pub fn for_command(command_id: i32) -> Self {
        match command_id {
            0..=5 => PwmTarget::Channel(0),
            6..=11 => PwmTarget::Channel(1),
            _ => PwmTarget::Both,
        }
    }
}

pub fn duty_for_command(command_id: i32) -> u32 {
    DUTY_TABLE[command_id.rem_euclid(DUTY_TABLE.len() as i32) as usize]
}

pub struct PwmDispatcher {
    channels: Mutex<[Box<dyn PwmChannel>; 2]>,
}

impl PwmDispatcher {
    pub fn new(first: Box<dyn PwmChannel>, second: Box<dyn PwmChannel>) -> Self {
        info!(
            frequency_hz = PWM_FREQUENCY_HZ,
            resolution_bits = PWM_RESOLUTION_BITS,
            "pwm dispatcher ready"
        );
        Self {
            channels: Mutex::new([first, second]),
        }
    }

    /// Apply the duty mapped from `command_id`.
    pub fn drive(&self, command_id: i32) -> Result<()> {
        let duty = duty_for_command(command_id);
        let target = PwmTarget::for_command(command_id);
        let mut channels = self
            .channels
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or(WakelineError::PwmBusy)?;

        match target {
            PwmTarget::Channel(idx) => channels[idx].set_duty(duty)?,
            PwmTarget::Both => {
                for channel in channels.iter_mut() {
                    channel.set_duty(duty)?;
                }
            }
        }
        debug!(command_id, duty, ?target, "pwm updated");
        Ok(())
    }

    /// Drive both outputs idle.
    pub fn stop(&self) -> Result<()> {
        let mut channels = self
            .channels
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or(WakelineError::PwmBusy)?;
        for channel in channels.iter_mut() {
            channel.stop()?;
        }
        Ok(())
    }
}

impl CommandSink for PwmDispatcher {
    fn dispatch(&self, results: &[CommandResult]) -> Result<()> {
        match results.first() {
            Some(best) => self.drive(best.command_id),
            None => {
                warn!("empty command result list, nothing to dispatch");
                Ok(())
            }
        }
    }
}

/// PWM channel that only logs duty changes.
#[derive(Debug)]
pub struct LogPwmChannel {
    index: usize,
}

impl LogPwmChannel {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl PwmChannel for LogPwmChannel {
    fn set_duty(&mut self, duty: u32) -> Result<()> {
        info!(channel = self.index, duty, "pwm duty");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        info!(channel = self.index, "pwm stopped");
        Ok(())
    }
}
