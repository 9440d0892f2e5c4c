//! Visual feedback: the indicator the detect task switches on while a
//! command window is open.
//!
//! [`LedIndicator`] latches an on/off flag and a background thread renders
//! it to an [`LedStrip`] on a fixed period, so `turn_on`/`turn_off` never
//! wait on the strip itself.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, WakelineError};

/// Longest `turn_on`/`turn_off` wait for the latch before reporting busy.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// Render period of the refresh thread.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Colour of a lit indicator.
pub const LIT_RGB: (u8, u8, u8) = (32, 32, 32);

/// Best-effort user feedback. Failures are reported, never fatal.
pub trait Indicator: Send + Sync {
    fn turn_on(&self) -> Result<()>;
    fn turn_off(&self) -> Result<()>;
}

/// Addressable LED strip driver.
pub trait LedStrip: Send + 'static {
    fn set_pixel(&mut self, index: usize, red: u8, green: u8, blue: u8) -> Result<()>;
    /// Push pending pixel values to the hardware.
    fn refresh(&mut self) -> Result<()>;
    /// Turn every pixel off.
    fn clear(&mut self) -> Result<()>;
}

pub struct LedIndicator {
    lit: Arc<Mutex<bool>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl LedIndicator {
    /// Start the refresh thread. The indicator starts off.
    pub fn start<S: LedStrip>(mut strip: S, refresh: Duration) -> Result<Self> {
        strip.clear()?;

        let lit = Arc::new(Mutex::new(false));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = {
            let lit = Arc::clone(&lit);
            std::thread::Builder::new()
                .name("led_indicator".into())
                .spawn(move || {
                    let mut rendered = None;
                    loop {
                        match stop_rx.recv_timeout(refresh) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => break,
                        }
                        // A busy latch only delays this frame.
                        let Some(on) = lit.try_lock_for(LOCK_TIMEOUT).map(|g| *g) else {
                            continue;
                        };
                        match render(&mut strip, on) {
                            Ok(()) => {
                                if rendered != Some(on) {
                                    debug!(on, "indicator rendered");
                                    rendered = Some(on);
                                }
                            }
                            Err(e) => warn!("indicator render failed: {e}"),
                        }
                    }
                    if let Err(e) = strip.clear() {
                        warn!("indicator clear on exit failed: {e}");
                    }
                })
                .map_err(|e| WakelineError::TaskSpawn {
                    task: "led_indicator",
                    reason: e.to_string(),
                })?
        };
        info!(refresh_ms = refresh.as_millis() as u64, "led indicator started");

        Ok(Self {
            lit,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn is_on(&self) -> bool {
        *self.lit.lock()
    }

    fn set(&self, on: bool) -> Result<()> {
        let mut lit = self
            .lit
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or(WakelineError::IndicatorBusy)?;
        *lit = on;
        Ok(())
    }
}

fn render<S: LedStrip>(strip: &mut S, on: bool) -> Result<()> {
    if on {
        let (r, g, b) = LIT_RGB;
        strip.set_pixel(0, r, g, b)?;
        strip.refresh()
    } else {
        strip.clear()
    }
}

impl Indicator for LedIndicator {
    fn turn_on(&self) -> Result<()> {
        self.set(true)
    }

    fn turn_off(&self) -> Result<()> {
        self.set(false)
    }
}

impl Drop for LedIndicator {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("led indicator thread panicked");
            }
        }
    }
}

/// Strip that only logs, for hosts without an LED.
#[derive(Debug, Default)]
pub struct LogStrip {
    lit: bool,
}

impl LedStrip for LogStrip {
    fn set_pixel(&mut self, index: usize, red: u8, green: u8, blue: u8) -> Result<()> {
        if !self.lit {
            info!(index, red, green, blue, "indicator on");
            self.lit = true;
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.lit {
            info!("indicator off");
            self.lit = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Pixel(u8, u8, u8),
        Refresh,
        Clear,
    }

    #[derive(Clone, Default)]
    struct RecordingStrip {
        ops: Arc<Mutex<Vec<Op>>>,
    }

    impl LedStrip for RecordingStrip {
        fn set_pixel(&mut self, _index: usize, red: u8, green: u8, blue: u8) -> Result<()> {
            self.ops.lock().push(Op::Pixel(red, green, blue));
            Ok(())
        }

        fn refresh(&mut self) -> Result<()> {
            self.ops.lock().push(Op::Refresh);
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.ops.lock().push(Op::Clear);
            Ok(())
        }
    }

    fn wait_for(ops: &Arc<Mutex<Vec<Op>>>, op: Op) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if ops.lock().contains(&op) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn starts_off_and_renders_latched_state() {
        let strip = RecordingStrip::default();
        let ops = Arc::clone(&strip.ops);
        let indicator = LedIndicator::start(strip, Duration::from_millis(5)).expect("start");
        assert!(!indicator.is_on());
        assert_eq!(ops.lock().first(), Some(&Op::Clear));

        indicator.turn_on().expect("on");
        assert!(indicator.is_on());
        assert!(wait_for(&ops, Op::Pixel(32, 32, 32)));
        assert!(wait_for(&ops, Op::Refresh));

        ops.lock().clear();
        indicator.turn_off().expect("off");
        assert!(wait_for(&ops, Op::Clear));
    }

    #[test]
    fn held_latch_reports_busy() {
        let indicator =
            LedIndicator::start(RecordingStrip::default(), Duration::from_millis(50)).expect("start");
        let _held = indicator.lit.lock();
        assert!(matches!(indicator.turn_on(), Err(WakelineError::IndicatorBusy)));
    }

    #[test]
    fn drop_stops_the_refresh_thread_and_clears() {
        let strip = RecordingStrip::default();
        let ops = Arc::clone(&strip.ops);
        let indicator = LedIndicator::start(strip, Duration::from_secs(60)).expect("start");
        indicator.turn_on().expect("on");
        drop(indicator);
        // One clear at start, one on exit; the 60 s period never elapsed.
        assert_eq!(*ops.lock(), vec![Op::Clear, Op::Clear]);
    }
}
