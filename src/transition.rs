use chrono::{DateTime, Local};
use log::debug;
use tokio_util::sync::CancellationToken;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// Sleeps until the wall clock reaches `target`.
///
/// The remaining time is measured when this is called, so whatever earlier steps cost is
/// absorbed here. A target already in the past returns immediately.
pub async fn await_instant(
    clock: &dyn Clock,
    target: DateTime<Local>,
    cancel: &CancellationToken,
) -> WaitOutcome {
    if cancel.is_cancelled() {
        return WaitOutcome::Cancelled;
    }

    let remaining = match (target - clock.now()).to_std() {
        Ok(remaining) if !remaining.is_zero() => remaining,
        _ => return WaitOutcome::Elapsed,
    };

    debug!("sleeping {:.1}s until {}", remaining.as_secs_f64(), target);
    tokio::select! {
        _ = tokio::time::sleep(remaining) => {}
        _ = cancel.cancelled() => return WaitOutcome::Cancelled,
    }

    if cancel.is_cancelled() {
        WaitOutcome::Cancelled
    } else {
        WaitOutcome::Elapsed
    }
}
