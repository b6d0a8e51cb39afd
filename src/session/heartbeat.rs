use std::future;
use std::time::Duration;

use tokio::time::{Instant, Interval, interval_at};

/// Periodic liveness timer, armed only while the session is connected.
///
/// Ticks drive an uncorrelated `ping`; a missing reply is logged but never
/// forces a close, since dead-connection detection belongs to the transport.
pub(crate) struct Heartbeat {
    period: Duration,
    ticker: Option<Interval>,
}

impl Heartbeat {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
        }
    }

    /// Arm the timer. The first tick fires one full period from now, not
    /// immediately.
    pub(crate) fn start(&mut self) {
        self.ticker = Some(interval_at(Instant::now() + self.period, self.period));
    }

    pub(crate) fn stop(&mut self) {
        self.ticker = None;
    }

    /// Await the next tick; pends forever while disarmed so it can sit in a
    /// `select!` unconditionally.
    pub(crate) async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => future::pending().await,
        }
    }
}
