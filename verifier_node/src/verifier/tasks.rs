// Background tasks for the verifier
//
// The resend loop runs once per session and is aborted through the entry's
// stored abort handle when the session resolves or closes. Each step still
// re-checks the phase, since an abort only lands at the next await point.
// The sweeper runs for the lifetime of the verifier.

use super::{ResendStep, Verifier};
use crate::session::SessionEntry;
use crate::transport::SessionTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub(super) fn spawn_resend_loop<T: SessionTransport>(
    verifier: Verifier<T>,
    entry: Arc<SessionEntry>,
    first_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        time::sleep(first_delay).await;
        loop {
            match verifier.resend_step(&entry) {
                ResendStep::Sent { next } => time::sleep(next).await,
                ResendStep::Exhausted | ResendStep::Stopped => break,
            }
        }
        debug!(session = %entry.id(), "Resend loop finished");
    })
}

fn sweep_ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub(super) fn spawn_sweeper<T: SessionTransport>(verifier: Verifier<T>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut period = verifier.policy().snapshot().sweep_interval;
        let mut ticker = sweep_ticker(period);
        info!(interval_ms = period.as_millis() as u64, "Deadline sweeper started");

        loop {
            ticker.tick().await;
            let expired = verifier.sweep(Instant::now());
            if !expired.is_empty() {
                debug!(count = expired.len(), "Sweep resolved expired sessions");
            }

            let current = verifier.policy().snapshot().sweep_interval;
            if current != period {
                info!(interval_ms = current.as_millis() as u64, "Sweep interval changed");
                period = current;
                ticker = sweep_ticker(period);
            }
        }
    })
}
