use std::time::Duration;

use frame_bus::{StreamProbe, StreamSnapshot};
use tokio_util::sync::CancellationToken;

/// Log one performance line per stream every `interval` until cancelled.
pub(crate) fn start_monitor(probes: Vec<StreamProbe>, interval: Duration, cancel: CancellationToken) {
    if interval.is_zero() || probes.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        let mut last: Vec<StreamSnapshot> = probes.iter().map(|p| p.snapshot()).collect();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for (probe, prev) in probes.iter().zip(last.iter_mut()) {
                        let snap = probe.snapshot();
                        log::info!("{}", report(prev, &snap, interval));
                        *prev = snap;
                    }
                }
            }
        }
        log::debug!("monitor stopped");
    });
}

fn report(prev: &StreamSnapshot, now: &StreamSnapshot, interval: Duration) -> String {
    let secs = interval.as_secs_f64().max(f64::EPSILON);
    let fps = now.pushed.saturating_sub(prev.pushed) as f64 / secs;
    let kbps = now.bytes_pushed.saturating_sub(prev.bytes_pushed) as f64 * 8.0 / 1000.0 / secs;
    format!(
        "stream {} [{}] {:?}: {:.1} fps, {:.0} kbps, queue {}/{}, dropped {}, sink errors {}, hw errors {}, live buffers {}",
        now.id,
        now.name,
        now.state,
        fps,
        kbps,
        now.encoded_queued,
        now.encoded_capacity,
        now.dropped,
        now.sink_errors,
        now.hardware_errors,
        now.live_buffers
    )
}
