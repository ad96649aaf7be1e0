use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::services::playback::PlaybackController;

/// Spawns the sweep that disconnects every guild with nothing playing.
///
/// The first sweep runs one full `interval` after start, so a session that
/// goes quiet gets between zero and one interval before it is reaped.
pub fn spawn_inactivity_monitor(
    controller: Arc<PlaybackController>,
    interval: Duration,
) -> JoinHandle<()> {
    tracing::info!("Inactivity monitor sweeping every {interval:?}");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let disconnected = controller.disconnect_idle().await;
            if !disconnected.is_empty() {
                tracing::info!("Disconnected {} idle guild(s)", disconnected.len());
            }
        }
    })
}
