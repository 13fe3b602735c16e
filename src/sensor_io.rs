use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sensor::{DecisionSink, SensorMachine};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw two-channel beam state, as would be read from GPIO. Real hardware
/// access is outside this crate's scope (treated the same way camera
/// vendor SDKs are in §1) — this trait is the seam a real driver plugs
/// into.
pub trait BeamSource: Send {
    fn read(&mut self) -> (bool, bool);
}

/// Cycles a fixed demo sequence of beam states; used when
/// `SENSOR.simulation_mode` is enabled and no physical beam hardware is
/// wired up.
pub struct SimulatedBeamSource {
    sequence: Vec<(bool, bool)>,
    position: usize,
}

impl SimulatedBeamSource {
    pub fn new() -> Self {
        Self {
            sequence: vec![
                (false, false),
                (true, false),
                (true, true),
                (false, true),
                (false, false),
            ],
            position: 0,
        }
    }
}

impl Default for SimulatedBeamSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BeamSource for SimulatedBeamSource {
    fn read(&mut self) -> (bool, bool) {
        let state = self.sequence[self.position];
        self.position = (self.position + 1) % self.sequence.len();
        state
    }
}

/// Polls `source` at a fixed cadence, derives edge events via
/// `SensorMachine::process_edges`, and feeds them to `machine`. Honors
/// cancellation between polls, never mid-poll.
pub async fn run_beam_poll_loop(
    mut source: impl BeamSource,
    machine: &parking_lot::Mutex<SensorMachine>,
    sink: &dyn DecisionSink,
    shutdown: CancellationToken,
) {
    let mut prev = (false, false);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("beam poll loop shutting down");
                return;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let (cur_a, cur_b) = source.read();
        let decisions = machine.lock().process_edges(cur_a, cur_b, prev.0, prev.1, sink);
        if !decisions.is_empty() {
            debug!(count = decisions.len(), "beam poll produced decisions");
        }
        prev = (cur_a, cur_b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Notification;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);
    impl DecisionSink for CountingSink {
        fn notify(&self, _n: Notification) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn simulated_source_cycles_through_sequence() {
        let mut source = SimulatedBeamSource::new();
        let first = source.read();
        for _ in 0..4 {
            source.read();
        }
        let wrapped = source.read();
        assert_eq!(first, wrapped);
    }
}
