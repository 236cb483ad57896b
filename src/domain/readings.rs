use crate::domain::models::{LinkState, ReadingSnapshot};
use crate::infrastructure::bluetooth::protocol::{self, FrameError};
use chrono::{DateTime, Local};
use tracing::{debug, trace};

/// Keeps the most recent decoded reading for display
#[derive(Debug, Default)]
pub struct ReadingAggregator {
    latest: Option<ReadingSnapshot>,
}

impl ReadingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` and replace the snapshot
    ///
    /// A rejected frame leaves the previous snapshot in place.
    pub fn ingest(
        &mut self,
        bytes: &[u8],
        received_at: DateTime<Local>,
    ) -> Result<&ReadingSnapshot, FrameError> {
        trace!("Raw frame: {}", protocol::to_hex(bytes));
        let reading = protocol::decode_sensor_frame(bytes)?;
        debug!("Decoded reading: {}", reading);

        Ok(&*self.latest.insert(ReadingSnapshot {
            reading,
            received_at,
        }))
    }

    /// Track link state; anything other than `ServicesReady` drops the
    /// snapshot. Returns `true` if a snapshot was discarded.
    pub fn on_link_state(&mut self, state: LinkState) -> bool {
        if state == LinkState::ServicesReady {
            return false;
        }
        self.latest.take().is_some()
    }

    pub fn latest(&self) -> Option<&ReadingSnapshot> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(heart_rate: u8) -> Vec<u8> {
        let mut f = vec![0u8; 20];
        f[..12].copy_from_slice(&[heart_rate, 120, 80, 0x00, 0x03, 0xE8, 24, 5, 1, 8, 30, 0]);
        f
    }

    #[test]
    fn test_latest_is_overwritten() {
        let mut aggregator = ReadingAggregator::new();
        let first = Local::now();

        aggregator.ingest(&frame(60), first).unwrap();
        let second = Local::now();
        aggregator.ingest(&frame(0), second).unwrap();

        let latest = aggregator.latest().unwrap();
        assert_eq!(latest.reading.heart_rate, 0);
        assert!(!latest.reading.heart_rate_present());
        assert_eq!(latest.received_at, second);
    }

    #[test]
    fn test_short_frames_leave_snapshot_untouched() {
        let mut aggregator = ReadingAggregator::new();
        let at = Local::now();
        aggregator.ingest(&frame(72), at).unwrap();
        let before = aggregator.latest().cloned();

        for len in 0..13 {
            let err = aggregator.ingest(&frame(99)[..len], Local::now()).unwrap_err();
            assert_eq!(err, FrameError::TooShort { len });
        }

        assert_eq!(aggregator.latest().cloned(), before);
    }

    #[test]
    fn test_reset_when_leaving_ready() {
        let mut aggregator = ReadingAggregator::new();
        aggregator.ingest(&frame(72), Local::now()).unwrap();

        assert!(!aggregator.on_link_state(LinkState::ServicesReady));
        assert!(aggregator.latest().is_some());

        assert!(aggregator.on_link_state(LinkState::Disconnected));
        assert!(aggregator.latest().is_none());
        assert!(!aggregator.on_link_state(LinkState::Disconnected));
    }
}
