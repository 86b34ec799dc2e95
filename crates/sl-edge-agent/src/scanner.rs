//! Scan record sources.
//!
//! The scanner pushes records; the supervisor drains whatever is queued on
//! each tick without blocking.

use std::collections::VecDeque;

use sl_protocol::ScanRecord;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Non-blocking source of scan records.
pub trait ScanSource: Send {
    /// Next queued record, or `None` if nothing is waiting right now.
    fn try_next(&mut self) -> Option<ScanRecord>;
}

/// Records fed through an mpsc channel.
#[derive(Debug)]
pub struct ChannelScanSource {
    receiver: mpsc::Receiver<ScanRecord>,
}

impl ChannelScanSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<ScanRecord>, Self) {
        let (tx, receiver) = mpsc::channel(capacity);
        (tx, Self { receiver })
    }
}

impl ScanSource for ChannelScanSource {
    fn try_next(&mut self) -> Option<ScanRecord> {
        self.receiver.try_recv().ok()
    }
}

/// Fixed queue of records.
#[derive(Debug, Default)]
pub struct VecScanSource {
    records: VecDeque<ScanRecord>,
}

impl VecScanSource {
    pub fn new(records: impl IntoIterator<Item = ScanRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn push(&mut self, record: ScanRecord) {
        self.records.push_back(record);
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl ScanSource for VecScanSource {
    fn try_next(&mut self) -> Option<ScanRecord> {
        self.records.pop_front()
    }
}

/// Parse one JSON record per line from `reader` and forward it to `sender`.
///
/// Malformed lines are logged and skipped. The task ends at EOF, on a read
/// error, or when the receiving side is dropped.
pub fn spawn_json_lines_reader<R>(reader: R, sender: mpsc::Sender<ScanRecord>) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("scan input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "scan input read failed");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ScanRecord>(line) {
                Ok(record) => {
                    if sender.send(record).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, line = %line, "skipping malformed scan record");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(rssi: i16) -> ScanRecord {
        ScanRecord::new(
            "AA:BB:CC:DD:EE:FF",
            rssi,
            vec![0x01],
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn vec_source_drains_in_order() {
        let mut source = VecScanSource::new([record(-10), record(-20)]);
        assert_eq!(source.try_next().unwrap().rssi, -10);
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.try_next().unwrap().rssi, -20);
        assert!(source.try_next().is_none());
    }

    #[tokio::test]
    async fn channel_source_never_blocks() {
        let (tx, mut source) = ChannelScanSource::new(4);
        assert!(source.try_next().is_none());
        tx.send(record(-30)).await.unwrap();
        assert_eq!(source.try_next().unwrap().rssi, -30);
        assert!(source.try_next().is_none());
    }

    #[tokio::test]
    async fn json_lines_skip_malformed() {
        let input = concat!(
            r#"{"peer_address":"AA:BB:CC:DD:EE:FF","rssi":-60,"payload":"0102","timestamp":"2024-03-09T07:05:01Z"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"peer_address":"11:22:33:44:55:66","rssi":-90,"payload":"zz"}"#,
            "\n",
            r#"{"peer_address":"11:22:33:44:55:66","rssi":-70}"#,
            "\n",
        );
        let (tx, mut source) = ChannelScanSource::new(8);
        spawn_json_lines_reader(input.as_bytes(), tx).await.unwrap();

        let first = source.try_next().unwrap();
        assert_eq!(first.payload, vec![0x01, 0x02]);
        assert_eq!(first.formatted_timestamp(), "2024-03-09 07:05:01");

        let second = source.try_next().unwrap();
        assert_eq!(second.rssi, -70);
        assert!(second.payload.is_empty());

        assert!(source.try_next().is_none());
    }
}
