use async_trait::async_trait;
use gridmarket_models::TickReport;
use tokio::sync::mpsc;

use crate::error::SinkError;

/// Receives every settled tick. A failing sink is logged and skipped; it never
/// stops the run.
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    async fn emit(&self, report: &TickReport) -> Result<(), SinkError>;
}

/// Forwards reports into a bounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<TickReport>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TickReport>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of a fresh channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TickReport>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn emit(&self, report: &TickReport) -> Result<(), SinkError> {
        self.tx
            .send(report.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}
