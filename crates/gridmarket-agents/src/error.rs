use gridmarket_engine::MarketError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Decision timed out after {0} ms")]
    Timeout(u64),

    #[error("Decision provider unavailable: {0}")]
    Unavailable(String),

    #[error("Decision command error: {0}")]
    Command(String),

    #[error("Decision parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Tick {tick} aborted: {source}")]
    Aborted {
        tick: u64,
        #[source]
        source: MarketError,
    },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Report channel closed")]
    Closed,

    #[error("Report sink error: {0}")]
    Backend(String),
}
