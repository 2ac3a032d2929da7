//! Delivery of duration records to the remote log endpoint.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::DurationRecord;

pub mod http;
pub mod recording;

pub use http::HttpSink;
pub use recording::RecordingSink;

/// Anything that accepts a duration record and reports whether it was taken.
///
/// Errors are never shown to the user; the tracker turns them into pending
/// queue entries.
#[async_trait]
pub trait DurationSink: Send + Sync {
    async fn send(&self, record: &DurationRecord) -> Result<()>;
}
