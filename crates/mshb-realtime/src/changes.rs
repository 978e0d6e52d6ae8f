//! Row change subscriptions (`postgres_changes`).
//!
//! The store publishes every write on a broadcast channel. A
//! [`ChangeStream`] wraps one receiver and yields only the changes matching
//! its [`ChangeFilter`].

use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use mshb_shared::types::{ChangeKind, RowChange};

/// Which changes a subscriber wants: one table, optionally one kind of
/// change and one `column = value` equality.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: String,
    pub kind: Option<ChangeKind>,
    pub eq: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            kind: None,
            eq: None,
        }
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.eq = Some((column.to_string(), value.into()));
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table {
            return false;
        }
        if self.kind.is_some_and(|k| k != change.kind) {
            return false;
        }
        match &self.eq {
            Some((column, value)) => change.column(column) == Some(value),
            None => true,
        }
    }
}

pub struct ChangeStream {
    rx: broadcast::Receiver<RowChange>,
    filter: ChangeFilter,
}

impl ChangeStream {
    pub fn new(rx: broadcast::Receiver<RowChange>, filter: ChangeFilter) -> Self {
        Self { rx, filter }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Next matching change, or `None` once the store is gone.
    ///
    /// A lagging receiver skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<RowChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.filter.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(table = %self.filter.table, skipped, "change stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for draining whatever is already queued.
    pub fn try_recv(&mut self) -> Option<RowChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if self.filter.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(table = %self.filter.table, skipped, "change stream lagged");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RowChange> {
        futures::stream::unfold(self, |mut s| async move {
            let change = s.recv().await?;
            Some((change, s))
        })
    }
}
