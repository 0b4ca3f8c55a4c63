use std::sync::Arc;

use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Snapshot of one cache slot.
///
/// `data` survives a failed or in-flight refetch so a view can keep showing
/// the previous rows next to a loading indicator or an error banner.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Option<Arc<T>>,
    pub status: QueryStatus,
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            stale: self.stale,
        }
    }
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            fetched_at: None,
            stale: false,
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Served from cache without a network round trip
    pub fn is_fresh(&self) -> bool {
        self.status == QueryStatus::Success && !self.stale && self.data.is_some()
    }

    pub(super) fn begin_loading(&mut self) {
        self.status = QueryStatus::Loading;
    }

    pub(super) fn succeed(&mut self, data: Arc<T>, at: DateTime<Utc>, stale: bool) {
        debug_assert_eq!(self.status, QueryStatus::Loading);

        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.error = None;
        self.fetched_at = Some(at);
        self.stale = stale;
    }

    pub(super) fn fail(&mut self, error: String, stale: bool) {
        debug_assert_eq!(self.status, QueryStatus::Loading);

        self.status = QueryStatus::Error;
        self.error = Some(error);
        self.stale = stale;
    }
}
