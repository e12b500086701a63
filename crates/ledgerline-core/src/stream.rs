//! Lazy, paged reading of one event stream.
//!
//! An [`EventStream`] holds an explicit cursor (the last stream version it
//! fetched) and pulls fixed-size pages from the repository on demand, so a
//! long stream is never materialized at once. It is not rewindable; to read
//! again, open a new stream, optionally resuming after a known version.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::repository::{EventRepository, StoredEvent, StreamFilter};

/// Default number of events fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Cursor over the events of one stream, ascending by stream version.
pub struct EventStream<'a> {
    repo: &'a dyn EventRepository,
    stream_id: Uuid,
    filter: StreamFilter,
    page_size: usize,
    fetched_through: i64,
    last_yielded: i64,
    buffer: VecDeque<StoredEvent>,
    exhausted: bool,
}

impl std::fmt::Debug for EventStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("stream_id", &self.stream_id)
            .field("filter", &self.filter)
            .field("fetched_through", &self.fetched_through)
            .field("last_yielded", &self.last_yielded)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl<'a> EventStream<'a> {
    /// Opens a stream reader positioned before the first event.
    #[must_use]
    pub fn new(repo: &'a dyn EventRepository, stream_id: Uuid, filter: StreamFilter) -> Self {
        Self {
            repo,
            stream_id,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
            fetched_through: 0,
            last_yielded: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Skips every event up to and including `version`.
    #[must_use]
    pub fn after_version(mut self, version: i64) -> Self {
        self.fetched_through = version;
        self.last_yielded = version;
        self
    }

    /// Overrides the page size (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The stream being read.
    #[must_use]
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    /// Stream version of the last event handed out (or the resume point).
    #[must_use]
    pub fn cursor(&self) -> i64 {
        self.last_yielded
    }

    /// Returns the next event, fetching a page when the buffer runs dry.
    ///
    /// # Errors
    ///
    /// Propagates repository failures; the cursor is left unchanged so the
    /// caller may resume with [`EventStream::after_version`].
    pub async fn next_event(&mut self) -> Result<Option<StoredEvent>, DomainError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .repo
                .load_page(
                    self.stream_id,
                    &self.filter,
                    self.fetched_through,
                    self.page_size,
                )
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.fetched_through = last.stream_version;
            }
            self.buffer.extend(page);
        }

        let next = self.buffer.pop_front();
        if let Some(event) = &next {
            self.last_yielded = event.stream_version;
        }
        Ok(next)
    }

    /// Drains the rest of the stream into memory. Meant for short streams
    /// and tests.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn try_collect(mut self) -> Result<Vec<StoredEvent>, DomainError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }
}

/// All events of `stream_id`, or those that had occurred at `as_of`.
#[must_use]
pub fn get(
    repo: &dyn EventRepository,
    stream_id: Uuid,
    as_of: Option<DateTime<Utc>>,
) -> EventStream<'_> {
    EventStream::new(repo, stream_id, StreamFilter::as_of(as_of))
}

/// Like [`get`], restricted to the given event names.
#[must_use]
pub fn get_by_types<'a>(
    repo: &'a dyn EventRepository,
    stream_id: Uuid,
    event_names: &[&str],
    as_of: Option<DateTime<Utc>>,
) -> EventStream<'a> {
    EventStream::new(
        repo,
        stream_id,
        StreamFilter::as_of(as_of).with_types(event_names.iter().copied()),
    )
}
