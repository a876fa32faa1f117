//! Bounded streaming search
//!
//! Backends produce lazy result streams. [`Bounded`] caps how many records a
//! restricted search may yield and reports an error instead of truncating,
//! so callers can tell "exactly at the limit" from "more existed".

use crate::error::{IdmError, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Maximum number of results a restricted search may return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "usize", into = "usize")]
pub enum SearchLimit {
    #[default]
    Unbounded,
    Limit(usize),
}

impl SearchLimit {
    pub fn get(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Limit(max) => Some(*max),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Page size that fetches at most one record past the limit
    pub fn page_size(&self, max_page_size: usize, restrict: bool) -> usize {
        match (restrict, self) {
            (true, Self::Limit(max)) => max_page_size.min(max.saturating_add(1)),
            _ => max_page_size,
        }
    }
}

impl From<usize> for SearchLimit {
    fn from(value: usize) -> Self {
        match value {
            0 => Self::Unbounded,
            max => Self::Limit(max),
        }
    }
}

impl From<SearchLimit> for usize {
    fn from(limit: SearchLimit) -> Self {
        limit.get().unwrap_or(0)
    }
}

/// Stream adaptor that fails on the first record past `max`
pub struct Bounded<S> {
    inner: S,
    max: usize,
    seen: usize,
    tripped: bool,
}

impl<S> Bounded<S> {
    pub fn new(inner: S, max: usize) -> Self {
        Self {
            inner,
            max,
            seen: 0,
            tripped: false,
        }
    }
}

impl<S, T> Stream for Bounded<S>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.tripped {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => {
                self.seen += 1;
                if self.seen > self.max {
                    self.tripped = true;
                    Poll::Ready(Some(Err(IdmError::ResultLimitExceeded { limit: self.max })))
                } else {
                    Poll::Ready(Some(Ok(item)))
                }
            }
            other => other,
        }
    }
}

/// Apply the limit to a search stream when `restrict` is set
pub fn restrict_results<T>(
    stream: BoxStream<'static, Result<T>>,
    limit: SearchLimit,
    restrict: bool,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
{
    match (restrict, limit) {
        (true, SearchLimit::Limit(max)) => Bounded::new(stream, max).boxed(),
        _ => stream,
    }
}
