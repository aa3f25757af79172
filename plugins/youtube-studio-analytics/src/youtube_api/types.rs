//! Shared types and pagination for the YouTube API client.

use super::ApiError;
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll, ready};
use tokio_stream::Stream;

/// One page of items plus the token for the page after it.
type Page<T> = (VecDeque<T>, Option<String>);

/// A page being fetched. The fetcher travels along so the next page can be requested with it.
type PageFuture<'a, F, T> = Pin<Box<dyn Future<Output = Result<(F, Page<T>), ApiError>> + Send + 'a>>;

fn fetch_page<'a, T, F, Fut>(fetcher: F, token: Option<String>) -> PageFuture<'a, F, T>
where
    F: Fn(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'a,
{
    Box::pin(async move {
        let page = fetcher(token).await?;
        Ok((fetcher, page))
    })
}

/// Walks a `pageToken`-paginated list endpoint, yielding its items one at a time.
///
/// Pages are only requested once the items of the previous one have been consumed. After an
/// error the stream is exhausted.
pub struct PagedStream<'a, T, F> {
    buffered: VecDeque<T>,
    /// `None` once the last page has arrived.
    fetch: Option<PageFuture<'a, F, T>>,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    /// `fetcher` maps a page token (`None` for the first page) to that page.
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'a,
    {
        Self {
            buffered: VecDeque::new(),
            fetch: Some(fetch_page(fetcher, None)),
        }
    }
}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'a,
{
    type Item = Result<T, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(item) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            let Some(fetch) = this.fetch.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(fetch.as_mut().poll(cx)) {
                Ok((fetcher, (items, next))) => {
                    this.buffered.extend(items);
                    // some endpoints send an empty token on the last page
                    this.fetch = next
                        .filter(|token| !token.is_empty())
                        .map(|token| fetch_page(fetcher, Some(token)));
                }
                Err(e) => {
                    this.fetch = None;
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }
}

/// <https://developers.google.com/youtube/v3/docs/pageInfo>
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageInfo {
    pub total_results: u32,
    pub results_per_page: u32,
}
