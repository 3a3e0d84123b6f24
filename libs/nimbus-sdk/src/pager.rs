//! Lazy, restartable paging
//!
//! A [`Pager`] holds only the immutable page-fetch functions it was built
//! from. Each [`PageStream`] it hands out walks the result set from the
//! first page (or from a saved continuation token) and fetches the next page
//! only when polled for it:
//!
//! ```text
//! NotStarted --fetch--> FetchingPage --token--> HasPage --poll--> FetchingPage
//!                                    --no token--> Exhausted
//!                                    --error--> Failed
//! ```
//!
//! Dropping a stream while a fetch is in flight cancels that fetch: its
//! future is dropped at its next await point instead of being run to
//! completion with the result thrown away. A request already on the wire may
//! still reach the service, but its response is never read. Nothing is
//! fetched after the consumer stops polling.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_core::{FusedStream, Stream};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;

use crate::error::PagerError;
use crate::page::Page;

type PageFuture<T, E> = BoxFuture<'static, Result<Page<T>, E>>;
type FirstPageFn<T, E> = Arc<dyn Fn() -> PageFuture<T, E> + Send + Sync>;
type NextPageFn<T, E> = Arc<dyn Fn(String) -> PageFuture<T, E> + Send + Sync>;

/// Where a [`PageStream`] is in its walk over the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    NotStarted,
    FetchingPage,
    /// A page with a continuation token was delivered
    HasPage,
    /// The last page was delivered
    Exhausted,
    /// A fetch failed; the error was delivered
    Failed,
}

impl PagerState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed)
    }
}

/// Restartable source of page streams.
///
/// Cloning is cheap and shares the fetch functions.
pub struct Pager<T, E> {
    first: FirstPageFn<T, E>,
    next: NextPageFn<T, E>,
}

impl<T, E> Clone for Pager<T, E> {
    fn clone(&self) -> Self {
        Self {
            first: self.first.clone(),
            next: self.next.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Pager<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pager").finish_non_exhaustive()
    }
}

impl<T, E> Pager<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Pager over a single fetch function that receives `None` for the first
    /// page and the previous page's continuation token afterwards.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Page<T>, E>> + Send + 'static,
    {
        let fetch = Arc::new(fetch);
        let first = {
            let fetch = fetch.clone();
            move || fetch(None)
        };
        Self::with_next(first, move |token| fetch(Some(token)))
    }

    /// Pager over separate first-page and next-page functions.
    pub fn with_next<F1, Fut1, F2, Fut2>(first: F1, next: F2) -> Self
    where
        F1: Fn() -> Fut1 + Send + Sync + 'static,
        Fut1: Future<Output = Result<Page<T>, E>> + Send + 'static,
        F2: Fn(String) -> Fut2 + Send + Sync + 'static,
        Fut2: Future<Output = Result<Page<T>, E>> + Send + 'static,
    {
        Self {
            first: Arc::new(move || first().boxed()),
            next: Arc::new(move |token| next(token).boxed()),
        }
    }
}

impl<T, E> Pager<T, E> {
    /// Pages from the first one.
    #[must_use]
    pub fn pages(&self) -> PageStream<T, E> {
        PageStream::new(self.clone(), None)
    }

    /// Pages starting at a saved continuation token. An empty token means
    /// there is nothing left to fetch.
    #[must_use]
    pub fn pages_from(&self, token: impl Into<String>) -> PageStream<T, E> {
        let token = token.into();
        if token.is_empty() {
            let mut stream = PageStream::new(self.clone(), None);
            stream.phase = Phase::Exhausted;
            return stream;
        }
        PageStream::new(self.clone(), Some(token))
    }

    /// Items of every page, in page order.
    #[must_use]
    pub fn items(&self) -> ItemStream<T, E> {
        ItemStream::new(self.pages())
    }
}

enum Phase<T, E> {
    NotStarted,
    Fetching(PageFuture<T, E>),
    HasPage,
    Exhausted,
    Failed,
}

/// Forward-only stream of pages; see the [module docs](self).
///
/// Yields at most one error, after which it ends. Dropping the stream
/// cancels a fetch that is still in flight rather than letting it finish.
/// Callers that need an abandoned page request to complete should drive the
/// fetch functions on a spawned task themselves.
pub struct PageStream<T, E> {
    pager: Pager<T, E>,
    phase: Phase<T, E>,
    /// Token for the next fetch; kept on failure so the walk can be resumed
    token: Option<String>,
    fetches: usize,
}

impl<T, E> PageStream<T, E> {
    fn new(pager: Pager<T, E>, token: Option<String>) -> Self {
        Self {
            pager,
            phase: Phase::NotStarted,
            token,
            fetches: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> PagerState {
        match self.phase {
            Phase::NotStarted => PagerState::NotStarted,
            Phase::Fetching(_) => PagerState::FetchingPage,
            Phase::HasPage => PagerState::HasPage,
            Phase::Exhausted => PagerState::Exhausted,
            Phase::Failed => PagerState::Failed,
        }
    }

    /// Token the next fetch will present, usable with [`Pager::pages_from`].
    #[must_use]
    pub fn continuation_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Fetches issued by this stream so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    fn start_fetch(&mut self) {
        self.fetches += 1;
        tracing::debug!(page = self.fetches, resumed = self.token.is_some(), "Fetching page");
        let fetch = match self.token.clone() {
            Some(token) => (self.pager.next)(token),
            None => (self.pager.first)(),
        };
        self.phase = Phase::Fetching(fetch);
    }

    fn settle(&mut self, result: Result<Page<T>, E>) -> Result<Page<T>, PagerError<E>> {
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.phase = Phase::Failed;
                return Err(PagerError::Fetch(err));
            }
        };
        if let Some(next) = page.continuation_token()
            && self.token.as_deref() == Some(next)
        {
            self.phase = Phase::Failed;
            return Err(PagerError::RepeatedContinuation(next.to_owned()));
        }

        self.token = page.continuation_token().map(str::to_owned);
        self.phase = if page.is_last() {
            Phase::Exhausted
        } else {
            Phase::HasPage
        };
        Ok(page)
    }
}

impl<T, E> Stream for PageStream<T, E> {
    type Item = Result<Page<T>, PagerError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.phase {
                Phase::Exhausted | Phase::Failed => return Poll::Ready(None),
                Phase::NotStarted | Phase::HasPage => this.start_fetch(),
                Phase::Fetching(fetch) => {
                    let result = ready!(fetch.poll_unpin(cx));
                    return Poll::Ready(Some(this.settle(result)));
                }
            }
        }
    }
}

impl<T, E> FusedStream for PageStream<T, E> {
    fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }
}

impl<T, E> fmt::Debug for PageStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStream")
            .field("state", &self.state())
            .field("has_token", &self.token.is_some())
            .field("fetches", &self.fetches)
            .finish()
    }
}

pin_project! {
    /// Items of a [`PageStream`], flattened in page order.
    ///
    /// The next page is fetched only after the current page's items have
    /// all been yielded and the consumer polls again.
    pub struct ItemStream<T, E> {
        #[pin]
        pages: PageStream<T, E>,
        buffered: VecDeque<T>,
    }
}

impl<T, E> ItemStream<T, E> {
    fn new(pages: PageStream<T, E>) -> Self {
        Self {
            pages,
            buffered: VecDeque::new(),
        }
    }

    /// State of the underlying page walk.
    #[must_use]
    pub fn state(&self) -> PagerState {
        self.pages.state()
    }

    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.pages.fetch_count()
    }
}

impl<T, E> Stream for ItemStream<T, E> {
    type Item = Result<T, PagerError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(item) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            match ready!(this.pages.as_mut().poll_next(cx)) {
                Some(Ok(page)) => this.buffered.extend(page),
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<T, E> FusedStream for ItemStream<T, E> {
    fn is_terminated(&self) -> bool {
        self.buffered.is_empty() && self.pages.is_terminated()
    }
}

impl<T, E> fmt::Debug for ItemStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream")
            .field("pages", &self.pages)
            .field("buffered", &self.buffered.len())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures_util::{StreamExt, TryStreamExt};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Pager over fixed pages linked by tokens `t1`, `t2`, ...
    fn linked(pages: Vec<Vec<u32>>) -> (Pager<u32, String>, Arc<AtomicUsize>) {
        let pages: Arc<[Vec<u32>]> = Arc::from(pages);
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let pager = Pager::new(move |token: Option<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let pages = pages.clone();
            async move {
                let index = match token {
                    None => 0,
                    Some(t) => t
                        .strip_prefix('t')
                        .and_then(|n| n.parse::<usize>().ok())
                        .ok_or_else(|| format!("bad token {t}"))?,
                };
                let items = pages.get(index).cloned().ok_or("no such page")?;
                let next = (index + 1 < pages.len()).then(|| format!("t{}", index + 1));
                Ok(Page::new(items, next))
            }
        });
        (pager, fetches)
    }

    #[tokio::test]
    async fn items_concatenate_pages_in_order() {
        let (pager, fetches) = linked(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);

        let items: Vec<u32> = pager.items().try_collect().await.unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn each_fetch_is_logged() {
        let (pager, _) = linked(vec![vec![1], vec![2]]);

        let pages: Vec<_> = pager.pages().try_collect().await.unwrap();

        assert_eq!(pages.len(), 2);
        assert!(logs_contain("Fetching page"));
        assert!(logs_contain("resumed=true"));
    }

    #[tokio::test]
    async fn empty_page_with_token_is_not_terminal() {
        let (pager, fetches) = linked(vec![vec![1], vec![], vec![], vec![2]]);

        let items: Vec<u32> = pager.items().try_collect().await.unwrap();

        assert_eq!(items, vec![1, 2]);
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn abandoned_iteration_stops_fetching() {
        let (pager, fetches) = linked(vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]]);

        let mut items = pager.items();
        let first_three: Vec<u32> = items.by_ref().take(3).try_collect().await.unwrap();
        assert_eq!(first_three, vec![1, 2, 3]);
        drop(items);

        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        let pages: Vec<_> = pager.pages().take(1).collect().await;
        assert_eq!(pages.len(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_fetch_failure_fails_without_a_page() {
        let pager: Pager<u32, String> = Pager::new(|_| async { Err("boom".to_owned()) });
        let mut pages = pager.pages();
        assert_eq!(pages.state(), PagerState::NotStarted);

        let err = pages.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PagerError::Fetch(ref e) if e == "boom"));
        assert_eq!(pages.state(), PagerState::Failed);
        assert!(pages.is_terminated());
        assert!(pages.next().await.is_none());
        assert_eq!(pages.fetch_count(), 1);
    }

    #[tokio::test]
    async fn state_follows_the_walk() {
        let (pager, _) = linked(vec![vec![1], vec![2]]);
        let mut pages = pager.pages();

        let first = pages.next().await.unwrap().unwrap();
        assert_eq!(first.continuation_token(), Some("t1"));
        assert_eq!(pages.state(), PagerState::HasPage);
        assert_eq!(pages.continuation_token(), Some("t1"));

        let last = pages.next().await.unwrap().unwrap();
        assert!(last.is_last());
        assert_eq!(pages.state(), PagerState::Exhausted);
        assert!(pages.next().await.is_none());
    }

    #[tokio::test]
    async fn every_stream_restarts_at_the_first_page() {
        let (pager, fetches) = linked(vec![vec![1], vec![2]]);

        let once: Vec<u32> = pager.items().try_collect().await.unwrap();
        let twice: Vec<u32> = pager.clone().items().try_collect().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn resumes_from_saved_token() {
        let (pager, fetches) = linked(vec![vec![1], vec![2], vec![3]]);

        let items: Vec<u32> = ItemStream::new(pager.pages_from("t1"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![2, 3]);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        let mut nothing = pager.pages_from("");
        assert!(nothing.next().await.is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_keeps_resume_token() {
        let (pager, _) = linked(vec![vec![1], vec![2]]);
        let flaky = {
            let (first, next) = (pager.first.clone(), pager.next.clone());
            let failed_once = Arc::new(AtomicBool::new(false));
            Pager::with_next(
                move || first(),
                move |token| {
                    let fetch = next(token);
                    let fail = !failed_once.swap(true, Ordering::SeqCst);
                    async move {
                        if fail {
                            Err("transient".to_owned())
                        } else {
                            fetch.await
                        }
                    }
                },
            )
        };

        let mut pages = flaky.pages();
        pages.next().await.unwrap().unwrap();
        assert!(pages.next().await.unwrap().is_err());
        let token = pages.continuation_token().unwrap().to_owned();
        assert_eq!(token, "t1");

        let rest: Vec<u32> = ItemStream::new(flaky.pages_from(token))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rest, vec![2]);
    }

    #[tokio::test]
    async fn repeated_continuation_fails() {
        let pager: Pager<u32, String> =
            Pager::new(|_| async { Ok(Page::new(vec![1], Some("same".into()))) });

        let results: Vec<_> = pager.pages().collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(PagerError::RepeatedContinuation(ref t)) if t == "same"
        ));
    }

    #[test]
    fn dropping_the_stream_drops_the_in_flight_fetch() {
        struct Pending(Arc<AtomicBool>);

        impl Future for Pending {
            type Output = Result<Page<u32>, String>;

            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
                Poll::Pending
            }
        }

        impl Drop for Pending {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let pager = Pager::new(move |_| Pending(flag.clone()));

        let mut items = pager.items();
        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(Pin::new(&mut items).poll_next(&mut cx).is_pending());
        assert_eq!(items.state(), PagerState::FetchingPage);
        assert_eq!(items.fetch_count(), 1);

        drop(items);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
