#![forbid(unsafe_code)]

//! Lazy traversal of a paginated playlist listing.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::Error;
use crate::metadata::{MetadataSource, VideoRecord, Visibility};

/// Largest page the Data API serves.
pub const PAGE_SIZE: u32 = 50;

#[derive(Debug)]
enum Cursor {
    First,
    Next(String),
    Exhausted,
}

/// Yields every listed video of a playlist, one page request at a time.
///
/// Entries without a status (deleted, region-blocked) are skipped and only
/// counted. A failed page request is yielded once as `Err` and ends the walk;
/// records yielded before it stay valid. Once finished the walker keeps
/// returning `None`; walking again requires a new walker.
pub struct PlaylistWalker<'a> {
    source: &'a dyn MetadataSource,
    playlist_id: String,
    page_size: u32,
    cursor: Cursor,
    buffered: VecDeque<VideoRecord>,
    pages_fetched: usize,
    skipped: usize,
}

impl<'a> PlaylistWalker<'a> {
    pub fn new(source: &'a dyn MetadataSource, playlist_id: impl Into<String>) -> Self {
        Self {
            source,
            playlist_id: playlist_id.into(),
            page_size: PAGE_SIZE,
            cursor: Cursor::First,
            buffered: VecDeque::new(),
            pages_fetched: 0,
            skipped: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Entries dropped because their status was missing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn fetch_next_page(&mut self) -> Result<(), Error> {
        let cursor = match std::mem::replace(&mut self.cursor, Cursor::Exhausted) {
            Cursor::First => None,
            Cursor::Next(token) => Some(token),
            Cursor::Exhausted => return Ok(()),
        };

        let page = self
            .source
            .playlist_page(&self.playlist_id, self.page_size, cursor.as_deref())?;
        self.pages_fetched += 1;

        let listed = page.items.len();
        for item in page.items {
            if item.visibility == Visibility::Unknown {
                debug!(item = %item.id, "skipping entry without status");
                self.skipped += 1;
                continue;
            }
            self.buffered.push_back(VideoRecord::from_item(item));
        }

        if let Some(token) = page.next_cursor.filter(|token| !token.is_empty()) {
            self.cursor = Cursor::Next(token);
        }
        debug!(
            playlist_id = %self.playlist_id,
            page = self.pages_fetched,
            listed,
            last = matches!(self.cursor, Cursor::Exhausted),
            "fetched playlist page"
        );
        Ok(())
    }
}

impl Iterator for PlaylistWalker<'_> {
    type Item = Result<VideoRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffered.pop_front() {
                return Some(Ok(record));
            }
            if matches!(self.cursor, Cursor::Exhausted) {
                return None;
            }
            // An empty page with a cursor just moves on to the next request.
            if let Err(err) = self.fetch_next_page() {
                return Some(Err(err));
            }
        }
    }
}

impl std::iter::FusedIterator for PlaylistWalker<'_> {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Result;
    use crate::metadata::{MetadataItem, MetadataPage};
    use std::cell::RefCell;

    /// In-memory playlist served in pages, with an optional failing page.
    pub(crate) struct FakeSource {
        pub items: Vec<MetadataItem>,
        pub fail_on_page: Option<usize>,
        pub requests: RefCell<Vec<Option<String>>>,
    }

    impl FakeSource {
        pub fn new(items: Vec<MetadataItem>) -> Self {
            Self {
                items,
                fail_on_page: None,
                requests: RefCell::new(Vec::new()),
            }
        }

        pub fn public(count: usize) -> Self {
            Self::new((0..count).map(|i| item(i, Visibility::Public)).collect())
        }
    }

    pub(crate) fn item(index: usize, visibility: Visibility) -> MetadataItem {
        MetadataItem {
            id: format!("item{index}"),
            title: format!("Artist {index} - Song {index}"),
            content_video_id: Some(format!("vid{index}")),
            visibility,
        }
    }

    impl MetadataSource for FakeSource {
        fn playlist_page(
            &self,
            playlist_id: &str,
            page_size: u32,
            cursor: Option<&str>,
        ) -> Result<MetadataPage> {
            let mut requests = self.requests.borrow_mut();
            requests.push(cursor.map(str::to_string));
            let page_index = requests.len() - 1;
            if self.fail_on_page == Some(page_index) {
                return Err(Error::FetchFailed {
                    what: format!("playlist {playlist_id}"),
                    message: "HTTP 500".into(),
                });
            }

            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + page_size as usize).min(self.items.len());
            let next_cursor = if end < self.items.len() {
                Some(end.to_string())
            } else {
                Some(String::new())
            };
            Ok(MetadataPage {
                items: self.items[start..end].to_vec(),
                next_cursor,
            })
        }

        fn video(&self, video_id: &str) -> Result<Option<MetadataItem>> {
            Ok(self
                .items
                .iter()
                .find(|item| item.content_video_id.as_deref() == Some(video_id))
                .map(|item| MetadataItem {
                    id: video_id.to_string(),
                    content_video_id: None,
                    ..item.clone()
                }))
        }
    }

    #[test]
    fn walk_yields_every_item_across_pages() {
        for count in [1, 49, 50, 51, 120, 150] {
            let source = FakeSource::public(count);
            let mut walker = PlaylistWalker::new(&source, "PL");
            let ids: Vec<String> = walker.by_ref().map(|record| record.unwrap().id).collect();

            assert_eq!(ids.len(), count);
            assert_eq!(ids.first().map(String::as_str), Some("vid0"));
            assert_eq!(walker.pages_fetched(), count.div_ceil(50), "count {count}");
            assert_eq!(source.requests.borrow().len(), count.div_ceil(50));
        }
    }

    #[test]
    fn cursor_is_forwarded_and_first_request_has_none() {
        let source = FakeSource::public(120);
        let walker = PlaylistWalker::new(&source, "PL");
        assert_eq!(walker.count(), 120);
        assert_eq!(
            *source.requests.borrow(),
            vec![None, Some("50".to_string()), Some("100".to_string())]
        );
    }

    #[test]
    fn unknown_visibility_is_skipped_and_counted() {
        let source = FakeSource::new(vec![
            item(0, Visibility::Public),
            item(1, Visibility::Unknown),
            item(2, Visibility::Private),
            item(3, Visibility::Unlisted),
            item(4, Visibility::Unknown),
        ]);
        let mut walker = PlaylistWalker::new(&source, "PL");
        let records: Vec<VideoRecord> = walker.by_ref().map(Result::unwrap).collect();

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, ["vid0", "vid2", "vid3"]);
        assert_eq!(records[1].visibility, Visibility::Private);
        assert_eq!(walker.skipped(), 2);
    }

    #[test]
    fn fetch_error_ends_walk_after_earlier_pages() {
        let mut source = FakeSource::public(120);
        source.fail_on_page = Some(1);
        let mut walker = PlaylistWalker::new(&source, "PL");

        let mut ok = 0;
        let mut errors = 0;
        for result in walker.by_ref() {
            match result {
                Ok(_) => ok += 1,
                Err(Error::FetchFailed { .. }) => errors += 1,
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(ok, 50);
        assert_eq!(errors, 1);
        assert!(walker.next().is_none());
        assert_eq!(source.requests.borrow().len(), 2);
    }

    #[test]
    fn first_page_failure_yields_single_error() {
        let mut source = FakeSource::public(3);
        source.fail_on_page = Some(0);
        let results: Vec<_> = PlaylistWalker::new(&source, "PL").collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn empty_playlist_makes_one_request() {
        let source = FakeSource::public(0);
        let mut walker = PlaylistWalker::new(&source, "PL");
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());
        assert_eq!(walker.pages_fetched(), 1);
    }
}
