//! Bookmark repository trait and settings-store implementation

use crate::error::{LibraryError, Result};
use crate::models::{BookId, Bookmark};
use async_trait::async_trait;
use bridge_traits::storage::SettingsStore;
use core_async::sync::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "bookmarks.";
const INDEX_KEY: &str = "bookmarks.index";

/// Bookmark repository interface
///
/// Bookmarks of a book are kept sorted by time. Two bookmarks at the same
/// millisecond in the same book are the same bookmark.
#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    /// Bookmarks of a book, sorted by time. Empty when none exist.
    async fn list(&self, book_id: &BookId) -> Result<Vec<Bookmark>>;

    /// Insert or replace the bookmark at the same position.
    async fn add(&self, bookmark: Bookmark) -> Result<()>;

    /// # Returns
    /// - `Ok(true)` if a bookmark at `time` existed and was removed
    /// - `Ok(false)` otherwise
    async fn remove(&self, book_id: &BookId, time: f64) -> Result<bool>;

    /// Books with at least one bookmark.
    async fn bookmarked_book_ids(&self) -> Result<Vec<BookId>>;

    /// Union `incoming` into the stored bookmarks, keyed by book and
    /// position. Existing entries win. Returns how many were added.
    async fn merge(&self, incoming: Vec<Bookmark>) -> Result<usize>;

    /// Remove every bookmark of a book. No-op when there are none.
    async fn delete_book(&self, book_id: &BookId) -> Result<()>;
}

/// Bookmarks stored as one JSON array per book in a [`SettingsStore`].
pub struct SettingsBookmarkRepository {
    store: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
}

impl SettingsBookmarkRepository {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn key(book_id: &BookId) -> String {
        format!("{}{}", KEY_PREFIX, book_id)
    }

    async fn read_book(&self, book_id: &BookId) -> Result<Vec<Bookmark>> {
        match self.store.get_string(&Self::key(book_id)).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                LibraryError::Storage(format!("corrupt bookmarks for {}: {}", book_id, e))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn read_index(&self) -> Result<BTreeSet<BookId>> {
        match self.store.get_string(INDEX_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(ids) => Ok(ids),
                Err(e) => {
                    warn!(error = %e, "Bookmark index unreadable, rebuilding from keys");
                    self.rebuild_index().await
                }
            },
            None => Ok(BTreeSet::new()),
        }
    }

    async fn rebuild_index(&self) -> Result<BTreeSet<BookId>> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k != INDEX_KEY)
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(BookId::from))
            .collect())
    }

    /// Writes the book's list (or removes it when empty) together with the
    /// updated index in one transaction.
    async fn write_book(
        &self,
        book_id: &BookId,
        mut bookmarks: Vec<Bookmark>,
        mut index: BTreeSet<BookId>,
    ) -> Result<()> {
        bookmarks.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut tx = self.store.begin_transaction().await?;
        if bookmarks.is_empty() {
            index.remove(book_id);
            tx.delete(&Self::key(book_id)).await?;
        } else {
            index.insert(book_id.clone());
            tx.set_string(&Self::key(book_id), &serde_json::to_string(&bookmarks)?)
                .await?;
        }
        tx.set_string(INDEX_KEY, &serde_json::to_string(&index)?)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BookmarkRepository for SettingsBookmarkRepository {
    async fn list(&self, book_id: &BookId) -> Result<Vec<Bookmark>> {
        self.read_book(book_id).await
    }

    async fn add(&self, bookmark: Bookmark) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let book_id = bookmark.book_id.clone();
        let mut existing = self.read_book(&book_id).await?;
        existing.retain(|b| b.position_ms() != bookmark.position_ms());
        existing.push(bookmark);
        let index = self.read_index().await?;
        self.write_book(&book_id, existing, index).await
    }

    async fn remove(&self, book_id: &BookId, time: f64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let target = (time * 1000.0).round() as i64;
        let mut existing = self.read_book(book_id).await?;
        let before = existing.len();
        existing.retain(|b| b.position_ms() != target);
        if existing.len() == before {
            return Ok(false);
        }
        let index = self.read_index().await?;
        self.write_book(book_id, existing, index).await?;
        Ok(true)
    }

    async fn bookmarked_book_ids(&self) -> Result<Vec<BookId>> {
        Ok(self.read_index().await?.into_iter().collect())
    }

    async fn merge(&self, incoming: Vec<Bookmark>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index().await?;
        let mut added = 0;

        let mut by_book: std::collections::BTreeMap<BookId, Vec<Bookmark>> = Default::default();
        for bookmark in incoming {
            by_book
                .entry(bookmark.book_id.clone())
                .or_default()
                .push(bookmark);
        }

        for (book_id, candidates) in by_book {
            let mut existing = self.read_book(&book_id).await?;
            let mut known: BTreeSet<i64> = existing.iter().map(Bookmark::position_ms).collect();
            let before = existing.len();
            for candidate in candidates {
                if known.insert(candidate.position_ms()) {
                    existing.push(candidate);
                }
            }
            let new_count = existing.len() - before;
            if new_count > 0 {
                self.write_book(&book_id, existing, index.clone()).await?;
                index.insert(book_id.clone());
                added += new_count;
            }
        }

        debug!(added, "Merged bookmarks");
        Ok(added)
    }

    async fn delete_book(&self, book_id: &BookId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let index = self.read_index().await?;
        if !index.contains(book_id) && self.store.get_string(&Self::key(book_id)).await?.is_none()
        {
            return Ok(());
        }
        self.write_book(book_id, Vec::new(), index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::testing::InMemorySettingsStore;

    fn bookmark(book: &str, time: f64, title: &str) -> Bookmark {
        Bookmark {
            book_id: BookId::new(book),
            time,
            title: title.to_string(),
            created_at: 1_700_000_000_000,
        }
    }

    fn repo() -> (SettingsBookmarkRepository, InMemorySettingsStore) {
        let store = InMemorySettingsStore::new();
        (SettingsBookmarkRepository::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn list_is_sorted_by_time() {
        let (repo, _) = repo();
        repo.add(bookmark("A", 300.0, "late")).await.unwrap();
        repo.add(bookmark("A", 12.5, "early")).await.unwrap();

        let titles: Vec<_> = repo
            .list(&BookId::new("A"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn add_at_same_position_replaces() {
        let (repo, _) = repo();
        repo.add(bookmark("A", 10.0, "first")).await.unwrap();
        repo.add(bookmark("A", 10.0, "renamed")).await.unwrap();

        let list = repo.list(&BookId::new("A")).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "renamed");
    }

    #[tokio::test]
    async fn removing_last_bookmark_drops_book_from_index() {
        let (repo, store) = repo();
        repo.add(bookmark("A", 10.0, "x")).await.unwrap();
        assert!(repo.remove(&BookId::new("A"), 10.0).await.unwrap());
        assert!(!repo.remove(&BookId::new("A"), 10.0).await.unwrap());

        assert!(repo.bookmarked_book_ids().await.unwrap().is_empty());
        assert!(!store.snapshot().await.contains_key("bookmarks.A"));
    }

    #[tokio::test]
    async fn merge_is_a_union() {
        let (repo, _) = repo();
        repo.add(bookmark("A", 10.0, "local")).await.unwrap();

        let added = repo
            .merge(vec![
                bookmark("A", 10.0, "server copy"),
                bookmark("A", 20.0, "server only"),
                bookmark("B", 5.0, "other book"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let a = repo.list(&BookId::new("A")).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].title, "local");
        assert_eq!(
            repo.bookmarked_book_ids().await.unwrap(),
            vec![BookId::new("A"), BookId::new("B")]
        );

        assert_eq!(repo.merge(vec![bookmark("B", 5.0, "again")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_absent_book_is_noop() {
        let (repo, store) = repo();
        repo.delete_book(&BookId::new("missing")).await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_storage_error() {
        let (repo, store) = repo();
        store.set_string("bookmarks.A", "{not json").await.unwrap();
        assert!(matches!(
            repo.list(&BookId::new("A")).await,
            Err(LibraryError::Storage(_))
        ));
    }
}
