//! Per-user favorites with a staging slot and two-phase delete.
//!
//! Three tables, all keyed by [`UserKey`]:
//! - favorites: the durable, ordered list of [`FavoriteRecord`]s
//! - last fetched: the sentence most recently served to the user, which
//!   `add_favorite` turns into a record while it is younger than the
//!   favorite timeout
//! - pending deletes: at most one unconfirmed delete per user
//!
//! Only the favorites table is persisted. Every mutation is written through
//! [`JsonFileStore`] before returning; a failed write is logged, leaves the
//! store dirty for the next autosave, and does not fail the operation.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    domain::UserKey,
    errors::Error,
    persist::JsonFileStore,
    sentence::Sentence,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct FavoriteSettings {
    pub page_size: usize,
    pub favorite_timeout: Duration,
    pub max_per_user: usize,
    pub delete_confirm_timeout: Duration,
}

impl Default for FavoriteSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl FavoriteSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            page_size: cfg.favorites_page_size.max(1),
            favorite_timeout: cfg.favorite_timeout,
            max_per_user: cfg.max_favorites_per_user,
            delete_confirm_timeout: cfg.delete_confirm_timeout,
        }
    }
}

/// One saved quotation. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub content: String,
    pub uuid: String,
    /// Absent in files written before ids were recorded.
    #[serde(default)]
    pub sentence_id: Option<u64>,
    pub category_name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FavoriteRecord {
    pub fn from_sentence(sentence: &Sentence, now: DateTime<Utc>) -> Self {
        Self {
            content: sentence.text.clone(),
            uuid: sentence.uuid.clone(),
            sentence_id: Some(sentence.id),
            category_name: sentence.category.display_name().to_string(),
            source: sentence.source.clone(),
            creator: sentence.creator.clone(),
            created_at: now,
        }
    }

    fn is_same_quotation(&self, sentence: &Sentence) -> bool {
        (!self.uuid.is_empty() && self.uuid == sentence.uuid)
            || self.sentence_id == Some(sentence.id)
    }
}

#[derive(Clone, Debug)]
struct LastFetched {
    sentence: Sentence,
    served_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
struct PendingDelete {
    /// 1-based.
    index: usize,
    requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FavoritePage {
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    /// `(1-based index, record)` pairs.
    pub items: Vec<(usize, FavoriteRecord)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeleteOutcome {
    ConfirmRequired {
        index: usize,
        record: FavoriteRecord,
        expires_in: Duration,
    },
    Deleted {
        index: usize,
        record: FavoriteRecord,
    },
}

type FavoritesDoc = BTreeMap<UserKey, Vec<FavoriteRecord>>;

pub struct FavoriteStore {
    settings: FavoriteSettings,
    store: JsonFileStore,
    favorites: FavoritesDoc,
    last_fetched: HashMap<UserKey, LastFetched>,
    pending: HashMap<UserKey, PendingDelete>,
    dirty: bool,
}

fn expired(since: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    (now - since).to_std().unwrap_or(Duration::ZERO) > timeout
}

impl FavoriteStore {
    /// Empty store; nothing is read until [`load`](Self::load).
    pub fn new(settings: FavoriteSettings, store: JsonFileStore) -> Self {
        Self {
            settings,
            store,
            favorites: BTreeMap::new(),
            last_fetched: HashMap::new(),
            pending: HashMap::new(),
            dirty: false,
        }
    }

    pub fn open(settings: FavoriteSettings, store: JsonFileStore) -> Self {
        let mut s = Self::new(settings, store);
        s.load();
        s
    }

    /// Replace in-memory favorites with what is on disk. Returns the number
    /// of users loaded; unreadable files yield an empty store.
    pub fn load(&mut self) -> usize {
        self.favorites = self.store.load_or_default::<FavoritesDoc>();
        self.dirty = false;
        let users = self.favorites.len();
        info!(
            users,
            records = self.favorites.values().map(Vec::len).sum::<usize>(),
            "favorites loaded"
        );
        users
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn count(&self, user: &UserKey) -> usize {
        self.favorites.get(user).map(Vec::len).unwrap_or(0)
    }

    // ---- staging slot ----

    pub fn set_last_fetched(&mut self, user: &UserKey, sentence: Sentence) {
        self.set_last_fetched_at(user, sentence, Utc::now());
    }

    pub fn set_last_fetched_at(&mut self, user: &UserKey, sentence: Sentence, now: DateTime<Utc>) {
        self.last_fetched.insert(
            user.clone(),
            LastFetched {
                sentence,
                served_at: now,
            },
        );
    }

    /// The staged sentence, if still inside the favorite window.
    pub fn last_fetched_at(&self, user: &UserKey, now: DateTime<Utc>) -> Option<&Sentence> {
        self.last_fetched
            .get(user)
            .filter(|l| !expired(l.served_at, now, self.settings.favorite_timeout))
            .map(|l| &l.sentence)
    }

    // ---- favorites ----

    pub fn add_favorite(&mut self, user: &UserKey) -> Result<FavoriteRecord> {
        self.add_favorite_at(user, Utc::now())
    }

    pub fn add_favorite_at(&mut self, user: &UserKey, now: DateTime<Utc>) -> Result<FavoriteRecord> {
        let sentence = self
            .last_fetched_at(user, now)
            .cloned()
            .ok_or(Error::NoRecentSentence)?;

        let list = self.favorites.get(user).map(Vec::as_slice).unwrap_or(&[]);
        if list.iter().any(|r| r.is_same_quotation(&sentence)) {
            return Err(Error::AlreadyFavorited);
        }
        if list.len() >= self.settings.max_per_user {
            return Err(Error::QuotaExceeded {
                max: self.settings.max_per_user,
            });
        }

        let record = FavoriteRecord::from_sentence(&sentence, now);
        self.favorites
            .entry(user.clone())
            .or_default()
            .push(record.clone());
        info!(user = %user, id = sentence.id, "favorite added");
        self.persist();
        Ok(record)
    }

    /// One page of a user's favorites. Pages are 1-based; an empty list has
    /// exactly one (empty) page.
    pub fn list_favorites(&self, user: &UserKey, page: usize) -> Result<FavoritePage> {
        let list = self.favorites.get(user).map(Vec::as_slice).unwrap_or(&[]);
        let size = self.settings.page_size;
        let total = list.len();
        let total_pages = total.div_ceil(size).max(1);

        if page < 1 || page > total_pages {
            return Err(Error::InvalidPage { page, total_pages });
        }

        let start = (page - 1) * size;
        let items = list
            .iter()
            .enumerate()
            .skip(start)
            .take(size)
            .map(|(i, r)| (i + 1, r.clone()))
            .collect();

        Ok(FavoritePage {
            page,
            total_pages,
            total,
            items,
        })
    }

    pub fn view_favorite(&self, user: &UserKey, index: usize) -> Result<FavoriteRecord> {
        let list = self.favorites.get(user).map(Vec::as_slice).unwrap_or(&[]);
        index
            .checked_sub(1)
            .and_then(|i| list.get(i))
            .cloned()
            .ok_or(Error::InvalidIndex {
                index,
                len: list.len(),
            })
    }

    /// Remove the record at 1-based `index` without confirmation.
    /// Clears any pending delete for the user, since indices shift.
    pub fn remove_favorite(&mut self, user: &UserKey, index: usize) -> Result<FavoriteRecord> {
        let len = self.count(user);
        if index < 1 || index > len {
            return Err(Error::InvalidIndex { index, len });
        }

        let Some(list) = self.favorites.get_mut(user) else {
            return Err(Error::InvalidIndex { index, len });
        };
        let record = list.remove(index - 1);
        if list.is_empty() {
            self.favorites.remove(user);
        }
        self.pending.remove(user);

        info!(user = %user, index, "favorite removed");
        self.persist();
        Ok(record)
    }

    // ---- two-phase delete ----

    pub fn request_delete(&mut self, user: &UserKey, index: usize) -> Result<DeleteOutcome> {
        self.request_delete_at(user, index, Utc::now())
    }

    pub fn request_delete_at(
        &mut self,
        user: &UserKey,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<DeleteOutcome> {
        let record = self.view_favorite(user, index)?;
        let timeout = self.settings.delete_confirm_timeout;

        let confirmed = self
            .pending
            .get(user)
            .is_some_and(|p| p.index == index && !expired(p.requested_at, now, timeout));

        if confirmed {
            let record = self.remove_favorite(user, index)?;
            return Ok(DeleteOutcome::Deleted { index, record });
        }

        // Absent, expired, or another index: last request wins.
        if let Some(prev) = self.pending.insert(
            user.clone(),
            PendingDelete {
                index,
                requested_at: now,
            },
        ) {
            debug!(user = %user, from = prev.index, to = index, "pending delete replaced");
        }

        Ok(DeleteOutcome::ConfirmRequired {
            index,
            record,
            expires_in: timeout,
        })
    }

    pub fn has_pending_delete(&self, user: &UserKey) -> bool {
        self.pending.contains_key(user)
    }

    // ---- housekeeping ----

    /// Drop expired staging slots and pending deletes. Returns
    /// `(last_fetched_removed, pending_removed)`.
    pub fn purge_expired(&mut self) -> (usize, usize) {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let s = self.settings;

        let before = self.last_fetched.len();
        self.last_fetched
            .retain(|_, l| !expired(l.served_at, now, s.favorite_timeout));
        let staged = before - self.last_fetched.len();

        let before = self.pending.len();
        self.pending
            .retain(|_, p| !expired(p.requested_at, now, s.delete_confirm_timeout));
        let pending = before - self.pending.len();

        (staged, pending)
    }

    /// Write the full favorites table now.
    pub fn flush(&mut self) -> Result<()> {
        match self.store.save(&self.favorites) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                Err(e)
            }
        }
    }

    /// Retry a previously failed write. Returns whether anything was written.
    pub fn autosave(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.flush()?;
        info!(path = %self.store.path().display(), "favorites autosaved");
        Ok(true)
    }

    fn persist(&mut self) {
        if let Err(e) = self.flush() {
            error!(
                path = %self.store.path().display(),
                "favorites write failed, keeping in-memory state: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::sentence::{sample, Category};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn settings(page_size: usize, max_per_user: usize) -> FavoriteSettings {
        FavoriteSettings {
            page_size,
            favorite_timeout: Duration::from_secs(30),
            max_per_user,
            delete_confirm_timeout: Duration::from_secs(60),
        }
    }

    fn store_in(dir: &tempfile::TempDir, s: FavoriteSettings) -> FavoriteStore {
        FavoriteStore::open(s, JsonFileStore::new(dir.path().join("favorites.json")))
    }

    fn alice() -> UserKey {
        UserKey::new("qq", "alice")
    }

    fn seed(store: &mut FavoriteStore, user: &UserKey, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            store.set_last_fetched_at(user, sample(id, Category::Poetry), t0());
            store.add_favorite_at(user, t0()).unwrap();
        }
    }

    #[test]
    fn add_favorite_once_then_already_favorited() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();

        s.set_last_fetched_at(&u, sample(1, Category::Anime), t0());
        let rec = s.add_favorite_at(&u, t0() + secs(5)).unwrap();
        assert_eq!(rec.content, "sentence number 1");
        assert_eq!(rec.category_name, "Anime");
        assert!(matches!(
            s.add_favorite_at(&u, t0() + secs(6)),
            Err(Error::AlreadyFavorited)
        ));
        assert_eq!(s.count(&u), 1);
    }

    #[test]
    fn add_favorite_requires_fresh_staging_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();

        assert!(matches!(s.add_favorite_at(&u, t0()), Err(Error::NoRecentSentence)));

        s.set_last_fetched_at(&u, sample(1, Category::Anime), t0());
        assert!(matches!(
            s.add_favorite_at(&u, t0() + secs(31)),
            Err(Error::NoRecentSentence)
        ));
        // Exactly at the timeout is still inside the window.
        assert!(s.add_favorite_at(&u, t0() + secs(30)).is_ok());
    }

    #[test]
    fn quota_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 2));
        let u = alice();
        seed(&mut s, &u, [1, 2]);

        s.set_last_fetched_at(&u, sample(3, Category::Anime), t0());
        assert!(matches!(
            s.add_favorite_at(&u, t0()),
            Err(Error::QuotaExceeded { max: 2 })
        ));
    }

    #[test]
    fn users_on_different_platforms_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let qq = UserKey::new("qq", "1");
        let tg = UserKey::new("telegram", "1");

        s.set_last_fetched_at(&qq, sample(1, Category::Anime), t0());
        s.add_favorite_at(&qq, t0()).unwrap();
        assert!(matches!(s.add_favorite_at(&tg, t0()), Err(Error::NoRecentSentence)));
        assert_eq!(s.count(&tg), 0);
    }

    #[test]
    fn pagination_twelve_by_five() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(5, 100));
        let u = alice();
        seed(&mut s, &u, 1..=12);

        let p1 = s.list_favorites(&u, 1).unwrap();
        assert_eq!(p1.total_pages, 3);
        assert_eq!(p1.items.len(), 5);
        assert_eq!(p1.items[0].0, 1);

        let p3 = s.list_favorites(&u, 3).unwrap();
        assert_eq!(p3.items.len(), 2);
        assert_eq!(p3.items[1].0, 12);

        assert!(matches!(
            s.list_favorites(&u, 4),
            Err(Error::InvalidPage { page: 4, total_pages: 3 })
        ));
        assert!(matches!(s.list_favorites(&u, 0), Err(Error::InvalidPage { .. })));
    }

    #[test]
    fn empty_list_has_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let s = store_in(&dir, settings(5, 100));
        let page = s.list_favorites(&alice(), 1).unwrap();
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
        assert!(s.list_favorites(&alice(), 2).is_err());
    }

    #[test]
    fn delete_confirmation_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();
        seed(&mut s, &u, 1..=6);

        let out = s.request_delete_at(&u, 3, t0()).unwrap();
        assert!(matches!(out, DeleteOutcome::ConfirmRequired { index: 3, .. }));

        let out = s.request_delete_at(&u, 5, t0() + secs(1)).unwrap();
        match out {
            DeleteOutcome::ConfirmRequired { index, record, .. } => {
                assert_eq!(index, 5);
                assert_eq!(record.content, "sentence number 5");
            }
            other => panic!("expected confirmation, got {other:?}"),
        }

        let out = s.request_delete_at(&u, 5, t0() + secs(2)).unwrap();
        match out {
            DeleteOutcome::Deleted { index, record } => {
                assert_eq!(index, 5);
                assert_eq!(record.content, "sentence number 5");
            }
            other => panic!("expected delete, got {other:?}"),
        }
        assert_eq!(s.count(&u), 5);
        assert!(!s.has_pending_delete(&u));
        // Re-indexed: the old 6th is now 5th.
        assert_eq!(s.view_favorite(&u, 5).unwrap().content, "sentence number 6");
    }

    #[test]
    fn expired_pending_delete_asks_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();
        seed(&mut s, &u, 1..=2);

        s.request_delete_at(&u, 1, t0()).unwrap();
        let out = s.request_delete_at(&u, 1, t0() + secs(61)).unwrap();
        assert!(matches!(out, DeleteOutcome::ConfirmRequired { index: 1, .. }));
        assert_eq!(s.count(&u), 2);

        let out = s.request_delete_at(&u, 1, t0() + secs(62)).unwrap();
        assert!(matches!(out, DeleteOutcome::Deleted { index: 1, .. }));
    }

    #[test]
    fn out_of_range_delete_leaves_pending_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();
        seed(&mut s, &u, 1..=2);

        s.request_delete_at(&u, 2, t0()).unwrap();
        assert!(matches!(
            s.request_delete_at(&u, 9, t0()),
            Err(Error::InvalidIndex { index: 9, len: 2 })
        ));
        assert!(matches!(
            s.request_delete_at(&u, 0, t0()),
            Err(Error::InvalidIndex { index: 0, .. })
        ));
        let out = s.request_delete_at(&u, 2, t0() + secs(1)).unwrap();
        assert!(matches!(out, DeleteOutcome::Deleted { index: 2, .. }));
    }

    #[test]
    fn save_and_reload_yields_identical_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let a = alice();
        let b = UserKey::new("discord", "bob");
        seed(&mut s, &a, [1, 2, 3]);
        seed(&mut s, &b, [7]);
        s.remove_favorite(&a, 2).unwrap();

        let reopened = store_in(&dir, settings(10, 100));
        for user in [&a, &b] {
            let before = s.list_favorites(user, 1).unwrap();
            let after = reopened.list_favorites(user, 1).unwrap();
            assert_eq!(before, after);
        }
        assert_eq!(reopened.count(&a), 2);
    }

    #[test]
    fn failed_write_keeps_memory_and_marks_dirty() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so every save fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let mut s = FavoriteStore::new(
            settings(10, 100),
            JsonFileStore::new(blocker.join("favorites.json")),
        );
        let u = alice();

        s.set_last_fetched_at(&u, sample(1, Category::Anime), t0());
        assert!(s.add_favorite_at(&u, t0()).is_ok());
        assert_eq!(s.count(&u), 1);
        assert!(s.is_dirty());
        assert!(s.autosave().is_err());
        assert!(s.is_dirty());
    }

    #[test]
    fn autosave_only_writes_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        assert!(!s.autosave().unwrap());
        s.dirty = true;
        assert!(s.autosave().unwrap());
        assert!(!s.is_dirty());
    }

    #[test]
    fn purge_drops_expired_staging_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store_in(&dir, settings(10, 100));
        let u = alice();
        let v = UserKey::new("qq", "bob");
        seed(&mut s, &u, [1]);
        s.request_delete_at(&u, 1, t0()).unwrap();
        s.set_last_fetched_at(&v, sample(2, Category::Anime), t0() + secs(40));

        let (staged, pending) = s.purge_expired_at(t0() + secs(61));
        assert_eq!((staged, pending), (1, 1));
        assert!(s.last_fetched_at(&v, t0() + secs(61)).is_some());
        assert!(!s.has_pending_delete(&u));
    }
}
