use crate::lock::{lock_path_for, LockPolicy, StoreLock};
use crate::{write_atomic, StoreError};
use chrono::NaiveDate;
use recall_core::{
    decode, encode, normalize_title, Category, Lesson, LessonDocument, LessonDraft, LessonId,
    ParseError, Tier,
};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonFilter {
    pub category: Option<Category>,
    pub search: Option<String>,
    /// Only single-use lessons whose last use is older than this many days.
    pub stale_days: Option<i64>,
}

impl LessonFilter {
    pub fn matches(&self, lesson: &Lesson, today: NaiveDate) -> bool {
        if let Some(category) = self.category {
            if lesson.category != category {
                return false;
            }
        }
        if let Some(query) = self.search.as_deref().filter(|q| !q.trim().is_empty()) {
            if !lesson.matches(query.trim()) {
                return false;
            }
        }
        if let Some(days) = self.stale_days {
            if !lesson.is_stale(today, days) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonPatch {
    pub content: Option<String>,
    pub title: Option<String>,
    pub category: Option<Category>,
}

impl LessonPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// One tier's lesson document on disk.
///
/// Mutations run as locked read-modify-rewrite cycles; reads take no lock.
#[derive(Debug, Clone)]
pub struct LessonStore {
    tier: Tier,
    path: PathBuf,
    lock_path: PathBuf,
    lock_policy: LockPolicy,
}

impl LessonStore {
    pub fn new(tier: Tier, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            tier,
            path,
            lock_path,
            lock_policy: LockPolicy::default(),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the document without locking. A read that hits unparseable
    /// fragments is retried once before the fragments are skipped.
    pub fn load(&self) -> Result<LessonDocument, StoreError> {
        let (document, skipped) = self.read_document()?;
        if skipped.is_empty() {
            return Ok(document);
        }

        debug!(
            event = "store_read_retry",
            path = %self.path.display(),
            skipped = skipped.len()
        );
        let (document, skipped) = self.read_document()?;
        self.report_skipped(&skipped);
        Ok(document)
    }

    pub fn lessons(&self) -> Result<Vec<Lesson>, StoreError> {
        Ok(self.load()?.lessons)
    }

    pub fn get(&self, id: LessonId) -> Result<Lesson, StoreError> {
        self.check_tier(id)?;
        self.load()?
            .find(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    pub fn list(&self, filter: &LessonFilter, today: NaiveDate) -> Result<Vec<Lesson>, StoreError> {
        Ok(self
            .lessons()?
            .into_iter()
            .filter(|lesson| filter.matches(lesson, today))
            .collect())
    }

    pub fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let lock = StoreLock::acquire(&self.lock_path, self.lock_policy)?;
        Ok(StoreGuard { store: self, _lock: lock })
    }

    /// Locked read-modify-rewrite. Nothing is written when `mutator` fails.
    pub fn update<T>(
        &self,
        mutator: impl FnOnce(&mut LessonDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.lock()?;
        let mut document = guard.read()?;
        let value = mutator(&mut document)?;
        guard.write(&document)?;
        Ok(value)
    }

    pub fn add(&self, draft: LessonDraft, today: NaiveDate) -> Result<Lesson, StoreError> {
        let lesson = self.update(|document| {
            let lesson = Lesson {
                id: document.allocate_id(),
                category: draft.category,
                title: normalize_title(&draft.title),
                content: draft.content,
                uses: 1,
                last_used: today,
                created: today,
            };
            document.lessons.push(lesson.clone());
            Ok(lesson)
        })?;
        debug!(event = "lesson_added", id = %lesson.id, path = %self.path.display());
        Ok(lesson)
    }

    pub fn cite(&self, id: LessonId, today: NaiveDate) -> Result<Lesson, StoreError> {
        self.check_tier(id)?;
        self.update(|document| {
            let lesson = document.find_mut(id).ok_or(StoreError::NotFound(id))?;
            lesson.uses = lesson.uses.saturating_add(1);
            lesson.last_used = today;
            Ok(lesson.clone())
        })
    }

    pub fn edit(&self, id: LessonId, patch: &LessonPatch) -> Result<Lesson, StoreError> {
        self.check_tier(id)?;
        self.update(|document| {
            let lesson = document.find_mut(id).ok_or(StoreError::NotFound(id))?;
            if let Some(content) = &patch.content {
                lesson.content = content.clone();
            }
            if let Some(title) = patch.title.as_deref().map(normalize_title) {
                if !title.is_empty() {
                    lesson.title = title;
                }
            }
            if let Some(category) = patch.category {
                lesson.category = category;
            }
            Ok(lesson.clone())
        })
    }

    pub fn delete(&self, id: LessonId) -> Result<Lesson, StoreError> {
        self.check_tier(id)?;
        self.update(|document| document.remove(id).ok_or(StoreError::NotFound(id)))
    }

    fn check_tier(&self, id: LessonId) -> Result<(), StoreError> {
        if id.tier == self.tier {
            Ok(())
        } else {
            Err(StoreError::TierMismatch {
                id,
                tier: self.tier,
            })
        }
    }

    fn read_document(&self) -> Result<(LessonDocument, Vec<ParseError>), StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok((LessonDocument::empty(self.tier), Vec::new()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(LessonDocument::from_decoded(self.tier, decode(&text)))
    }

    fn report_skipped(&self, skipped: &[ParseError]) {
        for fragment in skipped {
            warn!(
                event = "store_fragment_skipped",
                path = %self.path.display(),
                line = fragment.line,
                reason = %fragment.reason
            );
        }
    }
}

/// Holds the store lock; reads and writes through it are serialized with
/// every other mutator of the same store.
pub struct StoreGuard<'a> {
    store: &'a LessonStore,
    _lock: StoreLock,
}

impl StoreGuard<'_> {
    pub fn read(&self) -> Result<LessonDocument, StoreError> {
        let (document, skipped) = self.store.read_document()?;
        self.store.report_skipped(&skipped);
        Ok(document)
    }

    pub fn write(&self, document: &LessonDocument) -> Result<(), StoreError> {
        write_atomic(&self.store.path, encode(document).as_bytes())
    }
}
