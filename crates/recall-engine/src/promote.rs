use crate::EngineError;
use recall_core::{Lesson, LessonId, Tier};
use recall_storage::{LessonStore, StoreError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub from: LessonId,
    pub lesson: Lesson,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    ProjectWrite,
    ProjectWriteAndRollback,
}

/// Moves project records into the system tier. Both stores stay locked for
/// the whole move, project first.
pub struct Promoter<'a> {
    project: &'a LessonStore,
    system: &'a LessonStore,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl<'a> Promoter<'a> {
    pub fn new(project: &'a LessonStore, system: &'a LessonStore) -> Self {
        Self {
            project,
            system,
            #[cfg(test)]
            fault: None,
        }
    }

    pub fn promote(&self, id: LessonId) -> Result<Promotion, EngineError> {
        if id.tier != Tier::Project {
            return Err(StoreError::TierMismatch {
                id,
                tier: Tier::Project,
            }
            .into());
        }

        let project_guard = self.project.lock()?;
        let system_guard = self.system.lock()?;

        let mut project_doc = project_guard.read()?;
        let source = project_doc
            .remove(id)
            .ok_or(StoreError::NotFound(id))?;

        let mut system_doc = system_guard.read()?;
        let lesson = Lesson {
            id: system_doc.allocate_id(),
            ..source
        };
        system_doc.lessons.push(lesson.clone());
        system_guard.write(&system_doc)?;

        if let Err(err) = self.write_project(&project_guard, &project_doc) {
            warn!(
                event = "promotion_rolling_back",
                from = %id,
                to = %lesson.id,
                error = %err
            );
            system_doc.remove(lesson.id);
            if let Err(rollback_err) = self.write_rollback(&system_guard, &system_doc) {
                error!(
                    event = "promotion_incomplete",
                    from = %id,
                    to = %lesson.id,
                    error = %rollback_err
                );
                return Err(EngineError::PromotionIncomplete {
                    from: id,
                    to: lesson.id,
                    cause: rollback_err.to_string(),
                });
            }
            return Err(EngineError::PromotionRolledBack { id, source: err });
        }

        info!(event = "lesson_promoted", from = %id, to = %lesson.id);
        Ok(Promotion { from: id, lesson })
    }

    fn write_project(
        &self,
        guard: &recall_storage::StoreGuard<'_>,
        document: &recall_core::LessonDocument,
    ) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.fault.is_some() {
            return Err(injected_fault());
        }
        guard.write(document)
    }

    fn write_rollback(
        &self,
        guard: &recall_storage::StoreGuard<'_>,
        document: &recall_core::LessonDocument,
    ) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.fault == Some(Fault::ProjectWriteAndRollback) {
            return Err(injected_fault());
        }
        guard.write(document)
    }
}

#[cfg(test)]
fn injected_fault() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "injected write failure",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use recall_core::{Category, LessonDraft};
    use tempfile::{tempdir, TempDir};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).expect("valid date")
    }

    fn stores() -> (TempDir, LessonStore, LessonStore) {
        let dir = tempdir().expect("tempdir");
        let project = LessonStore::new(Tier::Project, dir.path().join("p/LESSONS.md"));
        let system = LessonStore::new(Tier::System, dir.path().join("s/LESSONS.md"));
        (dir, project, system)
    }

    fn seed(project: &LessonStore, system: &LessonStore) -> LessonId {
        for title in ["a", "b"] {
            project
                .add(LessonDraft::new(Category::Decision, title, "x"), day(1))
                .expect("add");
        }
        system
            .add(LessonDraft::new(Category::Pattern, "sys", "y"), day(1))
            .expect("add system");
        let target = project
            .add(LessonDraft::new(Category::Gotcha, "move me", "body\nline"), day(2))
            .expect("add target");
        for _ in 0..3 {
            project.cite(target.id, day(4)).expect("cite");
        }
        target.id
    }

    #[test]
    fn moves_record_and_carries_reputation() {
        let (_dir, project, system) = stores();
        let id = seed(&project, &system);

        let promotion = Promoter::new(&project, &system).promote(id).expect("promote");

        assert_eq!(promotion.from, id);
        assert_eq!(promotion.lesson.id.to_string(), "S002");
        assert_eq!(promotion.lesson.uses, 4);
        assert_eq!(promotion.lesson.last_used, day(4));
        assert_eq!(promotion.lesson.content, "body\nline");
        assert!(project.get(id).expect_err("gone").is_not_found());
        assert_eq!(system.get(promotion.lesson.id).expect("present"), promotion.lesson);
    }

    #[test]
    fn unknown_and_system_ids_are_rejected() {
        let (_dir, project, system) = stores();
        seed(&project, &system);
        let promoter = Promoter::new(&project, &system);

        let missing = promoter
            .promote(LessonId::new(Tier::Project, 77))
            .expect_err("missing");
        assert!(missing.is_not_found());

        let wrong_tier = promoter
            .promote(LessonId::new(Tier::System, 1))
            .expect_err("system id");
        assert!(matches!(
            wrong_tier,
            EngineError::Storage(StoreError::TierMismatch { .. })
        ));
        assert_eq!(system.lessons().expect("system").len(), 1);
    }

    #[test]
    fn failed_project_write_rolls_back_system_insert() {
        let (_dir, project, system) = stores();
        let id = seed(&project, &system);
        let mut promoter = Promoter::new(&project, &system);
        promoter.fault = Some(Fault::ProjectWrite);

        let err = promoter.promote(id).expect_err("fault");

        assert!(matches!(err, EngineError::PromotionRolledBack { .. }));
        assert_eq!(project.get(id).expect("still in project").uses, 4);
        let system_ids: Vec<String> = system
            .lessons()
            .expect("system")
            .iter()
            .map(|lesson| lesson.id.to_string())
            .collect();
        assert_eq!(system_ids, vec!["S001"]);
    }

    #[test]
    fn failed_rollback_is_reported_as_incomplete() {
        let (_dir, project, system) = stores();
        let id = seed(&project, &system);
        let mut promoter = Promoter::new(&project, &system);
        promoter.fault = Some(Fault::ProjectWriteAndRollback);

        let err = promoter.promote(id).expect_err("fault");

        match err {
            EngineError::PromotionIncomplete { from, to, .. } => {
                assert_eq!(from, id);
                assert_eq!(to.to_string(), "S002");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
