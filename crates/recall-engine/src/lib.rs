use recall_core::LessonId;
use recall_storage::StoreError;
use thiserror::Error;

pub mod decay;
pub mod inject;
pub mod promote;

pub use decay::{maybe_decay, DecayConfig, DecayOutcome};
pub use inject::{inject, DEFAULT_INJECT_COUNT};
pub use promote::{Promoter, Promotion};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("promotion of {id} rolled back: {source}")]
    PromotionRolledBack {
        id: LessonId,
        #[source]
        source: StoreError,
    },
    #[error("promotion of {from} is incomplete: {to} was added to the system store and could not be removed ({cause})")]
    PromotionIncomplete {
        from: LessonId,
        to: LessonId,
        cause: String,
    },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Storage(err) if err.is_not_found())
    }
}
