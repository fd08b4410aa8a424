//! The one error taxonomy surfaced outside a handler.
//!
//! Deep code returns `anyhow::Result`; before anything reaches the user it is
//! folded into a `CoreError`, and every recoverable member maps to a fixed
//! Russian reply template. Raw store/adapter messages never leave the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The model adapter did not answer within the configured window.
    #[error("intent parsing timed out")]
    IntentTimeout,

    /// The model answered, but not with JSON we could parse (after one
    /// strict-JSON retry).
    #[error("intent parse failed")]
    IntentParse,

    /// The JSON parsed but failed shape or semantic validation.
    #[error("intent invalid: {0}")]
    IntentInvalid(String),

    /// The intent referenced an entity id or ordinal that does not resolve.
    #[error("unknown entity reference: {0}")]
    UnknownEntity(String),

    /// Transient store failure that survived its retry.
    #[error("store unavailable")]
    StoreTransient(#[source] anyhow::Error),

    /// Unique/link constraint violation; the write did not happen.
    #[error("store constraint: {0}")]
    StoreConstraint(String),

    /// Auto-placement failed; the goal exists but steps stay unscheduled.
    #[error("scheduler placement failed: {0}")]
    PlacementFailed(String),

    /// Outbound send to the transport gateway failed.
    #[error("transport send failed")]
    TransportSend(#[source] anyhow::Error),

    /// The per-request deadline elapsed; nothing was committed.
    #[error("request deadline elapsed")]
    Deadline,

    /// Bad configuration. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Store unreachable during startup probe. Fatal.
    #[error("store unreachable at startup: {0}")]
    StartupStoreUnreachable(String),
}

impl CoreError {
    /// Fixed user-facing reply for recoverable members. Fatal members return
    /// `None` — they terminate the process instead of answering a chat turn.
    pub fn user_reply(&self) -> Option<&'static str> {
        match self {
            CoreError::IntentTimeout | CoreError::Deadline => {
                Some("Я не успел обработать запрос. Попробуй ещё раз чуть позже.")
            }
            CoreError::IntentParse | CoreError::IntentInvalid(_) => {
                Some("Извини, не могу понять запрос. Попробуй переформулировать.")
            }
            CoreError::UnknownEntity(_) => {
                Some("Я не нашёл то, о чём ты говоришь. Уточни, пожалуйста, какой пункт имеется в виду.")
            }
            CoreError::StoreTransient(_) => {
                Some("Упс, произошла ошибка. Попробуй ещё раз.")
            }
            CoreError::StoreConstraint(_) => {
                Some("Шаг с таким номером уже существует. Попробуй другой номер.")
            }
            CoreError::PlacementFailed(_) => {
                Some("Цель сохранена, но расписание составить не удалось. Шаги остались без дат.")
            }
            CoreError::TransportSend(_) => {
                Some("Не удалось отправить ответ. Попробуй ещё раз.")
            }
            CoreError::Config(_) | CoreError::StartupStoreUnreachable(_) => None,
        }
    }

    /// Process exit code for fatal members.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CoreError::Config(_) => Some(1),
            CoreError::StartupStoreUnreachable(_) => Some(2),
            _ => None,
        }
    }

    /// Whether a retry at the adapter layer makes sense. Intent-shape errors
    /// never do; transient I/O does.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StoreTransient(_) | CoreError::TransportSend(_)
        )
    }
}

/// Classify an sqlx error: unique/foreign-key violations become
/// `StoreConstraint`, everything else is transient.
pub fn classify_store_error(e: sqlx::Error) -> CoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            CoreError::StoreConstraint(db.message().to_string())
        }
        _ => CoreError::StoreTransient(anyhow::Error::new(e)),
    }
}

/// Same classification for store errors that crossed an `anyhow` boundary.
pub fn classify_anyhow_store(e: anyhow::Error) -> CoreError {
    match e.downcast::<sqlx::Error>() {
        Ok(sql) => classify_store_error(sql),
        Err(other) => CoreError::StoreTransient(other),
    }
}
