//! Shared domain types + core interfaces (traits) used across the codebase.
//!
//! This module is intentionally kept as a thin re-export layer so that:
//! - `crate::traits::*` remains stable for call sites
//! - adding/changing one area (e.g. store traits) doesn't cause a full-file rebuild

mod analytics;
mod domain;
mod model;
mod speech;
mod store;
mod transport;

pub use analytics::AnalyticsSink;
pub use domain::{
    Event, EventType, Goal, GoalStatus, GoalWithSteps, Priority, Role, SessionRecord, Step,
    StepStatus, StoredMessage, UserProfile,
};
pub use model::{ModelAdapter, ModelError, ModelRequest};
pub use speech::SpeechToText;
pub use store::{
    ConversationStore, DedupStore, EventFilter, EventPatch, EventStore, GoalDraft, GoalPatch,
    GoalStore, NewEvent, NewMessage, NewStep, SessionStore, Store, StepPatch, StepPlacement,
    UserStore,
};
pub use transport::Transport;

/// Import in modules that call store methods on `dyn Store`: the facade is a
/// supertrait, but method-call syntax still needs the defining traits in
/// scope.
pub mod store_prelude {
    #![allow(unused_imports)]
    pub use super::{
        ConversationStore, DedupStore, EventStore, GoalStore, SessionStore, Store, UserStore,
    };
}
