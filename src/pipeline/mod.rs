pub mod dispatcher;
pub mod pattern;
pub mod persistence;
pub mod store;

pub use dispatcher::{DispatchedBatch, StepDispatcher};
pub use pattern::{Pattern, PatternId, PatternRecord, Step};
pub use store::PatternStore;
