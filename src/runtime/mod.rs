//! Runtime orchestration.

pub mod event_loop;

pub use event_loop::{ActiveObject, Completion, CompletionPort, EventLoop, ObjectId};
