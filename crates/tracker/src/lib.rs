//! Tool-invocation lifecycle tracking and the renderer-facing view of it.
//!
//! Feed every [`proto::InvocationUpdate`] to a [`LifecycleTracker`] in the
//! order it was emitted; read back entries or [`InvocationView`]s.

pub mod state;
pub mod tracker;
pub mod view;

pub use state::InvocationState;
pub use tracker::{InvocationEntry, LifecycleTracker, Moment, Screenshots, Transition};
pub use view::{InvocationView, RenderContext, Status, ToolKind};
