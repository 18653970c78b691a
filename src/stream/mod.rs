//! Streaming response rendering.
//!
//! - `events`: the interleaved event stream produced by the agent
//! - `dispatcher`: routes events to per-index render slots
//! - `surface`: the render operations and their channel-backed implementation

pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod surface;

pub use dispatcher::{Slot, StreamDispatcher, ToolPhase};
pub use errors::{DispatchError, SurfaceClosed};
pub use events::{ReasoningChunk, StreamEvent};
pub use surface::{ChannelSurface, MessageKind, RenderId, RenderSurface, UiEvent};
