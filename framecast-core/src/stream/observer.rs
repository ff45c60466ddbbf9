//! Callbacks from the consumer-side core into the application.

use crate::error::StreamError;
use crate::frame::Frame;
use crate::state::{ConnectionState, DisconnectReason};

/// Receives notifications from a [`ReconnectController`].
///
/// Every method is called from the controller's I/O task, so
/// implementations must return quickly and hand real work off to their
/// own task or thread (a channel send, a `watch` update, ...).
///
/// [`ReconnectController`]: crate::state::ReconnectController
pub trait StreamObserver: Send + Sync + 'static {
    /// A complete frame arrived. It has also been offered to the
    /// controller's frame queue.
    fn on_frame_ready(&self, _frame: &Frame) {}

    fn on_state_changed(&self, _state: &ConnectionState) {}

    /// A session-level failure. The controller handles it by changing
    /// state; this is informational.
    fn on_error(&self, _error: &StreamError) {}

    /// The controller reached `Disconnected` and will not retry on its own.
    fn on_disconnected(&self, _reason: DisconnectReason) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
