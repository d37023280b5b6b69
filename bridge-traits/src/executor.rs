//! Reply context marshaling.
//!
//! Many host transports only accept replies on one designated context (a UI
//! thread, an event loop). The bridge never touches a [`MethodResult`]
//! directly from a worker; it posts the delivery through a [`ReplyExecutor`].
//!
//! [`MethodResult`]: crate::channel::MethodResult

/// Unit of work posted to a [`ReplyExecutor`].
pub type ReplyJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs reply jobs on the context the host transport requires.
pub trait ReplyExecutor: Send + Sync {
    /// Schedules `job` on the reply context.
    ///
    /// Implementations must run every accepted job exactly once. A job that
    /// can no longer be scheduled (the context shut down) is dropped.
    fn execute(&self, job: ReplyJob);
}

/// Executor that runs jobs on the calling thread.
///
/// Suitable for transports that are thread-agnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl ReplyExecutor for InlineExecutor {
    fn execute(&self, job: ReplyJob) {
        job();
    }
}
