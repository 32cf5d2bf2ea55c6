//! Domain-worker contract and the built-in extractor implementations.
//!
//! A worker is the pluggable body of one domain sub-task. The engine calls
//! [`Worker::run`] on an executor thread with a per-sub-task context; the
//! context carries the cooperative interrupt token, the request deadline,
//! and the reporting surface for intermediate events.

pub mod art;
pub mod parse;
pub mod thumbnail;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::PreparserConfig;
use crate::item::{Attachment, InputItem, Picture};
use crate::protocol::{Domain, SeekArg, TaskStatus};
use crate::request::Request;

pub use art::{LocalArtWorker, NetArtWorker};
pub use parse::TagParseWorker;
pub use thumbnail::ArtThumbnailWorker;

/// Body of one domain sub-task.
///
/// Implementations must poll [`WorkerContext::cancellation_status`] between
/// work steps and bail out promptly once it reports a status; raising the
/// interrupt token is the engine's only way to stop a running worker. A
/// worker that already finished its work may ignore a late interrupt; its
/// natural outcome wins.
pub trait Worker: Send + Sync {
    fn run(&self, ctx: &WorkerContext) -> TaskStatus;
}

/// Per-sub-task environment handed to [`Worker::run`].
pub struct WorkerContext {
    item: Arc<InputItem>,
    domain: Domain,
    interact: bool,
    want_subitems: bool,
    seek: SeekArg,
    deadline: Option<Instant>,
    interrupt: Arc<AtomicBool>,
    request: Arc<Request>,
}

impl WorkerContext {
    pub(crate) fn new(
        item: Arc<InputItem>,
        domain: Domain,
        interact: bool,
        want_subitems: bool,
        seek: SeekArg,
        deadline: Option<Instant>,
        interrupt: Arc<AtomicBool>,
        request: Arc<Request>,
    ) -> Self {
        Self {
            item,
            domain,
            interact,
            want_subitems,
            seek,
            deadline,
            interrupt,
            request,
        }
    }

    pub fn item(&self) -> &Arc<InputItem> {
        &self.item
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Whether the caller allowed user interaction for this request.
    pub fn interact(&self) -> bool {
        self.interact
    }

    /// Whether the caller asked for container expansion into subitems.
    pub fn want_subitems(&self) -> bool {
        self.want_subitems
    }

    /// Seek descriptor of a thumbnail request; default for other domains.
    pub fn seek(&self) -> SeekArg {
        self.seek
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn deadline_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Terminal status the worker should return right away, if any.
    /// Interruption takes priority over the deadline since an interrupt is
    /// usually the engine reacting to the deadline already.
    pub fn cancellation_status(&self) -> Option<TaskStatus> {
        if self.is_interrupted() {
            Some(TaskStatus::Interrupted)
        } else if self.deadline_expired() {
            Some(TaskStatus::Timeout)
        } else {
            None
        }
    }

    /// Publishes newly discovered subitems on the item and notifies the
    /// request's subitem callback. Intermediate notifications of one request
    /// are serialized and always precede the terminal callback.
    pub fn report_subitems(&self, new_subitems: Vec<Arc<InputItem>>) {
        if new_subitems.is_empty() {
            return;
        }
        self.item.add_subitems(&new_subitems);
        self.request.notify_subitems_added(&new_subitems);
    }

    /// Publishes attachments on the item and notifies the request's
    /// attachment callback.
    pub fn report_attachments(&self, attachments: Vec<Attachment>) {
        if attachments.is_empty() {
            return;
        }
        self.item.add_attachments(attachments);
        self.request.notify_attachments_added();
    }

    /// Deposits the produced thumbnail. The engine hands it to the terminal
    /// callback only when the aggregate request status is `Ok`.
    pub fn submit_picture(&self, picture: Picture) {
        self.request.store_picture(Arc::new(picture));
    }
}

/// One worker per domain, wired into the engine at construction.
#[derive(Clone, Default)]
pub struct WorkerSet {
    slots: [Option<Arc<dyn Worker>>; 4],
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `worker` for `domain`, replacing any previous registration.
    pub fn with(mut self, domain: Domain, worker: Arc<dyn Worker>) -> Self {
        self.slots[domain.index()] = Some(worker);
        self
    }

    /// Built-in extractors for every domain: lofty-backed tag parsing,
    /// local/remote artwork fetching, and artwork thumbnailing.
    pub fn defaults(config: &PreparserConfig) -> Self {
        Self::new()
            .with(Domain::Parse, Arc::new(TagParseWorker::new()))
            .with(Domain::FetchMetaLocal, Arc::new(LocalArtWorker::new()))
            .with(Domain::FetchMetaNet, Arc::new(NetArtWorker::new()))
            .with(
                Domain::Thumbnail,
                Arc::new(ArtThumbnailWorker::new(config.thumbnail_max_edge_px)),
            )
    }

    pub(crate) fn get(&self, domain: Domain) -> Option<&Arc<dyn Worker>> {
        self.slots[domain.index()].as_ref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context construction helpers shared by the worker test modules.

    use super::*;
    use crate::item::ParseCallbacks;
    use crate::request::RequestSink;

    struct NoopParseCallbacks;

    impl ParseCallbacks for NoopParseCallbacks {
        fn on_preparse_ended(&self, _item: &Arc<InputItem>, _status: TaskStatus) {}
    }

    fn build(
        item: Arc<InputItem>,
        domain: Domain,
        want_subitems: bool,
        seek: SeekArg,
        interrupted: bool,
    ) -> (WorkerContext, Arc<Request>) {
        let request = Request::new(
            1,
            Arc::clone(&item),
            RequestSink::Parse(Arc::new(NoopParseCallbacks)),
            1,
        );
        let ctx = WorkerContext::new(
            item,
            domain,
            false,
            want_subitems,
            seek,
            None,
            Arc::new(AtomicBool::new(interrupted)),
            Arc::clone(&request),
        );
        (ctx, request)
    }

    pub(crate) fn context(
        item: Arc<InputItem>,
        domain: Domain,
        want_subitems: bool,
        seek: SeekArg,
    ) -> (WorkerContext, Arc<Request>) {
        build(item, domain, want_subitems, seek, false)
    }

    pub(crate) fn interrupted_context(
        item: Arc<InputItem>,
        domain: Domain,
        seek: SeekArg,
    ) -> (WorkerContext, Arc<Request>) {
        build(item, domain, false, seek, true)
    }
}
