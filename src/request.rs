//! Request records and the engine-wide request table.
//!
//! The table owns one `Arc` per live record from acceptance until the
//! terminal transition; each sub-task closure holds another, so a record
//! referenced by an in-flight worker outlives its table entry. Identifiers
//! are allocated monotonically and never reused within an engine lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::executor::SubTask;
use crate::item::{InputItem, ParseCallbacks, Picture, ThumbnailCallbacks};
use crate::protocol::{Domain, RequestId, TaskStatus, REQUEST_ID_INVALID};

/// Callback set of one request, per family.
pub(crate) enum RequestSink {
    Parse(Arc<dyn ParseCallbacks>),
    Thumbnail(Arc<dyn ThumbnailCallbacks>),
}

/// Mutable half of a request record, guarded by the per-record lock.
pub(crate) struct RequestState {
    /// Domain sub-tasks that have not reported an outcome yet.
    pub remaining: usize,
    /// Aggregate outcome, merged under the status precedence rules.
    pub status: TaskStatus,
    /// Set exactly once, in the terminal transition.
    pub terminal: bool,
    /// Set by cancel so acceptance stops submitting further sub-tasks.
    pub cancel_requested: bool,
    /// Sub-handles used for best-effort cancellation; cleared at terminal
    /// so records and sub-tasks do not keep each other alive.
    pub subtasks: Vec<(Domain, Arc<SubTask>)>,
    /// Thumbnail produced by the worker, pending the terminal callback.
    pub picture: Option<Arc<Picture>>,
}

/// One accepted preparse/thumbnail request.
pub(crate) struct Request {
    pub id: RequestId,
    pub item: Arc<InputItem>,
    sink: RequestSink,
    pub state: Mutex<RequestState>,
    /// Serializes callback delivery of this request: intermediate events
    /// never interleave with each other nor with the terminal callback.
    events: Mutex<()>,
}

impl Request {
    pub(crate) fn new(
        id: RequestId,
        item: Arc<InputItem>,
        sink: RequestSink,
        remaining: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            item,
            sink,
            state: Mutex::new(RequestState {
                remaining,
                status: TaskStatus::Ok,
                terminal: false,
                cancel_requested: false,
                subtasks: Vec::new(),
                picture: None,
            }),
            events: Mutex::new(()),
        })
    }

    fn is_terminal(&self) -> bool {
        self.state
            .lock()
            .expect("request state lock poisoned")
            .terminal
    }

    /// Forwards a subitems-discovered event to the parse callbacks, unless
    /// the request already settled.
    pub(crate) fn notify_subitems_added(&self, new_subitems: &[Arc<InputItem>]) {
        let _serialized = self.events.lock().expect("request events lock poisoned");
        if self.is_terminal() {
            return;
        }
        if let RequestSink::Parse(cbs) = &self.sink {
            cbs.on_subitems_added(&self.item, new_subitems);
        }
    }

    /// Forwards an attachments-added event to the parse callbacks, unless
    /// the request already settled.
    pub(crate) fn notify_attachments_added(&self) {
        let _serialized = self.events.lock().expect("request events lock poisoned");
        if self.is_terminal() {
            return;
        }
        if let RequestSink::Parse(cbs) = &self.sink {
            cbs.on_attachments_added(&self.item);
        }
    }

    /// Deposits the pending thumbnail for the terminal callback.
    pub(crate) fn store_picture(&self, picture: Arc<Picture>) {
        let mut state = self.state.lock().expect("request state lock poisoned");
        if !state.terminal {
            state.picture = Some(picture);
        }
    }

    /// Invokes the terminal callback. The caller must have won the
    /// [`RequestTable::settle`] transition; no engine lock is held here.
    pub(crate) fn deliver_terminal(&self) {
        let (status, picture) = {
            let mut state = self.state.lock().expect("request state lock poisoned");
            (state.status, state.picture.take())
        };

        let _serialized = self.events.lock().expect("request events lock poisoned");
        match &self.sink {
            RequestSink::Parse(cbs) => cbs.on_preparse_ended(&self.item, status),
            RequestSink::Thumbnail(cbs) => {
                let thumbnail = if status.is_ok() { picture } else { None };
                cbs.on_ended(&self.item, status, thumbnail.as_ref());
            }
        }
    }
}

/// Engine-wide map of live requests.
pub(crate) struct RequestTable {
    entries: Mutex<HashMap<RequestId, Arc<Request>>>,
    next_id: AtomicU64,
}

impl RequestTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out the next identifier. 0 is never issued.
    pub(crate) fn allocate_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn insert(&self, request: Arc<Request>) {
        self.entries
            .lock()
            .expect("request table lock poisoned")
            .insert(request.id, request);
    }

    /// Records addressed by `id`: every live record for
    /// [`REQUEST_ID_INVALID`], at most one otherwise.
    pub(crate) fn targets(&self, id: RequestId) -> Vec<Arc<Request>> {
        let entries = self.entries.lock().expect("request table lock poisoned");
        if id == REQUEST_ID_INVALID {
            entries.values().cloned().collect()
        } else {
            entries.get(&id).cloned().into_iter().collect()
        }
    }

    /// Table half of the terminal transition: atomically sets the terminal
    /// flag and removes the record. Returns false when another path already
    /// settled the request.
    pub(crate) fn settle(&self, request: &Arc<Request>) -> bool {
        let mut entries = self.entries.lock().expect("request table lock poisoned");
        {
            let mut state = request.state.lock().expect("request state lock poisoned");
            if state.terminal {
                return false;
            }
            state.terminal = true;
            state.subtasks.clear();
        }
        entries.remove(&request.id);
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .expect("request table lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopParseCallbacks;

    impl ParseCallbacks for NoopParseCallbacks {
        fn on_preparse_ended(&self, _item: &Arc<InputItem>, _status: TaskStatus) {}
    }

    fn parse_request(table: &RequestTable) -> Arc<Request> {
        let id = table.allocate_id();
        Request::new(
            id,
            InputItem::new("file:///music/table-test.flac"),
            RequestSink::Parse(Arc::new(NoopParseCallbacks)),
            1,
        )
    }

    #[test]
    fn test_identifier_allocation_is_monotonic_from_one() {
        let table = RequestTable::new();
        let first = table.allocate_id();
        let second = table.allocate_id();
        assert_eq!(first, 1);
        assert!(second > first);
        assert_ne!(first, REQUEST_ID_INVALID);
    }

    #[test]
    fn test_targets_resolves_specific_and_all() {
        let table = RequestTable::new();
        let first = parse_request(&table);
        let second = parse_request(&table);
        table.insert(Arc::clone(&first));
        table.insert(Arc::clone(&second));

        assert_eq!(table.targets(first.id).len(), 1);
        assert_eq!(table.targets(9999).len(), 0);
        assert_eq!(table.targets(REQUEST_ID_INVALID).len(), 2);
    }

    #[test]
    fn test_settle_wins_exactly_once() {
        let table = RequestTable::new();
        let request = parse_request(&table);
        table.insert(Arc::clone(&request));

        assert!(table.settle(&request), "first settle should win");
        assert!(!table.settle(&request), "second settle should be a no-op");
        assert!(table.is_empty());
    }

    #[test]
    fn test_notifications_are_dropped_after_terminal() {
        use std::sync::atomic::AtomicUsize;

        struct CountingCallbacks {
            subitem_events: AtomicUsize,
        }

        impl ParseCallbacks for CountingCallbacks {
            fn on_subitems_added(
                &self,
                _item: &Arc<InputItem>,
                _new_subitems: &[Arc<InputItem>],
            ) {
                self.subitem_events.fetch_add(1, Ordering::SeqCst);
            }
            fn on_preparse_ended(&self, _item: &Arc<InputItem>, _status: TaskStatus) {}
        }

        let table = RequestTable::new();
        let cbs = Arc::new(CountingCallbacks {
            subitem_events: AtomicUsize::new(0),
        });
        let request = Request::new(
            table.allocate_id(),
            InputItem::new("file:///music/late-event.flac"),
            RequestSink::Parse(Arc::clone(&cbs) as Arc<dyn ParseCallbacks>),
            1,
        );
        table.insert(Arc::clone(&request));

        let child = InputItem::new("file:///music/child.flac");
        request.notify_subitems_added(&[Arc::clone(&child)]);
        assert_eq!(cbs.subitem_events.load(Ordering::SeqCst), 1);

        table.settle(&request);
        request.notify_subitems_added(&[child]);
        assert_eq!(
            cbs.subitem_events.load(Ordering::SeqCst),
            1,
            "events after the terminal transition should be dropped"
        );
    }
}
