//! Asynchronous media-item preparsing.
//!
//! `mediaprep` enriches media items out of band from the main application:
//! callers enqueue an item, get a request identifier back immediately, and
//! are notified through callbacks when metadata, artwork or a thumbnail
//! picture is ready. Work is spread across one bounded FIFO worker pool per
//! domain (parse, local metadata fetch, network metadata fetch, thumbnail),
//! and every accepted request is guaranteed exactly one terminal callback,
//! whatever the interleaving of completion, cancellation, timeout and
//! engine teardown.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediaprep::{
//!     DomainMask, InputItem, ParseCallbacks, ParseOptions, Preparser, PreparserConfig,
//!     TaskStatus, REQUEST_ID_INVALID,
//! };
//!
//! struct PrintOutcome;
//!
//! impl ParseCallbacks for PrintOutcome {
//!     fn on_preparse_ended(&self, item: &Arc<InputItem>, status: TaskStatus) {
//!         println!("{} -> {status:?}", item.uri());
//!     }
//! }
//!
//! let config = PreparserConfig {
//!     types: DomainMask::PARSE | DomainMask::FETCH_META_ALL,
//!     ..PreparserConfig::default()
//! };
//! let engine = Preparser::new(&config).expect("preparser should start");
//! let id = engine.push(
//!     InputItem::new("/music/track.flac"),
//!     ParseOptions::new(DomainMask::PARSE),
//!     Arc::new(PrintOutcome),
//! );
//! assert_ne!(id, REQUEST_ID_INVALID);
//! engine.close();
//! ```

mod config;
mod engine;
mod executor;
mod item;
mod protocol;
mod request;
mod timer;
pub mod workers;

pub use config::PreparserConfig;
pub use engine::Preparser;
pub use item::{Attachment, InputItem, ItemMeta, ParseCallbacks, Picture, ThumbnailCallbacks};
pub use protocol::{
    Domain, DomainMask, ParseOptions, RequestId, SeekArg, SeekSpeed, SeekTarget, TaskStatus,
    REQUEST_ID_INVALID,
};
pub use workers::{
    ArtThumbnailWorker, LocalArtWorker, NetArtWorker, TagParseWorker, Worker, WorkerContext,
    WorkerSet,
};
