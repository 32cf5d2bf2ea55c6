//! Input-item and picture data model, plus the callback contracts through
//! which request outcomes are delivered.
//!
//! Items are shared as `Arc<InputItem>`; the engine keeps exactly one clone
//! per live request and drops it in the terminal transition. All item fields
//! workers write to sit behind their own locks so concurrent domain sub-tasks
//! of the same request can publish results independently.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::protocol::TaskStatus;

/// Common metadata fields published by parse/fetch workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMeta {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub date: String,
    pub track_number: String,
}

impl ItemMeta {
    fn absorb(&mut self, incoming: &ItemMeta) {
        fn fill(slot: &mut String, value: &str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                *slot = trimmed.to_string();
            }
        }
        fill(&mut self.title, &incoming.title);
        fill(&mut self.artist, &incoming.artist);
        fill(&mut self.album, &incoming.album);
        fill(&mut self.album_artist, &incoming.album_artist);
        fill(&mut self.genre, &incoming.genre);
        fill(&mut self.date, &incoming.date);
        fill(&mut self.track_number, &incoming.track_number);
    }
}

/// Named binary blob attached to an item (embedded pictures, downloaded art).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// URL under which this attachment is addressable from the item's
    /// art-URL field.
    pub fn url(&self) -> String {
        format!("attachment://{}", self.name)
    }
}

/// A playable media descriptor handed to the preparser.
#[derive(Debug)]
pub struct InputItem {
    uri: String,
    meta: Mutex<ItemMeta>,
    duration: Mutex<Option<Duration>>,
    art_url: Mutex<Option<String>>,
    subitems: Mutex<Vec<Arc<InputItem>>>,
    attachments: Mutex<Vec<Attachment>>,
}

impl InputItem {
    pub fn new(uri: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.into(),
            meta: Mutex::new(ItemMeta::default()),
            duration: Mutex::new(None),
            art_url: Mutex::new(None),
            subitems: Mutex::new(Vec::new()),
            attachments: Mutex::new(Vec::new()),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Filesystem path of the item, for `file://` URIs and bare paths.
    pub fn local_path(&self) -> Option<PathBuf> {
        if let Some(stripped) = self.uri.strip_prefix("file://") {
            return Some(PathBuf::from(stripped));
        }
        if self.uri.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.uri))
    }

    pub fn meta(&self) -> ItemMeta {
        self.meta.lock().expect("item meta lock poisoned").clone()
    }

    /// Merges non-empty fields of `incoming` into the item's metadata.
    /// Empty incoming fields never erase previously published values.
    pub fn apply_meta(&self, incoming: &ItemMeta) {
        self.meta
            .lock()
            .expect("item meta lock poisoned")
            .absorb(incoming);
    }

    pub fn duration(&self) -> Option<Duration> {
        *self.duration.lock().expect("item duration lock poisoned")
    }

    pub fn set_duration(&self, duration: Duration) {
        *self.duration.lock().expect("item duration lock poisoned") = Some(duration);
    }

    pub fn art_url(&self) -> Option<String> {
        self.art_url
            .lock()
            .expect("item art url lock poisoned")
            .clone()
    }

    pub fn set_art_url(&self, url: impl Into<String>) {
        *self.art_url.lock().expect("item art url lock poisoned") = Some(url.into());
    }

    pub fn subitems(&self) -> Vec<Arc<InputItem>> {
        self.subitems
            .lock()
            .expect("item subitems lock poisoned")
            .clone()
    }

    pub(crate) fn add_subitems(&self, new_subitems: &[Arc<InputItem>]) {
        self.subitems
            .lock()
            .expect("item subitems lock poisoned")
            .extend(new_subitems.iter().cloned());
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments
            .lock()
            .expect("item attachments lock poisoned")
            .clone()
    }

    pub fn find_attachment(&self, name: &str) -> Option<Attachment> {
        self.attachments
            .lock()
            .expect("item attachments lock poisoned")
            .iter()
            .find(|attachment| attachment.name == name)
            .cloned()
    }

    pub(crate) fn add_attachments(&self, new_attachments: Vec<Attachment>) {
        self.attachments
            .lock()
            .expect("item attachments lock poisoned")
            .extend(new_attachments);
    }
}

/// Decoded RGBA image produced by a thumbnail worker.
///
/// Shared as `Arc<Picture>`; a callback that wants to keep the picture past
/// its own scope clones the `Arc`.
#[derive(Debug, Clone)]
pub struct Picture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Picture {
    /// Builds a picture from raw RGBA bytes. Returns `None` when the buffer
    /// length does not match `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize).checked_mul(height as usize)?.checked_mul(4)?;
        if rgba.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

/// Event sink of one parse-family request.
///
/// Intermediate events are serialized per request and always delivered
/// before the terminal `on_preparse_ended`. All methods run on engine worker
/// threads.
pub trait ParseCallbacks: Send + Sync {
    /// New subitems were discovered while parsing `item`. The subitems have
    /// already been added to the item when this fires.
    fn on_subitems_added(&self, _item: &Arc<InputItem>, _new_subitems: &[Arc<InputItem>]) {}

    /// One or more attachments were added to `item`.
    fn on_attachments_added(&self, _item: &Arc<InputItem>) {}

    /// Terminal event, delivered exactly once per accepted request.
    fn on_preparse_ended(&self, item: &Arc<InputItem>, status: TaskStatus);
}

/// Event sink of one thumbnail request.
pub trait ThumbnailCallbacks: Send + Sync {
    /// Terminal event, delivered exactly once per accepted request.
    ///
    /// `thumbnail` is `Some` iff `status` is `Ok`. The picture is owned by
    /// the engine for the duration of the call; clone the `Arc` to retain it.
    fn on_ended(&self, item: &Arc<InputItem>, status: TaskStatus, thumbnail: Option<&Arc<Picture>>);
}
