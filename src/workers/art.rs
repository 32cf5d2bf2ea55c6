//! Built-in artwork fetchers: embedded/sidecar lookup for the local
//! domain, HTTP download for the network domain.

use std::io::Read;
use std::time::Duration;

use lofty::file::TaggedFileExt;
use log::debug;

use crate::item::Attachment;
use crate::protocol::TaskStatus;
use crate::workers::parse::read_tagged_file;
use crate::workers::{Worker, WorkerContext};

const SIDECAR_STEMS: [&str; 3] = ["cover", "folder", "front"];
const SIDECAR_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
const EMBEDDED_ART_ATTACHMENT: &str = "cover";
const NETWORK_ART_ATTACHMENT: &str = "network-art";
const MAX_ART_BYTES: u64 = 8 * 1024 * 1024;
const ART_FETCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
/// Whole-request cap for one art GET. Together with [`MAX_ART_BYTES`] this
/// bounds how long a single fetch can occupy its executor thread, whatever
/// the server's pacing.
const ART_FETCH_TOTAL_TIMEOUT: Duration = Duration::from_secs(12);

/// FetchMetaLocal worker: publishes an art URL from embedded pictures or
/// from well-known sidecar files next to the media file.
///
/// Finding no artwork is a completed lookup, not a failure.
#[derive(Debug, Default)]
pub struct LocalArtWorker;

impl LocalArtWorker {
    pub fn new() -> Self {
        Self
    }
}

impl Worker for LocalArtWorker {
    fn run(&self, ctx: &WorkerContext) -> TaskStatus {
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }
        if ctx.item().art_url().is_some() {
            return TaskStatus::Ok;
        }
        let Some(path) = ctx.item().local_path() else {
            return TaskStatus::Ok;
        };

        if let Some(tagged_file) = read_tagged_file(&path) {
            if let Some(status) = ctx.cancellation_status() {
                return status;
            }
            let embedded = tagged_file
                .primary_tag()
                .into_iter()
                .chain(tagged_file.tags())
                .find_map(|tag| tag.pictures().first().cloned());
            if let Some(picture) = embedded {
                let attachment = Attachment {
                    name: EMBEDDED_ART_ATTACHMENT.to_string(),
                    mime: picture
                        .mime_type()
                        .map(|mime| mime.as_str().to_string())
                        .unwrap_or_default(),
                    data: picture.data().to_vec(),
                };
                debug!(
                    "LocalArtWorker: using embedded picture of {}",
                    path.display()
                );
                ctx.item().set_art_url(attachment.url());
                ctx.report_attachments(vec![attachment]);
                return TaskStatus::Ok;
            }
        }

        let Some(parent) = path.parent() else {
            return TaskStatus::Ok;
        };
        for stem in SIDECAR_STEMS {
            for extension in SIDECAR_EXTENSIONS {
                let candidate = parent.join(format!("{stem}.{extension}"));
                if candidate.is_file() {
                    debug!(
                        "LocalArtWorker: found sidecar art {} for {}",
                        candidate.display(),
                        path.display()
                    );
                    ctx.item()
                        .set_art_url(format!("file://{}", candidate.display()));
                    return TaskStatus::Ok;
                }
            }
        }
        TaskStatus::Ok
    }
}

/// FetchMetaNet worker: downloads the item's `http(s)` art URL and stores
/// the bytes as an attachment, rewriting the art URL to point at it.
pub struct NetArtWorker {
    agent: ureq::Agent,
}

impl NetArtWorker {
    pub fn new() -> Self {
        // A single whole-request deadline rather than per-phase read/write
        // limits: an art download is one bounded GET, and a stalling server
        // must not be able to stretch it past the cap.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(ART_FETCH_CONNECT_TIMEOUT)
            .timeout(ART_FETCH_TOTAL_TIMEOUT)
            .build();
        Self { agent }
    }
}

impl Default for NetArtWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for NetArtWorker {
    fn run(&self, ctx: &WorkerContext) -> TaskStatus {
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }
        let Some(url) = ctx.item().art_url() else {
            return TaskStatus::Ok;
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return TaskStatus::Ok;
        }

        let response = match self.agent.get(&url).set("Accept", "image/*").call() {
            Ok(response) => response,
            Err(error) => {
                debug!("NetArtWorker: fetching {url} failed: {error}");
                return TaskStatus::Failed;
            }
        };

        let mime = response.content_type().to_string();
        let mut bytes = Vec::new();
        if let Err(error) = response
            .into_reader()
            .take(MAX_ART_BYTES)
            .read_to_end(&mut bytes)
        {
            debug!("NetArtWorker: reading art body from {url} failed: {error}");
            return TaskStatus::Failed;
        }
        if bytes.is_empty() {
            debug!("NetArtWorker: empty art body from {url}");
            return TaskStatus::Failed;
        }
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }

        let attachment = Attachment {
            name: NETWORK_ART_ATTACHMENT.to_string(),
            mime,
            data: bytes,
        };
        ctx.item().set_art_url(attachment.url());
        ctx.report_attachments(vec![attachment]);
        TaskStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InputItem;
    use crate::protocol::{Domain, SeekArg};
    use crate::workers::testing;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn test_local_art_prefers_existing_art_url() {
        let item = InputItem::new("/music/track.flac");
        item.set_art_url("attachment://already-there");
        let (ctx, _request) =
            testing::context(Arc::clone(&item), Domain::FetchMetaLocal, false, SeekArg::default());

        assert_eq!(LocalArtWorker::new().run(&ctx), TaskStatus::Ok);
        assert_eq!(
            item.art_url().as_deref(),
            Some("attachment://already-there")
        );
    }

    #[test]
    fn test_local_art_finds_sidecar_cover_file() {
        let dir = tempfile::tempdir().expect("scratch directory should be created");
        let media = dir.path().join("track.flac");
        fs::write(&media, b"not really audio").expect("media stub should be written");
        let sidecar = dir.path().join("cover.png");
        fs::write(&sidecar, b"not really a png").expect("sidecar stub should be written");

        let item = InputItem::new(media.to_string_lossy().into_owned());
        let (ctx, _request) =
            testing::context(Arc::clone(&item), Domain::FetchMetaLocal, false, SeekArg::default());

        assert_eq!(LocalArtWorker::new().run(&ctx), TaskStatus::Ok);
        assert_eq!(
            item.art_url(),
            Some(format!("file://{}", sidecar.display()))
        );
    }

    #[test]
    fn test_local_art_without_any_source_is_still_ok() {
        let dir = tempfile::tempdir().expect("scratch directory should be created");
        let media = dir.path().join("bare.flac");
        fs::write(&media, b"no tags here").expect("media stub should be written");

        let item = InputItem::new(media.to_string_lossy().into_owned());
        let (ctx, _request) =
            testing::context(Arc::clone(&item), Domain::FetchMetaLocal, false, SeekArg::default());

        assert_eq!(LocalArtWorker::new().run(&ctx), TaskStatus::Ok);
        assert_eq!(item.art_url(), None);
    }

    #[test]
    fn test_net_art_ignores_items_without_http_url() {
        let worker = NetArtWorker::new();

        let no_url = InputItem::new("/music/a.flac");
        let (ctx, _request) =
            testing::context(Arc::clone(&no_url), Domain::FetchMetaNet, false, SeekArg::default());
        assert_eq!(worker.run(&ctx), TaskStatus::Ok);

        let local_url = InputItem::new("/music/b.flac");
        local_url.set_art_url("file:///music/cover.png");
        let (ctx, _request) = testing::context(
            Arc::clone(&local_url),
            Domain::FetchMetaNet,
            false,
            SeekArg::default(),
        );
        assert_eq!(worker.run(&ctx), TaskStatus::Ok);
        assert_eq!(local_url.art_url().as_deref(), Some("file:///music/cover.png"));
        assert!(local_url.attachments().is_empty());
    }

    #[test]
    fn test_net_art_unreachable_host_fails() {
        let item = InputItem::new("/music/c.flac");
        // Port 1 on loopback is reliably closed; the connect fails fast.
        item.set_art_url("http://127.0.0.1:1/cover.jpg");
        let (ctx, _request) =
            testing::context(Arc::clone(&item), Domain::FetchMetaNet, false, SeekArg::default());

        assert_eq!(NetArtWorker::new().run(&ctx), TaskStatus::Failed);
        assert!(item.attachments().is_empty());
    }

    #[test]
    fn test_net_art_interrupted_before_fetch() {
        let item = InputItem::new("/music/d.flac");
        item.set_art_url("http://127.0.0.1:1/cover.jpg");
        let (ctx, _request) =
            testing::interrupted_context(item, Domain::FetchMetaNet, SeekArg::default());
        assert_eq!(NetArtWorker::new().run(&ctx), TaskStatus::Interrupted);
    }
}
