//! Built-in parse worker: tag and audio-property extraction backed by
//! `lofty`, with playlist expansion into subitems.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use log::debug;

use crate::item::{Attachment, InputItem, ItemMeta};
use crate::protocol::TaskStatus;
use crate::workers::{Worker, WorkerContext};

const PLAYLIST_EXTENSIONS: [&str; 2] = ["m3u", "m3u8"];

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    let candidates = primary_tag.into_iter().chain(tags.iter());
    for tag in candidates {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

fn tag_parse_options(parsing_mode: ParsingMode, max_junk_bytes: usize) -> ParseOptions {
    ParseOptions::new()
        .read_properties(true)
        .read_cover_art(true)
        .parsing_mode(parsing_mode)
        .max_junk_bytes(max_junk_bytes)
}

/// Reads the tagged file with an extension-based probe first, falling back
/// to relaxed content-based type guessing for misnamed or damaged files.
pub(crate) fn read_tagged_file(path: &Path) -> Option<TaggedFile> {
    match Probe::open(path) {
        Ok(probe) => match probe
            .options(tag_parse_options(ParsingMode::BestAttempt, 1024))
            .read()
        {
            Ok(tagged_file) => return Some(tagged_file),
            Err(primary_error) => {
                debug!(
                    "TagParseWorker: primary parse failed for {}: {}",
                    path.display(),
                    primary_error
                );
            }
        },
        Err(open_error) => {
            debug!(
                "TagParseWorker: could not open {} with extension-based probe: {}",
                path.display(),
                open_error
            );
        }
    }

    let file = fs::File::open(path).ok()?;
    let guessed = Probe::new(BufReader::new(file))
        .options(tag_parse_options(ParsingMode::Relaxed, 64 * 1024))
        .guess_file_type()
        .ok()?;
    match guessed.read() {
        Ok(tagged_file) => {
            debug!(
                "TagParseWorker: recovered {} via content-based parsing",
                path.display()
            );
            Some(tagged_file)
        }
        Err(error) => {
            debug!(
                "TagParseWorker: content-based parse failed for {}: {}",
                path.display(),
                error
            );
            None
        }
    }
}

fn meta_from_tags(tagged_file: &TaggedFile) -> ItemMeta {
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    ItemMeta {
        title: first_non_empty_value(primary_tag, tags, |tag| {
            tag.title().map(|value| value.into_owned())
        }),
        artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.artist().map(|value| value.into_owned())
        }),
        album: first_non_empty_value(primary_tag, tags, |tag| {
            tag.album().map(|value| value.into_owned())
        }),
        album_artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(&ItemKey::AlbumArtist)
                .or_else(|| tag.get_string(&ItemKey::TrackArtist))
                .map(str::to_string)
        }),
        genre: first_non_empty_value(primary_tag, tags, |tag| {
            tag.genre().map(|value| value.into_owned())
        }),
        date: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(&ItemKey::RecordingDate)
                .or_else(|| tag.get_string(&ItemKey::ReleaseDate))
                .or_else(|| tag.get_string(&ItemKey::Year))
                .map(str::to_string)
        }),
        track_number: first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(&ItemKey::TrackNumber)
                .map(str::to_string)
                .or_else(|| tag.track().map(|value| value.to_string()))
        }),
    }
}

fn embedded_pictures(tagged_file: &TaggedFile) -> Vec<Attachment> {
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let Some(tag) = primary_tag.or_else(|| tags.first()) else {
        return Vec::new();
    };
    tag.pictures()
        .iter()
        .enumerate()
        .map(|(index, picture)| Attachment {
            name: format!("picture{index}"),
            mime: picture
                .mime_type()
                .map(|mime| mime.as_str().to_string())
                .unwrap_or_default(),
            data: picture.data().to_vec(),
        })
        .collect()
}

fn is_playlist(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            PLAYLIST_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
        .unwrap_or(false)
}

/// Expands an M3U document into child items. Entry paths are resolved
/// against the playlist's directory; absolute paths and URLs pass through.
fn playlist_entries(path: &Path, contents: &str) -> Vec<Arc<InputItem>> {
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line.contains("://") || Path::new(line).is_absolute() {
                InputItem::new(line)
            } else {
                let joined: PathBuf = base.join(line);
                InputItem::new(joined.to_string_lossy().into_owned())
            }
        })
        .collect()
}

/// Parse-domain worker extracting tags, duration and embedded pictures
/// from local media files.
#[derive(Debug, Default)]
pub struct TagParseWorker;

impl TagParseWorker {
    pub fn new() -> Self {
        Self
    }

    fn parse_playlist(&self, ctx: &WorkerContext, path: &Path) -> TaskStatus {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                debug!(
                    "TagParseWorker: failed reading playlist {}: {}",
                    path.display(),
                    error
                );
                return TaskStatus::Failed;
            }
        };
        let entries = playlist_entries(path, &contents);
        debug!(
            "TagParseWorker: playlist {} expanded into {} item(s)",
            path.display(),
            entries.len()
        );
        ctx.report_subitems(entries);
        TaskStatus::Ok
    }
}

impl Worker for TagParseWorker {
    fn run(&self, ctx: &WorkerContext) -> TaskStatus {
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }
        let Some(path) = ctx.item().local_path() else {
            debug!(
                "TagParseWorker: no local path for {}, nothing to parse",
                ctx.item().uri()
            );
            return TaskStatus::Failed;
        };

        if is_playlist(&path) {
            if !ctx.want_subitems() {
                return TaskStatus::Ok;
            }
            return self.parse_playlist(ctx, &path);
        }

        let Some(tagged_file) = read_tagged_file(&path) else {
            return TaskStatus::Failed;
        };
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }

        ctx.item().apply_meta(&meta_from_tags(&tagged_file));
        ctx.item()
            .set_duration(tagged_file.properties().duration());

        let pictures = embedded_pictures(&tagged_file);
        if !pictures.is_empty() {
            ctx.report_attachments(pictures);
        }
        TaskStatus::Ok
    }
}
