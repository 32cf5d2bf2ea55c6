//! Shared request vocabulary: identifiers, work domains, seek arguments,
//! and task statuses exchanged between the engine, executors and workers.

use std::time::Duration;

use bitflags::bitflags;

/// Identifier of one accepted preparse/thumbnail request.
///
/// Identifiers are allocated monotonically from 1 and are never reused
/// within a single engine lifetime.
pub type RequestId = u64;

/// Sentinel returned for rejected requests. Passing it to cancel targets
/// every live request instead of a specific one.
pub const REQUEST_ID_INVALID: RequestId = 0;

bitflags! {
    /// Set of work domains, used both for engine configuration and for
    /// selecting the domains of one parse-family request. Serde support
    /// comes with the flags implementation itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct DomainMask: u32 {
        const PARSE            = 0x01;
        const FETCH_META_LOCAL = 0x02;
        const FETCH_META_NET   = 0x04;
        const THUMBNAIL        = 0x08;
        const FETCH_META_ALL   = Self::FETCH_META_LOCAL.bits() | Self::FETCH_META_NET.bits();
    }
}

/// One category of extraction work, served by its own executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Parse,
    FetchMetaLocal,
    FetchMetaNet,
    Thumbnail,
}

impl Domain {
    /// Fixed submission order. Parse-family sub-tasks are always dispatched
    /// Parse, then FetchMetaLocal, then FetchMetaNet.
    pub const ALL: [Domain; 4] = [
        Domain::Parse,
        Domain::FetchMetaLocal,
        Domain::FetchMetaNet,
        Domain::Thumbnail,
    ];

    pub fn mask(self) -> DomainMask {
        match self {
            Domain::Parse => DomainMask::PARSE,
            Domain::FetchMetaLocal => DomainMask::FETCH_META_LOCAL,
            Domain::FetchMetaNet => DomainMask::FETCH_META_NET,
            Domain::Thumbnail => DomainMask::THUMBNAIL,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Domain::Parse => 0,
            Domain::FetchMetaLocal => 1,
            Domain::FetchMetaNet => 2,
            Domain::Thumbnail => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Domain::Parse => "parse",
            Domain::FetchMetaLocal => "fetchmeta-local",
            Domain::FetchMetaNet => "fetchmeta-net",
            Domain::Thumbnail => "thumbnail",
        }
    }
}

impl DomainMask {
    /// Domains selected by this mask, in the fixed `Domain::ALL` order.
    pub fn domains(self) -> impl Iterator<Item = Domain> {
        Domain::ALL
            .into_iter()
            .filter(move |domain| self.contains(domain.mask()))
    }
}

/// Options of one parse-family request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Requested domains, a subset of `PARSE | FETCH_META_ALL`.
    pub types: DomainMask,
    /// Allow workers to interact with the user (credential prompts and the
    /// like). Forwarded to the parse worker verbatim.
    pub interact: bool,
    /// Expand container items (playlists, directories) into subitems.
    pub subitems: bool,
}

impl ParseOptions {
    pub fn new(types: DomainMask) -> Self {
        Self {
            types,
            interact: false,
            subitems: false,
        }
    }

    pub fn interact(mut self, interact: bool) -> Self {
        self.interact = interact;
        self
    }

    pub fn subitems(mut self, subitems: bool) -> Self {
        self.subitems = subitems;
        self
    }
}

/// Where a thumbnail should be taken from within the source item.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekTarget {
    /// Don't seek.
    #[default]
    None,
    /// Seek by elapsed time.
    Time(Duration),
    /// Seek by position, as a fraction in `[0, 1]`.
    Position(f64),
}

/// Precision hint paired with a seek target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekSpeed {
    /// Precise, but potentially slow.
    #[default]
    Precise,
    /// Fast, but potentially imprecise.
    Fast,
}

/// Seek descriptor of one thumbnail request.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SeekArg {
    #[serde(default)]
    pub target: SeekTarget,
    #[serde(default)]
    pub speed: SeekSpeed,
}

impl SeekArg {
    pub fn by_time(time: Duration, speed: SeekSpeed) -> Self {
        Self {
            target: SeekTarget::Time(time),
            speed,
        }
    }

    pub fn by_position(position: f64, speed: SeekSpeed) -> Self {
        Self {
            target: SeekTarget::Position(position.clamp(0.0, 1.0)),
            speed,
        }
    }
}

/// Outcome of one sub-task, and the aggregate outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The work completed.
    Ok,
    /// The work was cancelled by the caller or by engine teardown.
    Interrupted,
    /// The request deadline elapsed before the work completed.
    Timeout,
    /// The worker failed.
    Failed,
}

impl TaskStatus {
    fn severity(self) -> u8 {
        match self {
            TaskStatus::Ok => 0,
            TaskStatus::Interrupted => 1,
            TaskStatus::Timeout => 2,
            TaskStatus::Failed => 3,
        }
    }

    /// Combines two outcomes under the precedence
    /// `Failed > Timeout > Interrupted > Ok`; ties keep the first arrival.
    #[must_use]
    pub fn merge(self, incoming: TaskStatus) -> TaskStatus {
        if incoming.severity() > self.severity() {
            incoming
        } else {
            self
        }
    }

    pub fn is_ok(self) -> bool {
        self == TaskStatus::Ok
    }
}
