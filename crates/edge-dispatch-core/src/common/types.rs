//! # Job identity and intent
//!
//! Value types naming *which* job a message belongs to and *what* it asks the
//! backend to do.
//!
//! - [`JobId`] - A monotonic ULID assigned when a job is created. It is the
//!   correlation key between a job, its response and every log line emitted
//!   while it is in flight.
//! - [`Operation`] - The verb requested by the producer.
//! - [`Resource`] - The kind of inventory resource the verb targets.
//!
//! Identifiers are drawn from [`ferroid`]'s thread-local monotonic ULID
//! generator, so IDs minted on the same thread are strictly increasing and IDs
//! minted anywhere in the process are unique.

use core::fmt;
use ferroid::{
    generator::thread_local::{Backoff, Ulid},
    id::ULID,
};
use serde::{Serialize, Serializer};
use std::borrow::Cow;

/// Globally unique identifier of an admitted job.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(ULID);

impl JobId {
    /// Mints a fresh identifier.
    ///
    /// In the rare case the monotonic generator saturates within one
    /// millisecond, the calling thread yields until the next tick.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::with_mono_backoff(Backoff::Yield))
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> ULID {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The verb a job asks the backend to perform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Find,
    Post,
    Put,
    Patch,
    Delete,
}

impl Operation {
    /// Lowercase verb used when phrasing user-facing messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Find => "find",
            Self::Post => "create",
            Self::Put => "replace",
            Self::Patch => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the operation carries a request body.
    #[must_use]
    pub const fn requires_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Whether the operation may collide with a uniqueness constraint.
    #[must_use]
    pub const fn sets_unique_fields(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::List => "List",
            Self::Get => "Get",
            Self::Find => "Find",
            Self::Post => "Post",
            Self::Put => "Put",
            Self::Patch => "Patch",
            Self::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Tag naming the kind of resource a job targets, e.g. `Host` or `Site`.
///
/// The set is open: handlers may introduce tags beyond the constants below.
/// The tag is rendered verbatim into user-facing error messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resource(Cow<'static, str>);

impl Resource {
    pub const HOST: Self = Self::from_static("Host");
    pub const SITE: Self = Self::from_static("Site");
    pub const REGION: Self = Self::from_static("Region");
    pub const OS: Self = Self::from_static("OS");
    pub const INSTANCE: Self = Self::from_static("Instance");
    pub const SCHEDULE: Self = Self::from_static("Schedule");
    pub const WORKLOAD: Self = Self::from_static("Workload");
    pub const PROVIDER: Self = Self::from_static("Provider");

    /// Creates a resource tag from a static string without allocating.
    #[must_use]
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Creates a resource tag from any string.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
