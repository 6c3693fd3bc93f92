//! Validated value types for lock identity and lease duration
//!
//! Values are only obtainable through constructors that validate their input,
//! so an invalid resource id, a nil lock id or a non-positive TTL can never
//! reach a storage backend.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};

/// Logical name of the thing being protected
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource id, rejecting empty and whitespace-only values
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(WardenError::InvalidArgument(
                "resource id must not be empty or whitespace".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters, as relational backends count it
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = WardenError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ResourceId {
    type Error = WardenError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Token minted per successful acquisition, distinguishing successive holders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct LockId(Uuid);

impl LockId {
    /// Mint a fresh random lock id
    pub fn generate() -> Self {
        loop {
            let id = Uuid::new_v4();
            if !id.is_nil() {
                return Self(id);
            }
        }
    }

    /// Wrap an existing UUID; the nil UUID is rejected
    pub fn from_uuid(id: Uuid) -> Result<Self> {
        if id.is_nil() {
            return Err(WardenError::InvalidArgument(
                "lock id must not be the nil uuid".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Parse the textual form stored by backends
    pub fn parse(value: &str) -> Result<Self> {
        let id = Uuid::parse_str(value.trim()).map_err(|e| {
            WardenError::InvalidArgument(format!("invalid lock id '{}': {}", value, e))
        })?;
        Self::from_uuid(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for LockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for LockId {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<Uuid> for LockId {
    type Error = WardenError;

    fn try_from(value: Uuid) -> Result<Self> {
        Self::from_uuid(value)
    }
}

impl From<LockId> for Uuid {
    fn from(value: LockId) -> Self {
        value.0
    }
}

/// Lease duration after which an unreleased lock is considered abandoned.
///
/// Backends track expiry with millisecond resolution, so the smallest
/// accepted lease is one millisecond. The largest is [`TimeToLive::MAX`],
/// which keeps `now + ttl` within a BIGINT epoch-millisecond column and
/// within the range Redis accepts for `PX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeToLive(Duration);

impl TimeToLive {
    /// Longest accepted lease: 100 years
    pub const MAX: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

    pub fn new(duration: Duration) -> Result<Self> {
        if duration < Duration::from_millis(1) {
            return Err(WardenError::InvalidArgument(format!(
                "time to live must be at least 1ms, got {:?}",
                duration
            )));
        }
        if duration > Self::MAX {
            return Err(WardenError::InvalidArgument(format!(
                "time to live must be at most {}ms, got {:?}",
                Self::MAX.as_millis(),
                duration
            )));
        }
        Ok(Self(duration))
    }

    pub fn from_millis(millis: u64) -> Result<Self> {
        Self::new(Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Result<Self> {
        Self::new(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole milliseconds for SQL bindings
    pub fn as_millis_i64(&self) -> i64 {
        self.0.as_millis() as i64
    }

    /// Whole milliseconds
    pub fn as_millis_u64(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Display for TimeToLive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

impl TryFrom<Duration> for TimeToLive {
    type Error = WardenError;

    fn try_from(value: Duration) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TimeToLive> for Duration {
    fn from(value: TimeToLive) -> Self {
        value.0
    }
}
