use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Who made a commit and when.
///
/// The timestamp is whole seconds since the UNIX epoch; the offset records
/// the author's local timezone in minutes east of UTC so logs can render
/// the time the author saw.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub tz_offset_minutes: i32,
}

impl Signature {
    /// Create a signature with an explicit time.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        tz_offset_minutes: i32,
    ) -> Result<Self, TypeError> {
        let name = name.into();
        let email = email.into();
        if name.trim().is_empty() {
            return Err(TypeError::InvalidSignature("author name is empty".into()));
        }
        if name.contains(['\n', '<', '>']) || email.contains(['\n', '<', '>']) {
            return Err(TypeError::InvalidSignature(
                "name and email must not contain '<', '>' or newlines".into(),
            ));
        }
        // +/- 24h is the widest offset chrono accepts.
        if tz_offset_minutes.unsigned_abs() >= 24 * 60 {
            return Err(TypeError::InvalidSignature(format!(
                "timezone offset out of range: {tz_offset_minutes} minutes"
            )));
        }
        Ok(Self {
            name,
            email,
            timestamp,
            tz_offset_minutes,
        })
    }

    /// Create a signature stamped with the current UTC time.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(name, email, Utc::now().timestamp(), 0)
    }

    /// The commit time in the author's timezone.
    pub fn datetime(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.tz_offset_minutes * 60)?;
        DateTime::from_timestamp(self.timestamp, 0).map(|utc| utc.with_timezone(&offset))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
