//! Shared status enumeration for stage outcomes.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The status code of a stage outcome.
///
/// Codes below 2000 follow HTTP-style semantics; the 8xxx range carries
/// workflow lifecycle states. Serialized as the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Completed successfully.
    Ok,
    /// Accepted for asynchronous processing.
    Accepted,
    /// The request could not be resolved.
    BadRequest,
    /// The caller is not authorized.
    Unauthorized,
    /// A referenced record does not exist.
    NotFound,
    /// A conflicting update was detected.
    Conflict,
    /// An unrecoverable internal failure.
    InternalError,
    /// Invalid configuration.
    BadConfig,
    /// Required configuration is missing.
    MissingConfig,
    /// Nothing has happened yet.
    #[default]
    Untouched,
    /// A stage is executing.
    Running,
    /// The activation is waiting for external input.
    Paused,
    /// The stage finished.
    Done,
    /// The stage was deferred.
    Delayed,
}

impl State {
    const ALL: [Self; 14] = [
        Self::Ok,
        Self::Accepted,
        Self::BadRequest,
        Self::Unauthorized,
        Self::NotFound,
        Self::Conflict,
        Self::InternalError,
        Self::BadConfig,
        Self::MissingConfig,
        Self::Untouched,
        Self::Running,
        Self::Paused,
        Self::Done,
        Self::Delayed,
    ];

    /// Returns the numeric wire code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Accepted => 202,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::InternalError => 500,
            Self::BadConfig => 1000,
            Self::MissingConfig => 1001,
            Self::Untouched => 8994,
            Self::Running => 8995,
            Self::Paused => 8996,
            Self::Done => 8997,
            Self::Delayed => 8998,
        }
    }

    /// Looks up a state by its wire code.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Looks up a state by its display name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.to_string().eq_ignore_ascii_case(name))
    }

    /// Returns true for Done and OK, the states that let a self-driving
    /// campaign move on.
    #[must_use]
    pub fn is_terminal_success(self) -> bool {
        matches!(self, Self::Done | Self::Ok)
    }

    /// Returns true if the state records a failure.
    #[must_use]
    pub fn is_error(self) -> bool {
        (400..2000).contains(&self.code())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Accepted => "Accepted",
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::InternalError => "InternalError",
            Self::BadConfig => "BadConfig",
            Self::MissingConfig => "MissingConfig",
            Self::Untouched => "Untouched",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Done => "Done",
            Self::Delayed => "Delayed",
        };
        f.write_str(name)
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

struct StateVisitor;

impl<'de> Visitor<'de> for StateVisitor {
    type Value = State;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a state code or state name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<State, E> {
        u16::try_from(v)
            .ok()
            .and_then(State::from_code)
            .ok_or_else(|| E::custom(format!("unknown state code {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<State, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("unknown state code {v}")))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<State, E> {
        State::from_name(v).ok_or_else(|| E::custom(format!("unknown state '{v}'")))
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StateVisitor)
    }
}
