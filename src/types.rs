//! Keys, targets and time values shared across the negotiation engine
use crate::utils;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::fmt;

// Keys are opaque strings. Generated keys are bech32 encoded uuid7 values, but
// keys handed in by collaborators (users, groups, resources) are taken as-is.
macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident, $hrp:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }
            /// Generate a fresh, globally unique key.
            pub fn generate() -> anyhow::Result<Self> {
                Ok(Self(utils::new_uuid_to_bech32($hrp)?))
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                e.str(&self.0)?.ok()
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                Ok(Self(d.str()?.to_owned()))
            }
        }
    };
}

string_key!(UserKey, "user_");
string_key!(GroupKey, "group_");
string_key!(ResourceKey, "resource_");
string_key!(
    /// Identity of an offer, and of its event stream.
    OfferKey,
    "offer_"
);
string_key!(OfferItemKey, "item_");

impl OfferKey {
    /// Name of the event stream holding this offer's history.
    pub fn stream_key(&self) -> String {
        format!("offer:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    User,
    Group,
}

/// A party in an offer: either a single user or a whole group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum Target {
    #[n(0)]
    User(#[n(0)] UserKey),
    #[n(1)]
    Group(#[n(0)] GroupKey),
}

impl Target {
    pub fn user(key: impl Into<UserKey>) -> Self {
        Target::User(key.into())
    }
    pub fn group(key: impl Into<GroupKey>) -> Self {
        Target::Group(key.into())
    }
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::User(_) => TargetKind::User,
            Target::Group(_) => TargetKind::Group,
        }
    }
    pub fn is_for_user(&self) -> bool {
        matches!(self, Target::User(_))
    }
    pub fn is_for_group(&self) -> bool {
        matches!(self, Target::Group(_))
    }
    pub fn user_key(&self) -> Option<&UserKey> {
        match self {
            Target::User(key) => Some(key),
            Target::Group(_) => None,
        }
    }
    pub fn group_key(&self) -> Option<&GroupKey> {
        match self {
            Target::Group(key) => Some(key),
            Target::User(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::User(key) => write!(f, "user:{key}"),
            Target::Group(key) => write!(f, "group:{key}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Utc itself has no ordering, so the derive would never apply
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` when the fields do not name a valid instant.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn checked_add(&self, span: TimeSpan) -> Option<Self> {
        self.0.checked_add_signed(span.0).map(TimeStamp)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

// encoded as [seconds, subsecond nanos] so every representable instant fits
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(2)?
            .i64(self.0.timestamp())?
            .u32(self.0.timestamp_subsec_nanos())?
            .ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(2) {
            return Err(minicbor::decode::Error::message("expected [secs, nanos] timestamp"));
        }
        let secs = d.i64()?;
        let nanos = d.u32()?;

        DateTime::from_timestamp(secs, nanos)
            .map(TimeStamp)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert timestamp to utc",
            ))
    }
}

/// A signed length of time. Time credits and service/borrow durations are
/// both expressed as spans; negative spans are representable so admission can
/// reject them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeSpan(TimeDelta);

impl TimeSpan {
    pub fn hours(hours: i64) -> Self {
        Self(TimeDelta::hours(hours))
    }
    pub fn minutes(minutes: i64) -> Self {
        Self(TimeDelta::minutes(minutes))
    }
    pub fn seconds(seconds: i64) -> Self {
        Self(TimeDelta::seconds(seconds))
    }
    pub fn is_negative(&self) -> bool {
        self.0 < TimeDelta::zero()
    }
    pub fn num_seconds(&self) -> i64 {
        self.0.num_seconds()
    }
    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }
}

impl From<TimeDelta> for TimeSpan {
    fn from(value: TimeDelta) -> Self {
        TimeSpan(value)
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// encoded as [whole seconds, subsecond nanos], both carrying the sign
impl<C> minicbor::Encode<C> for TimeSpan {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(2)?
            .i64(self.0.num_seconds())?
            .i32(self.0.subsec_nanos())?
            .ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeSpan {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(2) {
            return Err(minicbor::decode::Error::message("expected [secs, nanos] time span"));
        }
        let secs = d.i64()?;
        let nanos = d.i32()?;

        TimeDelta::try_seconds(secs)
            .and_then(|whole| whole.checked_add(&TimeDelta::nanoseconds(i64::from(nanos))))
            .map(TimeSpan)
            .ok_or(minicbor::decode::Error::message("time span out of range"))
    }
}
