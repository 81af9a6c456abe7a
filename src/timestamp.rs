use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDateTime, Offset, SubsecRound, TimeZone, Utc,
};
use chrono_tz::Europe::Zurich;

/// Wall-clock instant carrying the UTC offset it was observed with.
pub type Timestamp = DateTime<FixedOffset>;

/// On-disk representation, e.g. `2026-01-06T07:30:00+01:00`.
pub const FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S%:z";

const LOCAL_FORMATS: &[&'static str] = &[
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Current time in Swiss local time, truncated to the second.
pub fn now() -> Timestamp {
    local(Utc::now())
}

pub fn local(ts: DateTime<Utc>) -> Timestamp {
    let zurich = ts.with_timezone(&Zurich);
    zurich.with_timezone(&zurich.offset().fix()).trunc_subsecs(0)
}

fn from_local(naive: NaiveDateTime) -> Option<Timestamp> {
    match Zurich.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
            Some(dt.with_timezone(&dt.offset().fix()))
        }
        LocalResult::None => None,
    }
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    LOCAL_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

/// Parses either an RFC 3339 timestamp or a naive Swiss local time.
pub fn parse_local(s: &str) -> Option<Timestamp> {
    let s = s.trim();

    DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| parse_naive(s).and_then(from_local))
        .map(|ts| ts.trunc_subsecs(0))
}

/// Parses either an RFC 3339 timestamp or a naive UTC time.
pub fn parse_utc(s: &str) -> Option<Timestamp> {
    let s = s.trim();

    DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| parse_naive(s).map(|naive| Utc.from_utc_datetime(&naive).into()))
        .map(|ts| ts.trunc_subsecs(0))
}

/// `serde(with = ...)` adapter writing [`FORMAT`].
pub mod format {
    use chrono::DateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{Timestamp, FORMAT};

    pub fn serialize<S>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s).map_err(de::Error::custom)
    }
}
