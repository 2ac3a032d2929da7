//! Duration records as they travel to the log endpoint and sit in the
//! pending queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Learning,
    Teaching,
    Other,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Learning => "learning",
            ActivityType::Teaching => "teaching",
            ActivityType::Other => "other",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed span of active time, whole seconds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub seconds: u64,
}

impl Interval {
    /// Returns `None` when fewer than one whole second has elapsed.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        let seconds = (end - start).num_milliseconds().div_euclid(1000);
        if seconds <= 0 {
            return None;
        }
        Some(Self {
            start,
            end,
            seconds: seconds as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationRecord {
    #[serde(rename = "type")]
    pub activity: ActivityType,
    pub duration: u64,
    #[serde(rename = "client_start_time", with = "iso_millis")]
    pub client_start: DateTime<Utc>,
    #[serde(rename = "client_end_time", with = "iso_millis")]
    pub client_end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
}

impl DurationRecord {
    /// The student id is only carried for teaching time.
    pub fn new(activity: ActivityType, interval: Interval, student: Option<&str>) -> Self {
        let student = match activity {
            ActivityType::Teaching => student.map(str::to_string),
            _ => None,
        };
        Self {
            activity,
            duration: interval.seconds,
            client_start: interval.start,
            client_end: interval.end,
            student,
        }
    }
}

/// `2024-03-01T09:00:00.000Z`, the shape browsers emit for `toISOString()`.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn interval_floors_to_whole_seconds() {
        let interval = Interval::between(start(), start() + Duration::milliseconds(12_999)).unwrap();
        assert_eq!(interval.seconds, 12);
        assert!(Interval::between(start(), start() + Duration::milliseconds(999)).is_none());
        assert!(Interval::between(start(), start()).is_none());
        assert!(Interval::between(start(), start() - Duration::seconds(5)).is_none());
    }

    #[test]
    fn wire_format_uses_snake_case_and_millisecond_timestamps() {
        let interval = Interval::between(start(), start() + Duration::seconds(300)).unwrap();
        let record = DurationRecord::new(ActivityType::Learning, interval, Some("s-1"));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "learning",
                "duration": 300,
                "client_start_time": "2024-03-01T09:00:00.000Z",
                "client_end_time": "2024-03-01T09:05:00.000Z",
            })
        );
    }

    #[test]
    fn student_only_attached_to_teaching_time() {
        let interval = Interval::between(start(), start() + Duration::seconds(60)).unwrap();
        let teaching = DurationRecord::new(ActivityType::Teaching, interval, Some("s-42"));
        assert_eq!(teaching.student.as_deref(), Some("s-42"));

        let json = serde_json::to_value(&teaching).unwrap();
        assert_eq!(json["student"], "s-42");

        let other = DurationRecord::new(ActivityType::Other, interval, Some("s-42"));
        assert_eq!(other.student, None);
    }
}
