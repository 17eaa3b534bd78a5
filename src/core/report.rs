//! Storage records for completed domains and calibration baselines.
//!
//! Each completed domain test produces exactly one [`TestRecord`]. The
//! record format is what storage collaborators persist and what history
//! queries read back.

use crate::core::result::{
    AudioBaseline, BaselineProfile, Domain, DomainResult, IssueTag, TouchBaseline, VisualBaseline,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// The name of this producer.
pub const PRODUCER_NAME: &str = "neuro-screen";

/// One persisted domain test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub domain: Domain,
    pub score: u8,
    /// Human-readable summary of findings
    pub details: String,
    /// Completion time, epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub issues: BTreeSet<IssueTag>,
    /// Opaque image blob (e.g. a data URL) captured with the test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Device that produced the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

impl TestRecord {
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// A persisted calibration baseline, keyed by domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    #[serde(rename = "VISUAL", default, skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualBaseline>,
    #[serde(rename = "AUDIO", default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioBaseline>,
    #[serde(rename = "TOUCH", default, skip_serializing_if = "Option::is_none")]
    pub touch: Option<TouchBaseline>,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
}

impl BaselineRecord {
    pub fn into_profile(self) -> BaselineProfile {
        BaselineProfile {
            visual: self.visual,
            audio: self.audio,
            touch: self.touch,
            captured_at: DateTime::from_timestamp_millis(self.timestamp),
        }
    }
}

/// Builds storage records from domain results.
pub struct RecordBuilder {
    instance_id: Uuid,
    producer: String,
}

impl RecordBuilder {
    /// Create a builder tagged with this host's name.
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::with_producer(format!("{PRODUCER_NAME}@{host}"))
    }

    pub fn with_producer(producer: String) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            producer,
        }
    }

    /// Get the instance ID.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Build the record for a completed domain.
    pub fn build(&self, result: &DomainResult, snapshot: Option<String>) -> TestRecord {
        TestRecord {
            id: Uuid::new_v4().to_string(),
            domain: result.domain,
            score: result.score,
            details: describe(result),
            timestamp: result.completed_at.timestamp_millis(),
            issues: result.issues.clone(),
            snapshot,
            producer: Some(self.producer.clone()),
        }
    }

    /// Build the baseline record for a calibration profile.
    pub fn baseline(&self, profile: &BaselineProfile) -> BaselineRecord {
        BaselineRecord {
            visual: profile.visual,
            audio: profile.audio,
            touch: profile.touch,
            timestamp: profile.captured_at.unwrap_or_else(Utc::now).timestamp_millis(),
        }
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary text stored alongside the score.
pub fn describe(result: &DomainResult) -> String {
    if result.raw.is_some() {
        return format!("{} calibration baseline captured", result.domain);
    }
    if result.issues.is_empty() {
        return format!("Score {}/100. No findings.", result.score);
    }
    let findings: Vec<&str> = result.issues.iter().map(|t| t.label()).collect();
    format!("Score {}/100. Findings: {}.", result.score, findings.join(", "))
}

/// Mean score per domain over records in `[now - window, now]`.
pub fn history_average(
    records: &[TestRecord],
    now: DateTime<Utc>,
    window: Duration,
) -> BTreeMap<Domain, f64> {
    let from = (now - window).timestamp_millis();
    let to = now.timestamp_millis();
    let mut sums: BTreeMap<Domain, (f64, usize)> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.timestamp >= from && r.timestamp <= to)
    {
        let entry = sums.entry(record.domain).or_insert((0.0, 0));
        entry.0 += f64::from(record.score);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(domain, (sum, n))| (domain, sum / n as f64))
        .collect()
}

/// Latest record per domain on `now`'s calendar day in `tz`.
pub fn latest_today<'a>(
    records: &'a [TestRecord],
    tz: &Tz,
    now: DateTime<Utc>,
) -> BTreeMap<Domain, &'a TestRecord> {
    let today = now.with_timezone(tz).date_naive();
    let mut latest: BTreeMap<Domain, &TestRecord> = BTreeMap::new();
    for record in records {
        let Some(at) = record.completed_at() else {
            continue;
        };
        if tz.from_utc_datetime(&at.naive_utc()).date_naive() != today {
            continue;
        }
        match latest.get(&record.domain) {
            Some(existing) if existing.timestamp >= record.timestamp => {}
            _ => {
                latest.insert(record.domain, record);
            }
        }
    }
    latest
}
