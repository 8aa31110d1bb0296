//! Duplicate detection over stored records.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use relaybridge_types::{Fingerprint, RequestRecord, RequestStatus};

/// Finds the record an identical call should collapse into.
///
/// Only records with the same fingerprint and an age within `window` count.
/// Among those, a live or successful record beats an `ERROR` one, and the most
/// recently updated wins.
pub fn find_duplicate<'a>(
    records: impl IntoIterator<Item = &'a RequestRecord>,
    fingerprint: &Fingerprint,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<&'a RequestRecord> {
    let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
    records
        .into_iter()
        .filter(|record| record.fingerprint() == fingerprint)
        .filter(|record| record.age(now) <= window)
        .max_by_key(|record| {
            (
                record.status() != RequestStatus::Error,
                record.last_updated(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybridge_types::{CallData, RemoteRequestId, SyftUrl};
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    fn record(fp: &str) -> RequestRecord {
        let call = CallData::new(
            SyftUrl::new("alice@openmined.org", "my_app", "ping").unwrap(),
            "guest@syft.local",
        )
        .unwrap();
        RequestRecord::new(Fingerprint::from_raw(fp), call)
    }

    fn aged(record: &RequestRecord, by: TimeDelta) -> RequestRecord {
        let mut value = serde_json::to_value(record).unwrap();
        value["lastUpdated"] = json!(record.last_updated() - by);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn matches_only_same_fingerprint() {
        let records = [record("fp_a"), record("fp_b")];
        let found = find_duplicate(&records, &Fingerprint::from_raw("fp_b"), HOUR, Utc::now());
        assert_eq!(found.map(|r| r.id()), Some(records[1].id()));
        assert!(
            find_duplicate(&records, &Fingerprint::from_raw("fp_c"), HOUR, Utc::now()).is_none()
        );
    }

    #[test]
    fn records_outside_window_are_ignored() {
        let stale = aged(&record("fp_a"), TimeDelta::hours(2));
        let found = find_duplicate([&stale], &Fingerprint::from_raw("fp_a"), HOUR, Utc::now());
        assert!(found.is_none());

        let fresh = aged(&record("fp_a"), TimeDelta::minutes(59));
        let found = find_duplicate([&fresh], &Fingerprint::from_raw("fp_a"), HOUR, Utc::now());
        assert!(found.is_some());
    }

    #[test]
    fn live_record_beats_newer_error() {
        let mut live = record("fp_a");
        live.accept(RemoteRequestId::new("r1").unwrap()).unwrap();
        let live = aged(&live, TimeDelta::minutes(10));

        let mut failed = record("fp_a");
        failed.fail("Error 500: boom").unwrap();

        let records = [failed, live];
        let found =
            find_duplicate(&records, &Fingerprint::from_raw("fp_a"), HOUR, Utc::now()).unwrap();
        assert_eq!(found.status(), RequestStatus::Polling);
    }

    #[test]
    fn most_recent_match_wins() {
        let older = aged(&record("fp_a"), TimeDelta::minutes(30));
        let newer = aged(&record("fp_a"), TimeDelta::minutes(5));
        let records = [older, newer];
        let found =
            find_duplicate(&records, &Fingerprint::from_raw("fp_a"), HOUR, Utc::now()).unwrap();
        assert_eq!(found.id(), records[1].id());
    }

    #[test]
    fn error_match_is_returned_when_nothing_else_matches() {
        let mut failed = record("fp_a");
        failed.fail("Error 500: boom").unwrap();
        let found = find_duplicate([&failed], &Fingerprint::from_raw("fp_a"), HOUR, Utc::now());
        assert_eq!(found.map(RequestRecord::status), Some(RequestStatus::Error));
    }
}
