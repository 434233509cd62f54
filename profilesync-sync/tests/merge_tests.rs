use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use profilesync_audience::AudienceCompilationQueue;
use profilesync_provenance::SourceLog;
use profilesync_model::{
    AudienceTrigger, FieldDescriptor, FieldRegistry, LoadTier, LogPolicy, Profile, SourceRule,
};
use profilesync_sync::{MergeEngine, MergeError, SyncConfig};
use profilesync_types::{FieldValue, ProfileId, SourceName};
use proptest::prelude::*;
use std::sync::Arc;

fn title_policy() -> LogPolicy {
    LogPolicy {
        store_value: true,
        ..LogPolicy::default()
    }
}

fn registry() -> FieldRegistry {
    FieldRegistry::builder("UserProfile")
        .field(
            FieldDescriptor::text("Title")
                .source(SourceRule::new("HR", 1))
                .source(SourceRule::new("SelfService", 2).use_if_empty())
                .log(title_policy())
                .audience(AudienceTrigger::new("Managers").filter("Manager")),
        )
        .field(
            FieldDescriptor::text("Office")
                .source(SourceRule::new("Directory", 1))
                .source(SourceRule::new("Badge", 2).raise_priority_if_changed()),
        )
        .field(
            FieldDescriptor::bool("Contractor")
                .source(SourceRule::new("HR", 1))
                .audience(AudienceTrigger::new("Contractors").filter("true")),
        )
        .field(FieldDescriptor::list("Skills").source(SourceRule::new("SelfService", 1)))
        .field(FieldDescriptor::date("StartDate").source(SourceRule::new("HR", 1)))
        .build()
        .unwrap()
}

fn engine() -> MergeEngine {
    MergeEngine::new(Arc::new(registry()), Arc::new(AudienceCompilationQueue::new())).with_user("sync-svc")
}

fn profile() -> Profile {
    Profile::new(ProfileId::parse("CONTOSO\\ada").unwrap(), LoadTier::Full)
}

fn src(name: &str) -> SourceName {
    SourceName::new(name)
}

// ── Title scenario ───────────────────────────────────────────────

#[test]
fn title_scenario() {
    let merge = engine();
    let mut p = profile();
    let (hr, selfservice) = (src("HR"), src("SelfService"));

    assert!(merge.apply(&mut p, &hr, "Title", "Engineer").unwrap());
    assert!(!merge.apply(&mut p, &selfservice, "Title", "").unwrap());
    assert!(!merge.apply(&mut p, &selfservice, "Title", "Senior Engineer").unwrap());
    assert_eq!(p.value("Title"), FieldValue::Text("Engineer".into()));

    assert!(merge.apply(&mut p, &hr, "Title", "Senior Engineer").unwrap());
    assert_eq!(p.value("Title"), FieldValue::Text("Senior Engineer".into()));

    let entry = p.provenance("SourceLog", "Title").unwrap();
    assert_eq!(entry.source, hr);
    assert_eq!(entry.user, "sync-svc");
    assert_eq!(entry.history.len(), 1);
    assert_eq!(entry.history[0].source, hr);
    assert_eq!(entry.history[0].value.as_deref(), Some("Engineer"));
}

#[test]
fn lower_priority_writes_unowned_field() {
    let merge = engine();
    let mut p = profile();
    assert!(merge.apply(&mut p, &src("SelfService"), "Title", "Engineer").unwrap());
    assert_eq!(p.provenance("SourceLog", "Title").unwrap().source, src("SelfService"));

    // The better source takes over.
    assert!(merge.apply(&mut p, &src("HR"), "Title", "Architect").unwrap());
    assert_eq!(p.provenance("SourceLog", "Title").unwrap().source, src("HR"));
}

#[test]
fn use_if_empty_clears_field() {
    let merge = engine();
    let mut p = profile();
    let selfservice = src("SelfService");
    merge.apply(&mut p, &selfservice, "Title", "Engineer").unwrap();
    assert!(merge.apply(&mut p, &selfservice, "Title", "").unwrap());
    assert_eq!(p.value("Title"), FieldValue::Text(String::new()));
}

#[test]
fn empty_value_ignored_without_use_if_empty() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap();
    assert!(!merge.apply(&mut p, &src("HR"), "Title", FieldValue::Empty).unwrap());
    assert_eq!(p.value("Title"), FieldValue::Text("Engineer".into()));
}

// ── Idempotence and change tracking ──────────────────────────────

#[test]
fn same_value_twice_changes_once() {
    let merge = engine();
    let mut p = profile();
    assert!(merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap());
    let count = p.change_count();
    assert!(!merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap());
    assert_eq!(p.change_count(), count);
}

#[test]
fn write_marks_field_and_log_changed() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap();
    assert!(p.is_changed("Title"));
    assert!(p.is_changed("SourceLog"));
}

#[test]
fn timestamp_recorded_when_policy_stores_dates() {
    let merge = engine();
    let mut p = profile();
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    merge
        .apply_at(&mut p, &src("HR"), "Title", "Engineer".into(), at)
        .unwrap();
    assert_eq!(p.provenance("SourceLog", "Title").unwrap().updated_at, Some(at));
}

#[test]
fn sub_second_date_change_detected() {
    let merge = engine();
    let mut p = profile();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    let later = start + Duration::milliseconds(500);
    assert!(merge.apply(&mut p, &src("HR"), "StartDate", start).unwrap());
    assert!(merge.apply(&mut p, &src("HR"), "StartDate", later).unwrap());
    assert_eq!(p.value("StartDate"), FieldValue::Date(later));
}

#[test]
fn stamps_survive_log_encoding() {
    let merge = engine();
    let mut p = profile();
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap() + Duration::nanoseconds(671_174_323);
    merge
        .apply_at(&mut p, &src("HR"), "Title", "Engineer".into(), at)
        .unwrap();
    merge.apply(&mut p, &src("HR"), "Title", "Senior Engineer").unwrap();

    let log = p.log("SourceLog").unwrap();
    assert_eq!(SourceLog::decode(&log.encode().text), *log);
    let entry = p.provenance("SourceLog", "Title").unwrap();
    assert_eq!(entry.history[0].updated_at, Some(at - Duration::nanoseconds(671_174_323)));
}

#[test]
fn configured_user_recorded() {
    let config = SyncConfig {
        updating_user: "nightly".into(),
        ..SyncConfig::default()
    };
    let merge = MergeEngine::from_config(Arc::new(registry()), Arc::new(AudienceCompilationQueue::new()), &config);
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap();
    assert_eq!(p.provenance("SourceLog", "Title").unwrap().user, "nightly");
}

// ── Escalation ───────────────────────────────────────────────────

#[test]
fn escalating_source_overrides_when_its_value_changes() {
    let merge = engine();
    let mut p = profile();
    let (directory, badge) = (src("Directory"), src("Badge"));

    merge.apply(&mut p, &directory, "Office", "Building 1").unwrap();
    // First proposal from Badge is a change relative to its empty hash.
    assert!(merge.apply(&mut p, &badge, "Office", "Building 7").unwrap());
    assert_eq!(p.value("Office"), FieldValue::Text("Building 7".into()));
    assert!(p.hash_log_changed());

    merge.apply(&mut p, &directory, "Office", "Building 1").unwrap();
    // Unchanged Badge value does not escalate again.
    assert!(!merge.apply(&mut p, &badge, "Office", "Building 7").unwrap());
    assert_eq!(p.value("Office"), FieldValue::Text("Building 1".into()));

    assert!(merge.apply(&mut p, &badge, "Office", "Building 9").unwrap());
    assert_eq!(p.value("Office"), FieldValue::Text("Building 9".into()));
}

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn unknown_field_rejected() {
    let err = engine().apply(&mut profile(), &src("HR"), "Shoe", "42").unwrap_err();
    assert_eq!(err, MergeError::UnknownField("Shoe".into()));
}

#[test]
fn unlisted_source_rejected() {
    let err = engine().apply(&mut profile(), &src("Badge"), "Title", "x").unwrap_err();
    assert!(matches!(err, MergeError::SourceNotPermitted { .. }));
}

#[test]
fn partial_profile_rejected() {
    let mut p = Profile::new(ProfileId::parse("ada").unwrap(), LoadTier::Partial);
    let err = engine().apply(&mut p, &src("HR"), "Title", "x").unwrap_err();
    assert!(matches!(err, MergeError::PartialProfile(_)));
}

#[test]
fn unparseable_value_rejected() {
    let err = engine().apply(&mut profile(), &src("HR"), "Contractor", "maybe").unwrap_err();
    assert!(matches!(err, MergeError::InvalidValue { .. }));
}

#[test]
fn text_coerced_to_declared_type() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Contractor", "yes").unwrap();
    assert_eq!(p.value("Contractor"), FieldValue::Bool(true));
}

// ── Audience queueing ────────────────────────────────────────────

#[test]
fn filtered_audience_queued_when_value_matches() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap();
    assert!(merge.queue().is_empty());
    merge.apply(&mut p, &src("HR"), "Title", "Engineering Manager").unwrap();
    assert_eq!(merge.queue().snapshot(), vec!["Managers".to_string()]);
}

#[test]
fn filtered_audience_queued_when_old_value_matched() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Title", "Manager").unwrap();
    assert_eq!(merge.queue().pop().as_deref(), Some("Managers"));
    merge.apply(&mut p, &src("HR"), "Title", "Engineer").unwrap();
    assert!(merge.queue().contains("Managers"));
}

#[test]
fn boolean_field_always_queues() {
    let merge = engine();
    let mut p = profile();
    merge.apply(&mut p, &src("HR"), "Contractor", false).unwrap();
    assert!(merge.queue().contains("Contractors"));
}

// ── History bound ────────────────────────────────────────────────

#[test]
fn history_never_exceeds_policy() {
    let merge = engine();
    let mut p = profile();
    for i in 0..20 {
        merge.apply(&mut p, &src("HR"), "Title", format!("Title {i}")).unwrap();
    }
    let entry = p.provenance("SourceLog", "Title").unwrap();
    assert_eq!(entry.history.len(), LogPolicy::default().history_length);
    assert_eq!(entry.history.last().unwrap().value.as_deref(), Some("Title 18"));
}

// ── Properties ───────────────────────────────────────────────────

/// HR proposes lower-case titles, SelfService upper-case ones, so the two
/// never propose the same non-empty value.
fn proposal() -> impl Strategy<Value = (bool, String)> {
    (any::<bool>(), "[a-m]{0,6}").prop_map(|(from_hr, v)| if from_hr { (true, v) } else { (false, v.to_uppercase()) })
}

proptest! {
    /// Once HR owns the title, SelfService never changes it.
    #[test]
    fn better_owner_is_never_overwritten(proposals in prop::collection::vec(proposal(), 1..30)) {
        let merge = engine();
        let mut p = profile();
        let (hr, selfservice) = (src("HR"), src("SelfService"));
        let mut hr_value: Option<String> = None;
        for (from_hr, value) in proposals {
            if from_hr {
                merge.apply(&mut p, &hr, "Title", value.as_str()).unwrap();
                if !value.is_empty() {
                    hr_value = Some(value);
                }
            } else {
                merge.apply(&mut p, &selfservice, "Title", value.as_str()).unwrap();
            }
            if let Some(expected) = &hr_value {
                prop_assert_eq!(p.value("Title").to_comparable(), expected.clone());
                prop_assert_eq!(p.provenance("SourceLog", "Title").map(|e| e.source.clone()), Some(hr.clone()));
            }
        }
    }

    #[test]
    fn applying_twice_is_idempotent(value in "[a-zA-Z ]{0,12}") {
        let merge = engine();
        let mut p = profile();
        merge.apply(&mut p, &src("HR"), "Title", value.as_str()).unwrap();
        let snapshot = (p.value("Title"), p.provenance("SourceLog", "Title").cloned());
        prop_assert!(!merge.apply(&mut p, &src("HR"), "Title", value.as_str()).unwrap());
        prop_assert_eq!((p.value("Title"), p.provenance("SourceLog", "Title").cloned()), snapshot);
    }
}
