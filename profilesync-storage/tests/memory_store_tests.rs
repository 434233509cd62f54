use pretty_assertions::assert_eq;
use profilesync_model::{ProfileStore, SearchIndex, StoreError, StoredValue};
use profilesync_storage::{MemoryProfileStore, MemorySearchIndex};
use profilesync_types::{FieldValue, ProfileId};

fn id(s: &str) -> ProfileId {
    ProfileId::parse(s).unwrap()
}

// ── Profiles ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_exists() {
    let store = MemoryProfileStore::new();
    let ada = id("CONTOSO\\ada");
    assert!(!store.profile_exists(&ada).await.unwrap());
    store.create_profile(&ada).await.unwrap();
    assert!(store.profile_exists(&ada).await.unwrap());
    assert_eq!(store.list_profiles().await.unwrap(), vec![ada]);
}

#[tokio::test]
async fn create_twice_fails() {
    let store = MemoryProfileStore::new();
    let ada = id("ada");
    store.create_profile(&ada).await.unwrap();
    let err = store.create_profile(&ada).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn unknown_profile_is_not_found() {
    let store = MemoryProfileStore::new();
    let err = store.get_field(&id("ghost"), "Title").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    let err = store.set_field(&id("ghost"), "Title", "x".into()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

// ── Staged writes ────────────────────────────────────────────────

#[tokio::test]
async fn writes_visible_after_commit() {
    let store = MemoryProfileStore::new();
    let ada = id("ada");
    store.create_profile(&ada).await.unwrap();
    store.set_field(&ada, "Title", "Engineer".into()).await.unwrap();
    assert_eq!(store.value(&ada, "Title"), None);

    store.commit(&ada).await.unwrap();
    assert_eq!(store.value(&ada, "Title"), Some(FieldValue::Text("Engineer".into())));
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn rejected_key_fails_write() {
    let store = MemoryProfileStore::new();
    let ada = id("ada");
    store.create_profile(&ada).await.unwrap();
    store.reject("Title");
    let err = store.set_field(&ada, "Title", "x".into()).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected { ref key, .. } if key == "Title"));
}

// ── Attributes ───────────────────────────────────────────────────

#[tokio::test]
async fn attributes_reported_without_value() {
    let store = MemoryProfileStore::new().with_attributes("Skills", true, false);
    let ada = id("ada");
    store.create_profile(&ada).await.unwrap();

    let stored = store.get_field(&ada, "Skills").await.unwrap();
    assert_eq!(
        stored,
        Some(StoredValue {
            value: FieldValue::Empty,
            multi_valued: true,
            required: false,
        })
    );
    assert_eq!(store.get_field(&ada, "Title").await.unwrap(), None);
}

#[tokio::test]
async fn seeded_values_readable() {
    let store = MemoryProfileStore::new();
    let ada = id("ada");
    store.insert(&ada, [("Title".to_string(), FieldValue::from("Engineer"))]);
    let stored = store.get_field(&ada, "Title").await.unwrap().unwrap();
    assert_eq!(stored.value, FieldValue::Text("Engineer".into()));
}

// ── Search index ─────────────────────────────────────────────────

#[tokio::test]
async fn search_snapshot_returns_rows() {
    let index = MemorySearchIndex::default();
    index.push(&[("AccountName", "ada"), ("JobTitle", "Engineer")]);
    index.push(&[("AccountName", "bob")]);

    let rows = index.snapshot().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("JobTitle").map(String::as_str), Some("Engineer"));
}
