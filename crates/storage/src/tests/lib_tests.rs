use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn missing_key_reads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let value = storage.get_value("session.token").await.expect("read");
    assert!(value.is_none());
}

#[tokio::test]
async fn round_trips_a_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_value("session.token", "tok-1")
        .await
        .expect("write");
    let value = storage.get_value("session.token").await.expect("read");
    assert_eq!(value.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn overwrites_existing_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.put_value("session.token", "old").await.expect("v1");
    storage.put_value("session.token", "new").await.expect("v2");
    let value = storage.get_value("session.token").await.expect("read");
    assert_eq!(value.as_deref(), Some("new"));
}

#[tokio::test]
async fn delete_removes_only_the_named_key() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.put_value("a", "1").await.expect("a");
    storage.put_value("b", "2").await.expect("b");
    storage.delete_value("a").await.expect("delete");
    assert!(storage.get_value("a").await.expect("read a").is_none());
    assert_eq!(
        storage.get_value("b").await.expect("read b").as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn put_values_writes_all_entries() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_values(&[("session.token", "tok"), ("session.user", "{\"id\":1}")])
        .await
        .expect("write pair");
    assert_eq!(
        storage
            .get_value("session.token")
            .await
            .expect("token")
            .as_deref(),
        Some("tok")
    );
    assert_eq!(
        storage
            .get_value("session.user")
            .await
            .expect("user")
            .as_deref(),
        Some("{\"id\":1}")
    );
}

#[tokio::test]
async fn delete_values_clears_all_keys() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_values(&[("session.token", "tok"), ("session.user", "u")])
        .await
        .expect("write pair");
    storage
        .delete_values(&["session.token", "session.user"])
        .await
        .expect("clear");
    assert!(storage
        .get_value("session.token")
        .await
        .expect("token")
        .is_none());
    assert!(storage
        .get_value("session.user")
        .await
        .expect("user")
        .is_none());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("cache.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}
