use super::*;
use shared::domain::{Role, UserId};
use storage::Storage;

fn sample_user() -> UserProfile {
    UserProfile {
        user_id: UserId::new("user-1"),
        name: "Anika Rahman".to_string(),
        email: "anika@example.com".to_string(),
        role: Role::Student,
        photo_url: None,
    }
}

#[tokio::test]
async fn durable_store_round_trips_a_session() {
    let store = DurableSessionStore::initialize("sqlite::memory:")
        .await
        .expect("store");

    store
        .put_session("tok-1", &sample_user())
        .await
        .expect("put session");

    assert_eq!(store.token().await.expect("token").as_deref(), Some("tok-1"));
    assert_eq!(store.user().await.expect("user"), Some(sample_user()));
}

#[tokio::test]
async fn durable_store_clear_removes_token_and_user_together() {
    let store = DurableSessionStore::initialize("sqlite::memory:")
        .await
        .expect("store");
    store
        .put_session("tok-1", &sample_user())
        .await
        .expect("put session");

    store.clear().await.expect("clear");

    assert!(store.token().await.expect("token").is_none());
    assert!(store.user().await.expect("user").is_none());
}

#[tokio::test]
async fn durable_store_put_user_keeps_existing_token() {
    let store = DurableSessionStore::initialize("sqlite::memory:")
        .await
        .expect("store");
    store
        .put_session("tok-1", &sample_user())
        .await
        .expect("put session");

    let mut updated = sample_user();
    updated.name = "Anika R.".to_string();
    store.put_user(&updated).await.expect("put user");

    assert_eq!(store.token().await.expect("token").as_deref(), Some("tok-1"));
    assert_eq!(store.user().await.expect("user"), Some(updated));
}

#[tokio::test]
async fn durable_store_rejects_corrupt_cached_profile() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .put_value("session.user", "{not-json")
        .await
        .expect("seed corrupt value");
    let store = DurableSessionStore { store: storage };

    assert!(store.user().await.is_err());
}

#[tokio::test]
async fn in_memory_store_round_trips() {
    let store = InMemorySessionStore::new();
    store
        .put_session("tok-2", &sample_user())
        .await
        .expect("put session");
    assert_eq!(store.token().await.expect("token").as_deref(), Some("tok-2"));

    store.clear().await.expect("clear");
    assert!(store.token().await.expect("token").is_none());
    assert!(store.user().await.expect("user").is_none());
}
