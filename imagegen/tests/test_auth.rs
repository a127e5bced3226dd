mod common;

use common::mock_server::{alice_session, ImageGenMock, TEST_TOKEN};
use imagegen::types::RegisterRequest;
use imagegen::{ApiError, MemorySessionStore, SessionEvent, SessionStore};
use std::sync::Arc;
use time::macros::datetime;

#[tokio::test]
async fn test_login_valid_stores_session() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("auth/login_valid.json").await;

    let store = Arc::new(MemorySessionStore::new());
    let client = mock.client_with_store(store.clone());
    let session = client.login("a@b.com", "secret1").await.unwrap();

    assert_eq!(session.credential.expose(), TEST_TOKEN);
    assert_eq!(session.user.username, "alice");
    assert_eq!(store.load(), Some(session));
    assert!(client.is_authenticated());

    let requests = mock.received().await;
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"email": "a@b.com", "password": "secret1"}));
}

#[tokio::test]
async fn test_login_invalid_surfaces_server_message() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("auth/login_invalid.json").await;

    let client = mock.client();
    let err = client.login("a@b.com", "wrong").await.unwrap_err();

    assert!(matches!(err, ApiError::Authentication(ref m) if m == "Invalid email or password"));
    assert!(client.session().is_none());
}

#[tokio::test]
async fn test_login_blank_fields_stay_local() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("auth/login_valid.json").await;

    let client = mock.client();
    let err = client.login("  ", "secret1").await.unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
    assert!(mock.received().await.is_empty());
}

#[tokio::test]
async fn test_register_valid_signs_in() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("auth/register_valid.json").await;

    let client = mock.client();
    let session = client
        .register(&RegisterRequest {
            username: "bob".into(),
            email: "bob@example.com".into(),
            password: "hunter22".into(),
        })
        .await
        .unwrap();

    assert_eq!(session.user.id, 2);
    assert_eq!(client.session().unwrap().credential.expose(), "tok456");
}

#[tokio::test]
async fn test_register_duplicate_is_authentication_error() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("auth/register_duplicate.json").await;

    let client = mock.client();
    let err = client
        .register(&RegisterRequest {
            username: "alice".into(),
            email: "a@b.com".into(),
            password: "secret1".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Username or email already exists");
    assert!(client.session().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_and_notifies() {
    let mock = ImageGenMock::start().await;
    let store = Arc::new(MemorySessionStore::with_session(alice_session()));
    let client = mock.client_with_store(store.clone());
    let mut events = client.subscribe();

    client.sign_out();
    client.sign_out();

    assert!(store.load().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
}

#[tokio::test]
async fn test_profile_includes_timestamps() {
    let mock = ImageGenMock::start().await;
    mock.mount_fixture("profile/profile_valid.json").await;

    let (client, _store) = mock.signed_in_client();
    let user = client.profile().await.unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(
        user.created_at.map(|t| t.unix_timestamp()),
        Some(datetime!(2024-03-01 09:15:00 UTC).unix_timestamp())
    );
    assert!(user.last_login.is_none());
}
