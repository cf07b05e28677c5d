// Copyright 2024 Gigi Team.
//
// Tests for SqliteChatStore against a real SQLite file

use sea_orm::DatabaseConnection;
use tempfile::NamedTempFile;
use trek_chat::{
    BackendError, ChangeFeed, ChatBackend, FeedEvent, MessagePatch, NewConversation, NewMessage,
    ProfileService, Reactions,
};
use trek_store::migration::{Migrator, MigratorTrait};
use trek_store::{SqliteChatStore, StoreConfig};

async fn create_test_db(path: &NamedTempFile) -> DatabaseConnection {
    let db = sea_orm::Database::connect(&format!(
        "sqlite:{}?mode=rwc",
        path.path().to_str().unwrap().replace("\\", "/")
    ))
    .await
    .expect("Failed to connect to database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

async fn create_test_store(path: &NamedTempFile) -> SqliteChatStore {
    SqliteChatStore::with_connection(create_test_db(path).await)
}

fn members(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn text(conversation_id: &str, sender_id: &str, content: &str) -> NewMessage {
    NewMessage {
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        reply_to: None,
    }
}

#[tokio::test]
async fn test_open_creates_schema() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteChatStore::open(&StoreConfig::new(temp_file.path()))
        .await
        .expect("Failed to open store");

    let memberships = store.list_memberships("alice").await.unwrap();
    assert!(memberships.is_empty());
}

#[tokio::test]
async fn test_create_conversation_and_list_memberships() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let direct = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob", "alice"]))
        .await
        .unwrap();
    let group = store
        .provision_group("batch-12", "Hampta Pass, June", &members(&["alice", "carol"]))
        .await
        .unwrap();

    assert!(direct.batch_id.is_none());
    assert_eq!(group.batch_id.as_deref(), Some("batch-12"));
    assert_eq!(group.name.as_deref(), Some("Hampta Pass, June"));

    let mut ids: Vec<String> = store
        .list_memberships("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.conversation_id)
        .collect();
    ids.sort();
    let mut expected = vec![direct.id.clone(), group.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    let participants = store
        .fetch_participants(&[direct.id.clone()])
        .await
        .unwrap();
    assert_eq!(participants.len(), 2);

    let fetched = store
        .fetch_conversations(&[group.id.clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(fetched, vec![group]);
}

#[tokio::test]
async fn test_message_pages_newest_first_with_cursor() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conversation = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob"]))
        .await
        .unwrap();

    let mut sent = Vec::new();
    for i in 0..5 {
        let message = store
            .insert_message(text(&conversation.id, "alice", &format!("message {i}")))
            .await
            .unwrap();
        sent.push(message);
    }

    let latest = store.fetch_messages(&conversation.id, 2, None).await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].id, sent[4].id);
    assert_eq!(latest[1].id, sent[3].id);

    let older = store
        .fetch_messages(&conversation.id, 10, Some(latest[1].created_at))
        .await
        .unwrap();
    let ids: Vec<&str> = older.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![sent[2].id.as_str(), sent[1].id.as_str(), sent[0].id.as_str()]);

    let record = store
        .fetch_conversations(&[conversation.id.clone()])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(record.last_message_at, Some(sent[4].created_at));
}

#[tokio::test]
async fn test_insert_requires_membership() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conversation = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob"]))
        .await
        .unwrap();

    let err = store
        .insert_message(text(&conversation.id, "mallory", "let me in"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::NotFound(_)));
    assert!(store
        .fetch_messages(&conversation.id, 10, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_update_applies_patch_and_publishes() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conversation = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob"]))
        .await
        .unwrap();
    let message = store
        .insert_message(text(&conversation.id, "alice", "hello"))
        .await
        .unwrap();
    let mut subscription = store.subscribe(&conversation.id).await.unwrap();

    let mut reactions = Reactions::new();
    reactions
        .entry("🏔️".to_string())
        .or_default()
        .insert("bob".to_string());
    store
        .update_message(&message.id, MessagePatch::reactions(reactions.clone()))
        .await
        .unwrap();

    match subscription.events.recv().await {
        Some(FeedEvent::Updated(updated)) => assert_eq!(updated.reactions, reactions),
        other => panic!("unexpected feed event: {other:?}"),
    }

    store
        .update_message(&message.id, MessagePatch::soft_delete())
        .await
        .unwrap();
    let stored = store
        .fetch_messages(&conversation.id, 1, None)
        .await
        .unwrap()
        .remove(0);
    assert!(stored.is_deleted);
    assert!(stored.content.is_empty());
    assert_eq!(stored.reactions, reactions);
}

#[tokio::test]
async fn test_update_missing_message_is_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let err = store
        .update_message("nope", MessagePatch::soft_delete())
        .await
        .unwrap_err();

    assert_eq!(err, BackendError::NotFound("nope".to_string()));
}

#[tokio::test]
async fn test_feed_delivers_inserts_to_conversation_subscribers() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let a = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob"]))
        .await
        .unwrap();
    let b = store
        .create_conversation(NewConversation::default(), &members(&["alice", "carol"]))
        .await
        .unwrap();
    let mut on_a = store.subscribe(&a.id).await.unwrap();
    let mut on_b = store.subscribe(&b.id).await.unwrap();

    let sent = store.insert_message(text(&a.id, "bob", "hey")).await.unwrap();

    match on_a.events.recv().await {
        Some(FeedEvent::Inserted(message)) => assert_eq!(message, sent),
        other => panic!("unexpected feed event: {other:?}"),
    }
    assert!(on_b.events.try_recv().is_err());

    store.unsubscribe(on_a.id).await.unwrap();
    store.insert_message(text(&a.id, "bob", "still?")).await.unwrap();
    assert!(on_a.events.recv().await.is_none());
}

#[tokio::test]
async fn test_delete_participant() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conversation = store
        .create_conversation(NewConversation::default(), &members(&["alice", "bob"]))
        .await
        .unwrap();

    store
        .delete_participant(&conversation.id, "alice")
        .await
        .unwrap();

    assert!(store.list_memberships("alice").await.unwrap().is_empty());
    assert!(matches!(
        store.delete_participant(&conversation.id, "alice").await,
        Err(BackendError::NotFound(_))
    ));

    store.add_participant(&conversation.id, "alice").await.unwrap();
    store.add_participant(&conversation.id, "alice").await.unwrap();
    assert_eq!(store.list_memberships("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_profiles_upsert_and_fetch() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    store.upsert_profile("alice", "Alice", None).await.unwrap();
    store
        .upsert_profile("alice", "Alice K.", Some("https://cdn.example/alice.png"))
        .await
        .unwrap();
    store.upsert_profile("bob", "Bob", None).await.unwrap();

    let mut profiles = store
        .fetch_profiles(&members(&["alice", "bob", "ghost"]))
        .await
        .unwrap();
    profiles.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].display_name, "Alice K.");
    assert_eq!(
        profiles[0].avatar_url.as_deref(),
        Some("https://cdn.example/alice.png")
    );
    assert_eq!(profiles[1].display_name, "Bob");
}

#[tokio::test]
async fn test_session_user() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    assert_eq!(store.current_user_id().await.unwrap(), None);
    store.sign_in("alice");
    assert_eq!(
        store.current_user_id().await.unwrap().as_deref(),
        Some("alice")
    );
    store.sign_out();
    assert_eq!(store.current_user_id().await.unwrap(), None);
}
