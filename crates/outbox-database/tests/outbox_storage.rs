//! On-disk behaviour of the outbox store across reopen.

use outbox_core::{Headers, NewOutboxMessage};
use outbox_database::{queries, AsyncDatabase, DatabaseError};
use tempfile::tempdir;

#[tokio::test]
async fn pending_messages_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    let db = AsyncDatabase::open(&path).await.unwrap();
    let headers = Headers::new().with("trace-id", "abc").with("trace-id", "def");
    let id = db
        .enqueue(NewOutboxMessage::new("payments", "{\"amount\":10}").headers(headers.clone()))
        .await
        .unwrap();
    db.close().await.unwrap();

    let db = AsyncDatabase::open(&path).await.unwrap();
    let pending = db.pending_messages(100).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].headers, headers);
}

#[tokio::test]
async fn delivered_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    let db = AsyncDatabase::open(&path).await.unwrap();
    let id = db.enqueue(NewOutboxMessage::new("t", "v")).await.unwrap();
    db.mark_delivered(vec![id]).await.unwrap();
    let delivered_at = db.get_message(id).await.unwrap().unwrap().delivered_at;
    db.close().await.unwrap();

    let db = AsyncDatabase::open(&path).await.unwrap();
    assert!(db.pending_messages(100).await.unwrap().is_empty());
    assert_eq!(
        db.get_message(id).await.unwrap().unwrap().delivered_at,
        delivered_at
    );
}

#[tokio::test]
async fn duplicate_idempotency_key_rejected() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    let msg = NewOutboxMessage::new("t", "v").idempotency_key("order-1");

    db.enqueue(msg.clone()).await.unwrap();
    let err = db.enqueue(msg).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Sqlite(_)));
    assert_eq!(db.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn business_write_and_event_commit_together() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();

    let id = db
        .call(|conn| {
            conn.execute_batch("CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)")?;
            let tx = conn.unchecked_transaction()?;
            tx.execute("INSERT INTO accounts (balance) VALUES (100)", [])?;
            let id = queries::enqueue_in_transaction(
                &tx,
                &NewOutboxMessage::new("accounts", "opened").partition_key("acct-1"),
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
        .unwrap();

    let stored = db.get_message(id).await.unwrap().unwrap();
    assert!(stored.is_pending());
    assert_eq!(stored.partition_key, b"acct-1");
}
