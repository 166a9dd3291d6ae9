//! Exercises the store against a real Postgres instance. Ignored by default; run with
//! `DATABASE_URL=postgres://... cargo test -p relayer-store -- --ignored`.

use relayer_core::domain::{SignedTransfer, TransferStatus};
use relayer_core::validator::NonceStore;
use relayer_store::{Store, StatusUpdate};

fn sample(nonce: &str) -> SignedTransfer {
    SignedTransfer {
        id: None,
        nonce: nonce.to_owned(),
        from: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
        to: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into(),
        amount: "1.0".into(),
        deadline: 9_999_999_999,
        signature: "0xdeadbeef".into(),
        contract_address: "0xcccccccccccccccccccccccccccccccccccccccc"[..42].into(),
        token_address: None,
        status: TransferStatus::Received,
        tx_hash: None,
        block_number: None,
        retry_count: 0,
        error_message: None,
        created_at: chrono::Utc::now(),
        validated_at: None,
        submitted_at: None,
        confirmed_at: None,
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn insert_then_find_round_trips() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
    let store = Store::connect(&url).await.expect("connect");

    let transfer = sample("0xroundtrip1");
    let id = store.insert_received(&transfer).await.expect("insert");

    let found = store.find_by_id(id).await.expect("query").expect("present");
    assert_eq!(found.nonce, transfer.nonce);
    assert_eq!(found.status, TransferStatus::Received);

    let events = store.list_events(id).await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, "received");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_nonce_is_rejected() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
    let store = Store::connect(&url).await.expect("connect");

    let transfer = sample("0xduplicate1");
    store.insert_received(&transfer).await.expect("first insert");

    let err = store.insert_received(&transfer).await.expect_err("second insert must fail");
    assert!(matches!(err, relayer_store::error::StoreError::DuplicateNonce));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn status_transition_sets_timestamps() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
    let store = Store::connect(&url).await.expect("connect");

    let transfer = sample("0xtransition1");
    let id = store.insert_received(&transfer).await.expect("insert");

    store
        .update_status(&StatusUpdate {
            id,
            status: TransferStatus::Validated,
            tx_hash: None,
            block_number: None,
            retry_count: 0,
            error_message: None,
        })
        .await
        .expect("update");

    let found = store.find_by_id(id).await.expect("query").expect("present");
    assert_eq!(found.status, TransferStatus::Validated);
    assert!(found.validated_at.is_some());
    assert!(!store.nonce_taken(&transfer.nonce, Some(id)).await.expect("nonce check"));
    assert!(store.nonce_taken(&transfer.nonce, None).await.expect("nonce check"));
}
