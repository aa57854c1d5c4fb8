use std::sync::Arc;

use sea_orm::ConnectionTrait;
use tokio_util::sync::CancellationToken;

use engine::{AggregatorError, Category, Classifier, EngineError, MoneyCents, TransactionSyncPage};

mod common;

use common::{
    ScriptedClassifier, coffee, count_rows, engine_with_classifier, engine_with_db, link, page,
    purchase,
};

#[tokio::test]
async fn sync_applies_every_page_and_stores_the_last_cursor() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;

    h.aggregator.push_page(page(
        vec![coffee("a", "t1", 2_500), coffee("a", "t2", 1_200)],
        "c1",
        true,
    ));
    h.aggregator
        .push_page(page(vec![coffee("a", "t3", 900)], "c2", false));

    let synced = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(synced, 3);
    assert_eq!(count_rows(&h.db, "transactions").await, 3);
    assert_eq!(h.aggregator.requested_cursors(), vec!["", "", "c1"]);

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.cursor, "c2");
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
    assert!(status.last_sync_at.is_some());

    let stored = h.engine.transaction("t1").await.unwrap();
    assert_eq!(stored.account_id, f.checking.id);
    assert_eq!(stored.amount, MoneyCents::new(2_500));
    assert_eq!(stored.category, Category::Dining);
}

#[tokio::test]
async fn failed_page_keeps_the_cursor_of_the_last_applied_page() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;

    h.aggregator.push_page(page(
        vec![coffee("a", "t1", 2_500), coffee("a", "t2", 1_200)],
        "c1",
        true,
    ));
    h.aggregator
        .push_error(AggregatorError::Request("timeout".to_string()));

    let err = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.synced, 2);
    assert_eq!(
        err.source,
        EngineError::Aggregator(AggregatorError::Request("timeout".to_string()))
    );

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.cursor, "c1");
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.unwrap().contains("timeout"));
    // Page 1 stays applied.
    assert_eq!(count_rows(&h.db, "transactions").await, 2);

    h.aggregator
        .push_page(page(vec![coffee("a", "t3", 900)], "c2", false));
    let synced = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(synced, 1);
    assert_eq!(h.aggregator.requested_cursors(), vec!["", "", "c1", "c1"]);

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.cursor, "c2");
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn consecutive_failures_accumulate() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;

    for _ in 0..3 {
        h.aggregator
            .push_error(AggregatorError::Request("bank down".to_string()));
        h.engine
            .sync_item_transactions(f.item_id, &CancellationToken::new())
            .await
            .unwrap_err();
    }

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.cursor, "");
    assert!(status.never_synced());
}

#[tokio::test]
async fn unreadable_cursor_is_recorded_as_a_failure() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    let calls = h.aggregator.sync_calls();
    h.db
        .execute_unprepared("UPDATE sync_cursors SET last_sync_at = 'not a timestamp'")
        .await
        .unwrap();

    let err = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.source, EngineError::Database(_)));
    assert_eq!(err.synced, 0);
    assert_eq!(h.aggregator.sync_calls(), calls);

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.is_some());
    assert!(status.last_sync_at.is_some());
}

#[tokio::test]
async fn replayed_page_does_not_duplicate_transactions() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    let token = CancellationToken::new();

    let replayed = page(vec![coffee("a", "t1", 2_500)], "c1", false);
    h.aggregator.push_page(replayed.clone());
    h.aggregator.push_page(replayed);

    h.engine
        .sync_item_transactions(f.item_id, &token)
        .await
        .unwrap();
    h.engine
        .sync_item_transactions(f.item_id, &token)
        .await
        .unwrap();

    assert_eq!(count_rows(&h.db, "transactions").await, 1);
}

#[tokio::test]
async fn modified_and_removed_transactions_are_applied() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    let token = CancellationToken::new();

    h.aggregator.push_page(page(
        vec![coffee("a", "t1", 2_500), coffee("a", "t2", 1_200)],
        "c1",
        false,
    ));
    h.engine
        .sync_item_transactions(f.item_id, &token)
        .await
        .unwrap();

    let mut corrected = coffee("a", "t1", 3_100);
    corrected.name = "STARBUCKS #42".to_string();
    h.aggregator.push_page(TransactionSyncPage {
        modified: vec![corrected, coffee("a", "t-unknown", 700)],
        removed: vec!["t2".to_string()],
        next_cursor: "c2".to_string(),
        ..TransactionSyncPage::default()
    });
    let synced = h
        .engine
        .sync_item_transactions(f.item_id, &token)
        .await
        .unwrap();
    assert_eq!(synced, 0);

    let t1 = h.engine.transaction("t1").await.unwrap();
    assert_eq!(t1.amount, MoneyCents::new(3_100));
    assert_eq!(t1.name, "STARBUCKS #42");
    assert_eq!(
        h.engine.transaction("t2").await.unwrap_err(),
        EngineError::KeyNotFound("transaction not exists".to_string())
    );
    // Modifications of transactions never seen are skipped.
    assert!(h.engine.transaction("t-unknown").await.is_err());
    assert_eq!(count_rows(&h.db, "transactions").await, 1);
}

#[tokio::test]
async fn transactions_of_unknown_accounts_are_skipped() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;

    h.aggregator.push_page(page(
        vec![coffee("nobody", "t1", 2_500), coffee("a", "t2", 1_200)],
        "c1",
        false,
    ));
    let synced = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(synced, 1);
    assert!(h.engine.transaction("t1").await.is_err());
    assert!(h.engine.transaction("t2").await.is_ok());
    assert_eq!(h.engine.sync_status(f.item_id).await.unwrap().cursor, "c1");
}

#[tokio::test]
async fn classifier_answers_win_and_failures_fall_back_to_keywords() {
    let classifier = Arc::new(
        ScriptedClassifier::default()
            .answer("Blue Bottle", Category::Dining)
            .failing("Flaky Shop"),
    );
    let h = engine_with_classifier(Some(classifier.clone() as Arc<dyn Classifier>)).await;
    let f = link(&h, "a").await;

    h.aggregator.push_page(page(
        vec![
            purchase("a", "t1", "Blue Bottle", 650, &["Shops"]),
            purchase("a", "t2", "Flaky Shop", 4_000, &["Shops", "Clothing"]),
            purchase("a", "t3", "Mystery", 2_000, &["Recreation", "Movie Theater"]),
        ],
        "c1",
        false,
    ));
    let synced = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(synced, 3);

    let category = |id: &'static str| {
        let engine = h.engine.clone();
        async move { engine.transaction(id).await.unwrap().category }
    };
    assert_eq!(category("t1").await, Category::Dining);
    assert_eq!(category("t2").await, Category::Shopping);
    assert_eq!(category("t3").await, Category::Entertainment);
    // One answer, then two attempts for each failing merchant.
    assert_eq!(classifier.calls(), 5);
}

#[tokio::test]
async fn without_classifier_categories_come_from_hints() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;

    h.aggregator.push_page(page(
        vec![
            coffee("a", "t1", 2_500),
            purchase("a", "t2", "Payroll", -250_000, &["Transfer", "Payroll"]),
            purchase("a", "t3", "Corner", 300, &[]),
        ],
        "c1",
        false,
    ));
    h.engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        h.engine.transaction("t1").await.unwrap().category,
        Category::Dining
    );
    assert_eq!(
        h.engine.transaction("t2").await.unwrap().category,
        Category::Transfer
    );
    assert_eq!(
        h.engine.transaction("t3").await.unwrap().category,
        Category::Misc
    );
}

#[tokio::test]
async fn balances_are_refreshed_after_a_successful_sync() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    assert_eq!(f.checking.current_balance, MoneyCents::new(100_000));

    h.aggregator.set_balance("a-checking", 12_345);
    h.engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap();

    let accounts = h.engine.accounts(f.user_id).await.unwrap();
    let checking = accounts.iter().find(|a| a.id == f.checking.id).unwrap();
    assert_eq!(checking.current_balance, MoneyCents::new(12_345));
}

#[tokio::test]
async fn inactive_items_are_not_synced() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    h.engine.deactivate_item(f.user_id, f.item_id).await.unwrap();
    let calls = h.aggregator.sync_calls();

    let err = h
        .engine
        .sync_item_transactions(f.item_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.source, EngineError::InactiveItem(f.item_id.to_string()));

    let total = h
        .engine
        .sync_all_user_items(f.user_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(total, 0);
    assert_eq!(h.aggregator.sync_calls(), calls);
}

#[tokio::test]
async fn cancelled_sync_is_not_counted_as_a_failure() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    h.aggregator
        .push_page(page(vec![coffee("a", "t1", 2_500)], "c1", false));

    let token = CancellationToken::new();
    token.cancel();
    let err = h
        .engine
        .sync_item_transactions(f.item_id, &token)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let status = h.engine.sync_status(f.item_id).await.unwrap();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.cursor, "");
    assert!(h.engine.transaction("t1").await.is_err());
}

#[tokio::test]
async fn sync_all_user_items_adds_up_every_item() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    h.engine
        .link_item(f.user_id, "b")
        .await
        .unwrap()
        .initial_sync
        .wait()
        .await
        .unwrap();

    // Items sync oldest first: "a" takes the first page, "b" the second.
    h.aggregator.push_page(page(
        vec![coffee("a", "t1", 2_500), coffee("a", "t2", 900)],
        "a1",
        false,
    ));
    h.aggregator
        .push_page(page(vec![coffee("b", "t3", 1_100)], "b1", false));

    let total = h
        .engine
        .sync_all_user_items(f.user_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(h.engine.user_items(f.user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failing_item_is_skipped_by_sync_all_user_items() {
    let h = engine_with_db().await;
    let f = link(&h, "a").await;
    h.engine
        .link_item(f.user_id, "b")
        .await
        .unwrap()
        .initial_sync
        .wait()
        .await
        .unwrap();

    h.aggregator
        .push_error(AggregatorError::Request("item a down".to_string()));
    h.aggregator
        .push_page(page(vec![coffee("b", "t1", 1_100)], "b1", false));

    let total = h
        .engine
        .sync_all_user_items(f.user_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(
        h.engine
            .sync_status(f.item_id)
            .await
            .unwrap()
            .consecutive_failures,
        1
    );
}
