use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use generation_gateway::ledger::{
    AccountChange, AccountStatus, BillingApplyOutcome, BillingMutation, LedgerService,
    LedgerStore, PaymentRecord, PgLedgerStore, TransactionReason,
};
use sqlx::PgPool;

// key: ledger-pg-tests -> atomic reserve, absolute refill, dedup
fn ledger(pool: &PgPool) -> LedgerService {
    LedgerService::new(
        Arc::new(PgLedgerStore::new(pool.clone())),
        10,
        Duration::from_secs(5),
    )
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_reservations_serialize_on_the_row(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = ledger(&pool);
    ledger.ensure_account(1).await.unwrap();

    let mut handles = Vec::new();
    for idx in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(1, 3, &format!("job-{idx}")).await.unwrap()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().reserved {
            granted += 1;
        }
    }

    // 10 credits cover exactly three 3-credit charges
    assert_eq!(granted, 3);
    let account = ledger.account(1).await.unwrap().unwrap();
    assert_eq!(account.balance, 1);

    let delta_sum: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(delta), 0)::BIGINT FROM credit_transactions WHERE account_id = $1")
            .bind(1_i32)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(delta_sum, account.balance - 10);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn refill_sets_balance_and_log_is_append_only(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let ledger = ledger(&pool);
    ledger.ensure_account(2).await.unwrap();

    for payment in ["pay-1", "pay-2"] {
        ledger
            .refill(2, 400, TransactionReason::AdminAdjustment, payment)
            .await
            .unwrap();
    }
    assert_eq!(ledger.account(2).await.unwrap().unwrap().balance, 400);

    let tampered = sqlx::query("UPDATE credit_transactions SET delta = 0 WHERE account_id = $1")
        .bind(2_i32)
        .execute(&pool)
        .await;
    assert!(tampered.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn billing_renewal_is_atomic_and_deduplicated(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    store.open_account(3, 37).await.unwrap();
    let ledger = LedgerService::new(store, 10, Duration::from_secs(5));

    let mutation = BillingMutation {
        dedup_key: "evt_yearly".to_string(),
        event_type: "subscription.paid".to_string(),
        account_id: 3,
        change: AccountChange::Renew {
            payment: PaymentRecord {
                external_id: "sub_3".to_string(),
                account_id: 3,
                customer_id: None,
                product_id: "prod_pro_yearly".to_string(),
                amount_cents: 19_900,
                currency: "USD".to_string(),
            },
            credits: 4_800,
            tier: "pro".to_string(),
            renewal_at: Utc.with_ymd_and_hms(2027, 10, 17, 0, 0, 0).single(),
            status: AccountStatus::Active,
        },
    };

    let BillingApplyOutcome::Applied(account) = ledger.apply_billing(&mutation).await.unwrap()
    else {
        panic!("first delivery should apply");
    };
    assert_eq!(account.balance, 4_800);
    assert_eq!(account.tier, "pro");
    assert_eq!(
        ledger.apply_billing(&mutation).await.unwrap(),
        BillingApplyOutcome::Duplicate
    );

    let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_payments WHERE account_id = $1")
        .bind(3_i32)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(payments, 1);
    let log = ledger.transactions(3, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].delta, 4_763);
}
