//! Client-driven payment confirmation and its race with the webhook.

#![allow(clippy::unwrap_used)]

use sqlx::PgPool;

use solehaus_core::OrderStatus;
use solehaus_integration_tests::{
    FakeGateway, confirmations, intent_id, payment_succeeded, place_order, seed_variant, sign,
    stock_of, webhook_service,
};
use solehaus_storefront::db::orders;
use solehaus_storefront::services::{ConfirmError, Confirmation, WebhookAck};

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_confirmation_racing_webhook_settles_once(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 13_000, 5).await;
    let session = place_order(&pool, &gateway, &variant, 2).await;
    let intent = intent_id(session.order_id);
    gateway.set_intent_status(&intent, "succeeded");
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();

    let service = confirmations(&pool, &gateway);
    let webhooks = webhook_service(&pool);
    let body = payment_succeeded("evt_race", session.order_id, session.total_cents);
    let signature = sign(&body);
    let (confirmed, delivered) = tokio::join!(
        service.confirm(&order, &intent),
        webhooks.handle(Some(&signature), &body),
    );

    let confirmed = confirmed.unwrap();
    let delivered = match delivered.unwrap() {
        WebhookAck::Processed { outcome, .. } => outcome,
        other => panic!("unexpected ack {other:?}"),
    };
    let settled_by_confirm = confirmed == Confirmation::Settled;
    let settled_by_webhook = delivered == "settled";
    assert!(settled_by_confirm ^ settled_by_webhook);
    if settled_by_confirm {
        assert_eq!(delivered, "already_settled");
    } else {
        assert_eq!(
            confirmed,
            Confirmation::AlreadySettled {
                status: OrderStatus::Paid
            }
        );
    }

    assert_eq!(stock_of(&pool, variant.variant_id).await, 3);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_processing_payment_leaves_order_pending(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 7_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let intent = intent_id(session.order_id);
    gateway.set_intent_status(&intent, "processing");
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();

    let confirmed = confirmations(&pool, &gateway)
        .confirm(&order, &intent)
        .await
        .unwrap();

    assert_eq!(confirmed, Confirmation::Processing);
    assert_eq!(stock_of(&pool, variant.variant_id).await, 2);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_unpaid_intent_does_not_settle(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 7_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();

    let result = confirmations(&pool, &gateway)
        .confirm(&order, &intent_id(session.order_id))
        .await;

    assert!(matches!(
        result,
        Err(ConfirmError::NotSucceeded(status)) if status == "requires_payment_method"
    ));
    assert_eq!(stock_of(&pool, variant.variant_id).await, 2);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_intent_of_another_order_is_rejected(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 7_000, 4).await;
    let mine = place_order(&pool, &gateway, &variant, 1).await;
    let theirs = place_order(&pool, &gateway, &variant, 1).await;
    let other_intent = intent_id(theirs.order_id);
    gateway.set_intent_status(&other_intent, "succeeded");
    let order = orders::get(&pool, mine.order_id).await.unwrap().unwrap();

    let result = confirmations(&pool, &gateway)
        .confirm(&order, &other_intent)
        .await;

    assert!(matches!(result, Err(ConfirmError::IntentMismatch(_))));
    assert_eq!(stock_of(&pool, variant.variant_id).await, 4);
}
