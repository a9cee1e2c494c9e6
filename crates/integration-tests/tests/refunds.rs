//! Admin refunds through the payment gateway.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use sqlx::PgPool;

use solehaus_core::{OrderEventKind, OrderStatus};
use solehaus_integration_tests::{
    FakeGateway, line_items, place_order, refunds, seed_variant, settlement,
};
use solehaus_storefront::db::{order_events, orders};
use solehaus_storefront::services::RefundError;

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_refunds_never_exceed_the_order_total(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 10_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let total = session.total_cents;
    let items = line_items(&pool, session.order_id).await;
    settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_paid", &items)
        .await
        .unwrap();

    let service = refunds(&pool, &gateway);
    let first = service
        .refund(session.order_id, Some(total - 100), "admin")
        .await
        .unwrap();
    assert_eq!(first.refunded_now_cents, total - 100);
    assert_eq!(first.status, OrderStatus::Paid);

    let second = service
        .refund(session.order_id, Some(5_000), "admin")
        .await
        .unwrap();
    assert_eq!(second.refunded_now_cents, 100);
    assert_eq!(second.refund_amount_cents, total);
    assert_eq!(second.status, OrderStatus::Refunded);

    let third = service.refund(session.order_id, None, "admin").await.unwrap();
    assert_eq!(third.refunded_now_cents, 0);
    assert_eq!(third.refund_amount_cents, total);

    assert_eq!(gateway.refunds(), vec![total - 100, 100]);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount_cents, total);
    assert!(order.refunded_at.is_some());
    let refund_events = order_events::count(&pool, session.order_id, OrderEventKind::Refund)
        .await
        .unwrap();
    assert_eq!(refund_events, 2);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_pending_order_cannot_be_refunded(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 10_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;

    let result = refunds(&pool, &gateway)
        .refund(session.order_id, None, "admin")
        .await;

    assert!(matches!(
        result,
        Err(RefundError::StateConflict {
            current: OrderStatus::Pending
        })
    ));
    assert!(gateway.refunds().is_empty());
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_non_positive_refund_is_rejected(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 10_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;

    let result = refunds(&pool, &gateway)
        .refund(session.order_id, Some(0), "admin")
        .await;

    assert!(matches!(result, Err(RefundError::InvalidAmount(_))));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_concurrent_refunds_are_both_counted(pool: PgPool) {
    let gateway = FakeGateway::new().with_refund_delay(Duration::from_millis(100));
    let variant = seed_variant(&pool, 10_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let items = line_items(&pool, session.order_id).await;
    settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_paid", &items)
        .await
        .unwrap();

    let service = refunds(&pool, &gateway);
    let (first, second) = tokio::join!(
        service.refund(session.order_id, Some(2_000), "admin"),
        service.refund(session.order_id, Some(3_000), "admin"),
    );
    first.unwrap();
    second.unwrap();

    let issued: i64 = gateway.refunds().iter().sum();
    assert_eq!(issued, 5_000);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount_cents, issued);
    let refund_events = order_events::count(&pool, session.order_id, OrderEventKind::Refund)
        .await
        .unwrap();
    assert_eq!(refund_events, 2);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_refund_landing_on_canceled_order_is_flagged(pool: PgPool) {
    let gateway = FakeGateway::new().canceling_orders_on_refund(&pool);
    let variant = seed_variant(&pool, 10_000, 2).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let items = line_items(&pool, session.order_id).await;
    settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_paid", &items)
        .await
        .unwrap();

    let result = refunds(&pool, &gateway)
        .refund(session.order_id, Some(1_500), "admin")
        .await;

    assert!(matches!(
        result,
        Err(RefundError::Reconciliation { order_id, .. }) if order_id == session.order_id
    ));
    assert_eq!(gateway.refunds(), vec![1_500]);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.refund_amount_cents, 0);

    let flagged =
        order_events::count(&pool, session.order_id, OrderEventKind::RefundReconciliation)
            .await
            .unwrap();
    assert_eq!(flagged, 1);
    let cases = orders::list_needing_reconciliation(&pool).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].order.id, session.order_id);
    assert_eq!(cases[0].kind, OrderEventKind::RefundReconciliation);
}
