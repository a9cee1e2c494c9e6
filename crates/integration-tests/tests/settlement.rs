//! Settlement against a real database: atomicity, idempotency and the
//! last-unit race.

#![allow(clippy::unwrap_used)]

use sqlx::PgPool;

use solehaus_core::{OrderEventKind, OrderStatus};
use solehaus_integration_tests::{
    FakeGateway, line_items, place_order, seed_variant, settlement, stock_of,
};
use solehaus_storefront::db::{order_events, orders};
use solehaus_storefront::services::{FulfillmentService, SettlementError, SettlementOutcome};

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_settlement_decrements_stock_and_marks_paid(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 12_000, 5).await;
    let session = place_order(&pool, &gateway, &variant, 2).await;
    let items = line_items(&pool, session.order_id).await;

    let outcome = settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_manual", &items)
        .await
        .unwrap();

    assert_eq!(outcome, SettlementOutcome::Settled);
    assert_eq!(stock_of(&pool, variant.variant_id).await, 3);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.paid_at.is_some());
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_concurrent_settlement_of_one_order_applies_once(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 9_500, 4).await;
    let session = place_order(&pool, &gateway, &variant, 2).await;
    let items = line_items(&pool, session.order_id).await;

    let service = settlement(&pool);
    let (first, second) = tokio::join!(
        service.mark_paid_transactionally(session.order_id, "pi_a", &items),
        service.mark_paid_transactionally(session.order_id, "pi_a", &items),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let settled = outcomes
        .iter()
        .filter(|o| **o == SettlementOutcome::Settled)
        .count();
    assert_eq!(settled, 1);
    assert!(outcomes.iter().any(|o| matches!(
        o,
        SettlementOutcome::AlreadySettled { status: OrderStatus::Paid }
    )));

    assert_eq!(stock_of(&pool, variant.variant_id).await, 2);
    let paid_events = order_events::count(&pool, session.order_id, OrderEventKind::Paid)
        .await
        .unwrap();
    assert_eq!(paid_events, 1);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_last_unit_goes_to_exactly_one_order(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 15_000, 1).await;
    let first = place_order(&pool, &gateway, &variant, 1).await;
    let second = place_order(&pool, &gateway, &variant, 1).await;
    let first_items = line_items(&pool, first.order_id).await;
    let second_items = line_items(&pool, second.order_id).await;

    let service = settlement(&pool);
    let (a, b) = tokio::join!(
        service.mark_paid_transactionally(first.order_id, "pi_first", &first_items),
        service.mark_paid_transactionally(second.order_id, "pi_second", &second_items),
    );

    let results = [a, b];
    let settled = results
        .iter()
        .filter(|r| matches!(r, Ok(SettlementOutcome::Settled)))
        .count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(SettlementError::InsufficientStock { available: 0, .. })))
        .count();
    assert_eq!((settled, short), (1, 1));
    assert_eq!(stock_of(&pool, variant.variant_id).await, 0);

    let mut statuses = Vec::new();
    for order_id in [first.order_id, second.order_id] {
        statuses.push(orders::get(&pool, order_id).await.unwrap().unwrap().status);
    }
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, [OrderStatus::Paid, OrderStatus::Pending]);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_failed_settlement_leaves_every_variant_untouched(pool: PgPool) {
    let gateway = FakeGateway::new();
    let plenty = seed_variant(&pool, 5_000, 10).await;
    let scarce = solehaus_integration_tests::add_variant(&pool, plenty.tenant_id, 7_000, 1).await;
    let session = place_order(&pool, &gateway, &plenty, 3).await;

    let mut items = line_items(&pool, session.order_id).await;
    items.push(solehaus_storefront::models::LineItem {
        product_id: scarce.product_id,
        variant_id: scarce.variant_id,
        quantity: 2,
    });

    let result = settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_partial", &items)
        .await;

    assert!(matches!(result, Err(SettlementError::InsufficientStock { .. })));
    assert_eq!(stock_of(&pool, plenty.variant_id).await, 10);
    assert_eq!(stock_of(&pool, scarce.variant_id).await, 1);
    let order = orders::get(&pool, session.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_repeated_settlement_is_a_noop(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 8_000, 3).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let items = line_items(&pool, session.order_id).await;
    let service = settlement(&pool);

    service
        .mark_paid_transactionally(session.order_id, "pi_once", &items)
        .await
        .unwrap();
    let again = service
        .mark_paid_transactionally(session.order_id, "pi_once", &items)
        .await
        .unwrap();

    assert!(matches!(again, SettlementOutcome::AlreadySettled { .. }));
    assert_eq!(stock_of(&pool, variant.variant_id).await, 2);
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_canceled_order_is_not_settled(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 8_000, 3).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let items = line_items(&pool, session.order_id).await;

    FulfillmentService::new(pool.clone())
        .cancel(session.order_id, "buyer abandoned", "test")
        .await
        .unwrap();

    let outcome = settlement(&pool)
        .mark_paid_transactionally(session.order_id, "pi_late", &items)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SettlementOutcome::NotPayable {
            status: OrderStatus::Canceled
        }
    );
    assert_eq!(stock_of(&pool, variant.variant_id).await, 3);
}
