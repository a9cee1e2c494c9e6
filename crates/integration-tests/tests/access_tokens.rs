//! Guest access tokens: scoping, expiry, revocation and storage.

#![allow(clippy::unwrap_used)]

use sqlx::PgPool;

use solehaus_integration_tests::{FakeGateway, place_order, seed_variant, tokens};
use solehaus_storefront::services::{AccessTokenError, AccessTokenService};

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_guest_token_opens_only_its_own_order(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 4_000, 5).await;
    let mine = place_order(&pool, &gateway, &variant, 1).await;
    let theirs = place_order(&pool, &gateway, &variant, 1).await;
    let token = mine.access_token.clone().unwrap();
    let service = tokens(&pool);

    service.validate(mine.order_id, &token).await.unwrap();
    assert!(matches!(
        service.validate(theirs.order_id, &token).await,
        Err(AccessTokenError::Unauthorized)
    ));
    assert!(matches!(
        service.validate(mine.order_id, "not-a-real-token").await,
        Err(AccessTokenError::Unauthorized)
    ));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_expired_token_is_rejected(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 4_000, 5).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;

    let short_lived = AccessTokenService::new(pool.clone(), chrono::Duration::seconds(-1));
    let issued = short_lived.issue(session.order_id, "test").await.unwrap();

    assert!(matches!(
        short_lived.validate(session.order_id, &issued.token).await,
        Err(AccessTokenError::Unauthorized)
    ));
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_revocation_invalidates_every_token(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 4_000, 5).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let service = tokens(&pool);
    let extra = service.issue(session.order_id, "admin").await.unwrap();

    let revoked = service.revoke_all(session.order_id, "admin").await.unwrap();
    assert_eq!(revoked, 2);

    for token in [session.access_token.unwrap(), extra.token] {
        assert!(matches!(
            service.validate(session.order_id, &token).await,
            Err(AccessTokenError::Unauthorized)
        ));
    }
}

#[sqlx::test(migrations = "../storefront/migrations")]
#[ignore = "Requires DATABASE_URL pointing at PostgreSQL"]
async fn test_only_the_digest_is_stored(pool: PgPool) {
    let gateway = FakeGateway::new();
    let variant = seed_variant(&pool, 4_000, 5).await;
    let session = place_order(&pool, &gateway, &variant, 1).await;
    let token = session.access_token.unwrap();

    let stored: Vec<Vec<u8>> = sqlx::query_scalar(
        "SELECT token_hash FROM commerce.order_access_token WHERE order_id = $1",
    )
    .bind(session.order_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].len(), 32);
    assert_ne!(stored[0], token.as_bytes());
}
