//! Order item state machine: seller fulfillment, buyer cancellation and the
//! seller-side listing.

mod common;

use assert_matches::assert_matches;
use common::TestContext;
use marketplace_orders::{
    auth::AuthenticatedUser,
    entities::{OrderItemStatus, PaymentStatus, Product},
    errors::ServiceError,
    events::Event,
    services::{cart::AddToCartInput, orders::CheckoutResponse},
};
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, EntityTrait};

async fn buy(ctx: &TestContext, buyer: &AuthenticatedUser, lines: &[(i64, i32)]) -> CheckoutResponse {
    let cart = ctx.factory.cart_service();
    for &(offer_id, quantity) in lines {
        cart.add_item(buyer, AddToCartInput { offer_id, quantity })
            .await
            .unwrap();
    }
    ctx.factory.order_service().checkout(buyer).await.unwrap()
}

async fn first_item_id(ctx: &TestContext, buyer: &AuthenticatedUser, order_id: i64) -> i64 {
    ctx.factory
        .order_service()
        .get_order(buyer, order_id)
        .await
        .unwrap()
        .items[0]
        .id
}

#[tokio::test]
async fn seller_moves_item_through_fulfillment() {
    let mut ctx = TestContext::new().await;
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;
    let status = ctx.factory.order_status_service();
    ctx.drain_events();

    let processing = status
        .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Processing)
        .await
        .unwrap();
    assert_eq!(processing.status, OrderItemStatus::Processing);

    let delivered = status
        .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderItemStatus::Delivered);
    assert!(delivered.updated_at >= processing.updated_at);

    assert_eq!(
        ctx.drain_events(),
        vec![
            Event::OrderItemStatusChanged {
                item_id,
                from: OrderItemStatus::Pending,
                to: OrderItemStatus::Processing,
            },
            Event::OrderItemStatusChanged {
                item_id,
                from: OrderItemStatus::Processing,
                to: OrderItemStatus::Delivered,
            },
        ]
    );
}

#[tokio::test]
async fn skipping_processing_is_an_invalid_transition() {
    let ctx = TestContext::new().await;
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;

    let result = ctx
        .factory
        .order_status_service()
        .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Delivered)
        .await;

    assert_matches!(result, Err(ServiceError::InvalidTransition { from, to }) => {
        assert_eq!(from, "pending");
        assert_eq!(to, "delivered");
    });
    let unchanged = ctx
        .factory
        .order_service()
        .get_order(&buyer, order.order_id)
        .await
        .unwrap();
    assert_eq!(unchanged.items[0].status, OrderItemStatus::Pending);
}

#[tokio::test]
async fn only_the_owning_seller_may_update() {
    let ctx = TestContext::new().await;
    let (_, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let rival = ctx.seed_seller("Sam").await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;
    let status = ctx.factory.order_status_service();

    assert_matches!(
        status
            .seller_update_order_item_status(&rival, item_id, OrderItemStatus::Processing)
            .await,
        Err(ServiceError::AccessDenied(_))
    );
    // A customer is turned away before ownership is even looked at.
    assert_matches!(
        status
            .seller_update_order_item_status(&buyer, item_id, OrderItemStatus::Processing)
            .await,
        Err(ServiceError::AccessDenied(_))
    );
    assert_matches!(
        status
            .seller_update_order_item_status(&rival, 9_999, OrderItemStatus::Processing)
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn buyer_cancels_pending_item_once() {
    let mut ctx = TestContext::new().await;
    let (_, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;
    let orders = ctx.factory.order_service();
    ctx.drain_events();

    let cancelled = orders.cancel_order_item(&buyer, item_id).await.unwrap();
    assert_eq!(cancelled.status, OrderItemStatus::Cancelled);

    // Cancelling again is a no-op success.
    let again = orders.cancel_order_item(&buyer, item_id).await.unwrap();
    assert_eq!(again.status, OrderItemStatus::Cancelled);

    assert_eq!(
        ctx.drain_events(),
        vec![Event::OrderItemCancelled { item_id }]
    );
}

#[tokio::test]
async fn started_items_cannot_be_cancelled() {
    let ctx = TestContext::new().await;
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;

    ctx.factory
        .order_status_service()
        .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Processing)
        .await
        .unwrap();

    assert_matches!(
        ctx.factory
            .order_service()
            .cancel_order_item(&buyer, item_id)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn strangers_cannot_tell_missing_from_foreign_items() {
    let ctx = TestContext::new().await;
    let (_, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let eve = ctx.seed_customer("Eve").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;
    let orders = ctx.factory.order_service();

    assert_matches!(
        orders.cancel_order_item(&eve, item_id).await,
        Err(ServiceError::NotFoundOrAccessDenied(_))
    );
    assert_matches!(
        orders.cancel_order_item(&eve, 9_999).await,
        Err(ServiceError::NotFoundOrAccessDenied(_))
    );
}

#[tokio::test]
async fn cancelled_item_cannot_be_fulfilled() {
    let ctx = TestContext::new().await;
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 5).await;
    let buyer = ctx.seed_customer("Bob").await;
    let order = buy(&ctx, &buyer, &[(offer.id, 1)]).await;
    let item_id = first_item_id(&ctx, &buyer, order.order_id).await;

    ctx.factory
        .order_service()
        .cancel_order_item(&buyer, item_id)
        .await
        .unwrap();

    assert_matches!(
        ctx.factory
            .order_status_service()
            .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Processing)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn seller_listing_shows_only_own_lines_newest_first() {
    let ctx = TestContext::new().await;
    let (sally, lamp) = ctx.seed_listing("Sally", "Lamp", dec!(10.00), 20).await;
    let (_, desk) = ctx.seed_listing("Sam", "Desk", dec!(25.50), 20).await;
    let bob = ctx.seed_customer("Bob").await;
    let alice = ctx.seed_customer("Alice").await;

    let first = buy(&ctx, &bob, &[(lamp.id, 1), (desk.id, 1)]).await;
    let second = buy(&ctx, &alice, &[(lamp.id, 3)]).await;

    ctx.factory
        .order_service()
        .update_payment_status_by_order_id(&second.order_id.to_string(), PaymentStatus::Successful)
        .await
        .unwrap();

    let rows = ctx
        .factory
        .order_service()
        .list_seller_order_items(&sally)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].order_id, second.order_id);
    assert_eq!(rows[0].customer_name, "Alice");
    assert_eq!(rows[0].product_name, "Lamp");
    assert_eq!(rows[0].quantity, 3);
    assert!(rows[0].paid);
    assert_eq!(rows[1].order_id, first.order_id);
    assert_eq!(rows[1].customer_id, bob.user_id);
    assert!(!rows[1].paid);
    assert!(rows.iter().all(|r| r.refund_id.is_none()));
}

#[tokio::test]
async fn seller_listing_skips_lines_whose_product_is_gone() {
    let ctx = TestContext::new().await;
    let seller = ctx.seed_seller("Sally").await;
    let lamp = ctx.seed_product("Lamp").await;
    let desk = ctx.seed_product("Desk").await;
    let lamp_offer = ctx.seed_offer(&seller, lamp.id, dec!(10.00), 5).await;
    let desk_offer = ctx.seed_offer(&seller, desk.id, dec!(25.50), 5).await;
    let bob = ctx.seed_customer("Bob").await;
    buy(&ctx, &bob, &[(lamp_offer.id, 1), (desk_offer.id, 1)]).await;

    ctx.db
        .execute_unprepared("PRAGMA foreign_keys = OFF")
        .await
        .unwrap();
    Product::delete_by_id(desk.id).exec(&*ctx.db).await.unwrap();

    let rows = ctx
        .factory
        .order_service()
        .list_seller_order_items(&seller)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].product_id, lamp.id);
    assert_eq!(rows[0].product_name, "Lamp");
    assert_eq!(rows[0].customer_name, "Bob");
}

#[tokio::test]
async fn customers_cannot_use_the_seller_listing() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_customer("Bob").await;

    assert_matches!(
        ctx.factory
            .order_service()
            .list_seller_order_items(&buyer)
            .await,
        Err(ServiceError::AccessDenied(_))
    );
}
