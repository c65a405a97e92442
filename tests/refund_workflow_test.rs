//! Refund requests on delivered items and seller decisions.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestContext;
use marketplace_orders::{
    auth::AuthenticatedUser,
    entities::{order_item, OrderItem, OrderItemStatus, RefundStatus},
    errors::ServiceError,
    events::Event,
    services::{cart::AddToCartInput, refunds::RequestRefundInput},
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

struct Delivered {
    seller: AuthenticatedUser,
    buyer: AuthenticatedUser,
    item_id: i64,
}

/// Buys two units at 12.50 and walks the line to `delivered`.
async fn delivered_item(ctx: &TestContext) -> Delivered {
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(12.50), 10).await;
    let buyer = ctx.seed_customer("Bob").await;
    ctx.factory
        .cart_service()
        .add_item(
            &buyer,
            AddToCartInput {
                offer_id: offer.id,
                quantity: 2,
            },
        )
        .await
        .unwrap();
    let order = ctx.factory.order_service().checkout(&buyer).await.unwrap();
    let item_id = ctx
        .factory
        .order_service()
        .get_order(&buyer, order.order_id)
        .await
        .unwrap()
        .items[0]
        .id;

    let status = ctx.factory.order_status_service();
    for next in [OrderItemStatus::Processing, OrderItemStatus::Delivered] {
        status
            .seller_update_order_item_status(&seller, item_id, next)
            .await
            .unwrap();
    }

    Delivered {
        seller,
        buyer,
        item_id,
    }
}

fn request(order_item_id: i64) -> RequestRefundInput {
    RequestRefundInput {
        order_item_id,
        reason: "Arrived scratched".into(),
    }
}

#[tokio::test]
async fn buyer_requests_full_line_refund() {
    let mut ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    ctx.drain_events();

    let refund = ctx
        .factory
        .refund_service()
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    assert_eq!(refund.status, RefundStatus::Pending);
    assert_eq!(refund.amount, dec!(25.00));
    assert_eq!(refund.requester_id, d.buyer.user_id);
    assert_eq!(refund.seller_id, d.seller.user_id);
    assert_eq!(refund.order_item_id, d.item_id);
    assert_eq!(
        ctx.drain_events(),
        vec![Event::RefundRequested {
            refund_id: refund.id,
            order_item_id: d.item_id,
        }]
    );
}

#[tokio::test]
async fn undelivered_items_are_not_refundable() {
    let ctx = TestContext::new().await;
    let (seller, offer) = ctx.seed_listing("Sally", "Lamp", dec!(12.50), 10).await;
    let buyer = ctx.seed_customer("Bob").await;
    ctx.factory
        .cart_service()
        .add_item(
            &buyer,
            AddToCartInput {
                offer_id: offer.id,
                quantity: 1,
            },
        )
        .await
        .unwrap();
    let order = ctx.factory.order_service().checkout(&buyer).await.unwrap();
    let item_id = ctx
        .factory
        .order_service()
        .get_order(&buyer, order.order_id)
        .await
        .unwrap()
        .items[0]
        .id;
    let refunds = ctx.factory.refund_service();

    assert_matches!(
        refunds.request_refund(&buyer, request(item_id)).await,
        Err(ServiceError::ItemNotDelivered(_))
    );

    ctx.factory
        .order_status_service()
        .seller_update_order_item_status(&seller, item_id, OrderItemStatus::Processing)
        .await
        .unwrap();
    assert_matches!(
        refunds.request_refund(&buyer, request(item_id)).await,
        Err(ServiceError::ItemNotDelivered(_))
    );

    assert_matches!(
        refunds.request_refund(&buyer, request(9_999)).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn only_the_buyer_may_request() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let eve = ctx.seed_customer("Eve").await;

    assert_matches!(
        ctx.factory
            .refund_service()
            .request_refund(&eve, request(d.item_id))
            .await,
        Err(ServiceError::NotOwner(_))
    );
}

#[tokio::test]
async fn window_closes_after_configured_days() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;

    let item = OrderItem::find_by_id(d.item_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    let mut backdated: order_item::ActiveModel = item.into();
    backdated.updated_at = Set(Utc::now() - Duration::days(15));
    backdated.update(&*ctx.db).await.unwrap();

    assert_matches!(
        ctx.factory
            .refund_service()
            .request_refund(&d.buyer, request(d.item_id))
            .await,
        Err(ServiceError::RefundWindowExpired(_))
    );
}

#[tokio::test]
async fn one_refund_per_item() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let refunds = ctx.factory.refund_service();

    refunds
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    assert_matches!(
        refunds.request_refund(&d.buyer, request(d.item_id)).await,
        Err(ServiceError::RefundAlreadyExists(_))
    );
}

#[tokio::test]
async fn empty_reason_fails_validation() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;

    let result = ctx
        .factory
        .refund_service()
        .request_refund(
            &d.buyer,
            RequestRefundInput {
                order_item_id: d.item_id,
                reason: String::new(),
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn seller_approves_and_listing_reflects_it() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let refunds = ctx.factory.refund_service();
    let refund = refunds
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    let decided = refunds
        .approve_refund(&d.seller, refund.id, true)
        .await
        .unwrap();
    assert_eq!(decided.status, RefundStatus::Approved);

    let rows = ctx
        .factory
        .order_service()
        .list_seller_order_items(&d.seller)
        .await
        .unwrap();
    assert_eq!(rows[0].refund_id, Some(refund.id));
    assert_eq!(rows[0].refund_status, Some(RefundStatus::Approved));
    assert_eq!(rows[0].refund_reason.as_deref(), Some("Arrived scratched"));
}

#[tokio::test]
async fn rejection_is_final() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let refunds = ctx.factory.refund_service();
    let refund = refunds
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    let decided = refunds
        .approve_refund(&d.seller, refund.id, false)
        .await
        .unwrap();
    assert_eq!(decided.status, RefundStatus::Rejected);

    assert_matches!(
        refunds.approve_refund(&d.seller, refund.id, true).await,
        Err(ServiceError::IllegalStatusTransition(_))
    );
}

#[tokio::test]
async fn concurrent_decisions_settle_exactly_once() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let refunds = ctx.factory.refund_service();
    let refund = refunds
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    let (approve, reject) = tokio::join!(
        refunds.approve_refund(&d.seller, refund.id, true),
        refunds.approve_refund(&d.seller, refund.id, false),
    );

    let outcomes = [approve, reject];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(ServiceError::IllegalStatusTransition(_)))));
}

#[tokio::test]
async fn other_sellers_and_customers_cannot_decide() {
    let ctx = TestContext::new().await;
    let d = delivered_item(&ctx).await;
    let rival = ctx.seed_seller("Sam").await;
    let refunds = ctx.factory.refund_service();
    let refund = refunds
        .request_refund(&d.buyer, request(d.item_id))
        .await
        .unwrap();

    assert_matches!(
        refunds.approve_refund(&rival, refund.id, true).await,
        Err(ServiceError::AccessDenied(_))
    );
    assert_matches!(
        refunds.approve_refund(&d.buyer, refund.id, true).await,
        Err(ServiceError::AccessDenied(_))
    );
    assert_matches!(
        refunds.approve_refund(&d.seller, 9_999, true).await,
        Err(ServiceError::NotFound(_))
    );
}
