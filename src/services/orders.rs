use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::AuthenticatedUser,
    config::PaymentConfig,
    entities::{
        order, order_item, product, refund, user, Order, OrderItem, OrderItemStatus, OrderStatus,
        PaymentStatus, Product, Refund, RefundStatus, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        offers::OfferService,
        order_status::is_valid_buyer_cancellation,
        payments::{CheckoutSessionRequest, PaymentGateway, PaymentSession},
    },
};

/// Result of a successful checkout: the new order and where to pay for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub total_amount: Decimal,
    pub payment_url: String,
    pub session_id: String,
}

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Denormalized seller-side view of one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerOrderItem {
    pub item_id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub status: OrderItemStatus,
    pub paid: bool,
    pub placed_at: DateTime<Utc>,
    pub customer_id: i64,
    pub customer_name: String,
    pub refund_id: Option<i64>,
    pub refund_status: Option<RefundStatus>,
    pub refund_reason: Option<String>,
}

/// Order aggregate manager.
///
/// Owns checkout (cart → immutable priced order), buyer-side reads and
/// cancellation, payment status reconciliation and the seller listing.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    offers: OfferService,
    cart: CartService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    payment: PaymentConfig,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        offers: OfferService,
        cart: CartService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        payment: PaymentConfig,
    ) -> Self {
        Self {
            db,
            offers,
            cart,
            gateway,
            event_sender,
            payment,
        }
    }

    /// Converts the caller's cart into an order and opens a payment session.
    ///
    /// Every line is re-priced from the live offer; the cart's own snapshot is
    /// never trusted. The order, its items and the cart clear-out commit in one
    /// transaction. The payment session is opened after commit: if the
    /// provider call fails the order remains with `payment_status = pending`
    /// and [`OrderService::checkout_existing_order`] can retry it.
    ///
    /// # Errors
    ///
    /// * `EmptyCart` - nothing to buy
    /// * `NotFound` - a cart line references a deleted offer
    /// * `InsufficientStock` - a line asks for more than the offer holds
    /// * `ExternalGatewayError` - the session could not be opened
    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn checkout(&self, user: &AuthenticatedUser) -> Result<CheckoutResponse, ServiceError> {
        let placed = self.place_order(user.user_id).await?;
        let order = &placed.order;

        let offer_ids: Vec<i64> = placed.items.iter().map(|item| item.offer_id).collect();
        self.offers.invalidate(&offer_ids).await;
        self.cart.invalidate(user.user_id).await;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
            })
            .await;

        let session = self.open_payment_session(order).await.map_err(|e| {
            error!(order_id = order.id, "Payment session creation failed: {}", e);
            e
        })?;

        Ok(CheckoutResponse {
            order_id: order.id,
            total_amount: order.total_amount,
            payment_url: session.url,
            session_id: session.session_id,
        })
    }

    /// The transactional core of checkout: order + items + cart clear, or nothing.
    ///
    /// Stock is checked against a fresh read inside the transaction but is
    /// neither locked nor decremented; two concurrent checkouts of the last
    /// unit can both succeed. `is_available` is only enforced when an item is
    /// added to the cart, so an offer withdrawn afterwards still checks out.
    #[instrument(skip(self))]
    pub async fn place_order(&self, user_id: i64) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let lines = CartService::load_lines(&txn, user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut total = Decimal::ZERO;
        for line in lines {
            let offer = OfferService::fetch_fresh(&txn, line.offer_id).await?;
            if offer.stock < line.quantity {
                warn!(
                    offer_id = offer.id,
                    stock = offer.stock,
                    requested = line.quantity,
                    "checkout blocked by stock"
                );
                return Err(ServiceError::InsufficientStock(format!(
                    "offer {} has {} in stock, {} requested",
                    offer.id, offer.stock, line.quantity
                )));
            }
            total += offer.price * Decimal::from(line.quantity);
            priced.push((line, offer));
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            user_id: Set(user_id),
            total_amount: Set(total),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to insert order for user {}: {}", user_id, e);
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(priced.len());
        for (line, offer) in priced {
            let item = order_item::ActiveModel {
                order_id: Set(order.id),
                offer_id: Set(offer.id),
                product_id: Set(offer.product_id),
                seller_id: Set(offer.seller_id),
                quantity: Set(line.quantity),
                unit_price: Set(offer.price),
                status: Set(OrderItemStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!("Failed to insert item for order {}: {}", order.id, e);
                ServiceError::DatabaseError(e)
            })?;
            items.push(item);
        }

        CartService::clear_lines(&txn, user_id).await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order {}: {}", order.id, e);
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = order.id,
            items = items.len(),
            total = %order.total_amount,
            "Order placed"
        );
        Ok(OrderWithItems { order, items })
    }

    /// Opens a fresh payment session for an order that has not been paid yet.
    /// The frozen total is reused as-is; stock is not re-validated.
    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn checkout_existing_order(
        &self,
        user: &AuthenticatedUser,
        order_id: i64,
    ) -> Result<CheckoutResponse, ServiceError> {
        let order = self.find_owned_order(user, order_id).await?;

        if order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::OrderAlreadyProcessed(format!(
                "Order {} payment is already {}",
                order_id, order.payment_status
            )));
        }

        let session = self.open_payment_session(&order).await?;

        Ok(CheckoutResponse {
            order_id: order.id,
            total_amount: order.total_amount,
            payment_url: session.url,
            session_id: session.session_id,
        })
    }

    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn get_order(
        &self,
        user: &AuthenticatedUser,
        order_id: i64,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_owned_order(user, order_id).await?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    /// All of the caller's orders, newest first.
    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn list_orders(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user.user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(&*self.db)
            .await?;

        let order_ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<i64, Vec<order_item::Model>> = HashMap::new();
        if !order_ids.is_empty() {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.is_in(order_ids))
                .order_by_asc(order_item::Column::Id)
                .all(&*self.db)
                .await?;
            for item in items {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect())
    }

    /// Buyer-side cancellation of a single pending item.
    ///
    /// Not found and not owned are reported identically. Cancelling an item
    /// that is already cancelled succeeds without writing.
    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn cancel_order_item(
        &self,
        user: &AuthenticatedUser,
        item_id: i64,
    ) -> Result<order_item::Model, ServiceError> {
        let db = &*self.db;
        let item = match OrderItem::find_by_id(item_id)
            .find_also_related(Order)
            .one(db)
            .await?
        {
            Some((item, Some(order))) if order.user_id == user.user_id => item,
            _ => {
                return Err(ServiceError::NotFoundOrAccessDenied(format!(
                    "Order item {}",
                    item_id
                )))
            }
        };

        if item.status == OrderItemStatus::Cancelled {
            return Ok(item);
        }
        if !is_valid_buyer_cancellation(item.status) {
            return Err(ServiceError::InvalidTransition {
                from: item.status.to_string(),
                to: OrderItemStatus::Cancelled.to_string(),
            });
        }

        let now = Utc::now();
        let result = OrderItem::update_many()
            .col_expr(
                order_item::Column::Status,
                Expr::value(OrderItemStatus::Cancelled),
            )
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::Id.eq(item_id))
            .filter(order_item::Column::Status.eq(OrderItemStatus::Pending))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            let current = OrderItem::find_by_id(item_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFoundOrAccessDenied(format!("Order item {}", item_id))
                })?;
            if current.status == OrderItemStatus::Cancelled {
                return Ok(current);
            }
            return Err(ServiceError::InvalidTransition {
                from: current.status.to_string(),
                to: OrderItemStatus::Cancelled.to_string(),
            });
        }

        self.event_sender
            .send_or_log(Event::OrderItemCancelled { item_id })
            .await;
        info!("Order item {} cancelled by buyer", item_id);

        Ok(order_item::Model {
            status: OrderItemStatus::Cancelled,
            updated_at: now,
            ..item
        })
    }

    /// Overwrites an order's payment status, addressed by the textual order id
    /// carried in provider metadata. Re-applying the same status is harmless.
    ///
    /// Fails with `NotFound` when the reference matches no order. Only the
    /// canonical decimal form is accepted, so `"+01"` or `" 1"` match nothing.
    #[instrument(skip(self))]
    pub async fn update_payment_status_by_order_id(
        &self,
        order_ref: &str,
        status: PaymentStatus,
    ) -> Result<(), ServiceError> {
        let order_id = order_ref
            .parse::<i64>()
            .ok()
            .filter(|id| id.to_string() == order_ref)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_ref)))?;

        let result = Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to update payment status of order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }

        self.event_sender
            .send_or_log(Event::PaymentStatusChanged { order_id, status })
            .await;
        info!("Order {} payment status set to {}", order_id, status);
        Ok(())
    }

    /// Every order line sold by the calling seller, newest order first,
    /// joined with product name, buyer, payment flag and any refund. Lines whose
    /// order, product or buyer row is gone are logged and left out.
    #[instrument(skip(self), fields(seller_id = seller.user_id))]
    pub async fn list_seller_order_items(
        &self,
        seller: &AuthenticatedUser,
    ) -> Result<Vec<SellerOrderItem>, ServiceError> {
        seller.require_seller()?;
        let db = &*self.db;

        let items = OrderItem::find()
            .filter(order_item::Column::SellerId.eq(seller.user_id))
            .all(db)
            .await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<i64> = items.iter().map(|i| i.order_id).collect();
        let product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        let item_ids: Vec<i64> = items.iter().map(|i| i.id).collect();

        let orders: HashMap<i64, order::Model> = Order::find()
            .filter(order::Column::Id.is_in(order_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        let customer_ids: Vec<i64> = orders.values().map(|o| o.user_id).collect();
        let customers: HashMap<i64, user::Model> = User::find()
            .filter(user::Column::Id.is_in(customer_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        let products: HashMap<i64, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let refunds: HashMap<i64, refund::Model> = Refund::find()
            .filter(refund::Column::OrderItemId.is_in(item_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|r| (r.order_item_id, r))
            .collect();

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let Some(order) = orders.get(&item.order_id) else {
                warn!(item_id = item.id, "order item without order skipped");
                continue;
            };
            let Some(product) = products.get(&item.product_id) else {
                warn!(item_id = item.id, product_id = item.product_id, "order item without product skipped");
                continue;
            };
            let Some(customer) = customers.get(&order.user_id) else {
                warn!(item_id = item.id, customer_id = order.user_id, "order item without customer skipped");
                continue;
            };
            let refund = refunds.get(&item.id);
            rows.push(SellerOrderItem {
                item_id: item.id,
                order_id: item.order_id,
                product_id: item.product_id,
                product_name: product.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                status: item.status,
                paid: order.payment_status == PaymentStatus::Successful,
                placed_at: order.created_at,
                customer_id: order.user_id,
                customer_name: customer.name.clone(),
                refund_id: refund.map(|r| r.id),
                refund_status: refund.map(|r| r.status),
                refund_reason: refund.map(|r| r.reason.clone()),
            });
        }

        rows.sort_by(|a, b| {
            b.placed_at
                .cmp(&a.placed_at)
                .then(b.order_id.cmp(&a.order_id))
                .then(a.item_id.cmp(&b.item_id))
        });
        Ok(rows)
    }

    async fn find_owned_order(
        &self,
        user: &AuthenticatedUser,
        order_id: i64,
    ) -> Result<order::Model, ServiceError> {
        match Order::find_by_id(order_id).one(&*self.db).await? {
            Some(order) if order.user_id == user.user_id => Ok(order),
            _ => Err(ServiceError::NotFoundOrAccessDenied(format!(
                "Order {}",
                order_id
            ))),
        }
    }

    async fn open_payment_session(
        &self,
        order: &order::Model,
    ) -> Result<PaymentSession, ServiceError> {
        let request = CheckoutSessionRequest {
            order_id: order.id,
            amount: order.total_amount,
            currency: self.payment.currency.clone(),
            success_url: self.payment.success_url.clone(),
            cancel_url: self.payment.cancel_url.clone(),
        };
        self.gateway.create_checkout_session(&request).await
    }
}
