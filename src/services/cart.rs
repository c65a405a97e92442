use std::sync::Arc;
use std::time::Duration;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    cache::{self, keys, CacheBackend},
    entities::{cart_item, CartItem},
    errors::ServiceError,
    services::offers::OfferService,
};

/// Request to put `quantity` units of an offer into the caller's cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddToCartInput {
    #[validate(range(min = 1))]
    pub offer_id: i64,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Per-user cart of pending selections.
///
/// Lines are unique per (user, offer); adding the same offer again
/// accumulates quantity up to `max_quantity`. The cap and stock checks are
/// read-then-write and therefore best-effort under concurrent adds.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    offers: OfferService,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
    max_quantity: i32,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        offers: OfferService,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
        max_quantity: i32,
    ) -> Self {
        Self {
            db,
            offers,
            cache,
            ttl,
            max_quantity,
        }
    }

    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn add_item(
        &self,
        user: &AuthenticatedUser,
        input: AddToCartInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let offer = self.offers.get_offer(input.offer_id).await?;
        if !offer.is_available {
            return Err(ServiceError::NotFound(format!(
                "Offer {} not found",
                input.offer_id
            )));
        }
        if offer.stock < input.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "offer {} has {} in stock, {} requested",
                offer.id, offer.stock, input.quantity
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user.user_id))
            .filter(cart_item::Column::OfferId.eq(input.offer_id))
            .one(&*self.db)
            .await?;

        let current = existing.as_ref().map(|line| line.quantity).unwrap_or(0);
        let new_quantity = current + input.quantity;
        if new_quantity > self.max_quantity {
            return Err(ServiceError::MaxQuantityExceeded(format!(
                "at most {} units of offer {} per cart, {} requested",
                self.max_quantity, input.offer_id, new_quantity
            )));
        }

        let line = match existing {
            Some(line) => {
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(new_quantity);
                line.update(&*self.db).await?
            }
            None => {
                cart_item::ActiveModel {
                    user_id: Set(user.user_id),
                    offer_id: Set(input.offer_id),
                    quantity: Set(new_quantity),
                    ..Default::default()
                }
                .insert(&*self.db)
                .await?
            }
        };

        self.invalidate(user.user_id).await;

        info!(
            offer_id = input.offer_id,
            quantity = new_quantity,
            "cart line saved"
        );
        Ok(line)
    }

    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn get_items(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        let db = self.db.clone();
        let user_id = user.user_id;
        cache::get_or_load(&*self.cache, &keys::cart(user_id), self.ttl, || async move {
            Self::load_lines(&*db, user_id).await
        })
        .await
    }

    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn remove_item(
        &self,
        user: &AuthenticatedUser,
        offer_id: i64,
    ) -> Result<(), ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user.user_id))
            .filter(cart_item::Column::OfferId.eq(offer_id))
            .exec(&*self.db)
            .await?;

        self.invalidate(user.user_id).await;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Offer {} is not in the cart",
                offer_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = user.user_id))]
    pub async fn clear_cart(&self, user: &AuthenticatedUser) -> Result<(), ServiceError> {
        Self::clear_lines(&*self.db, user.user_id).await?;
        self.invalidate(user.user_id).await;
        Ok(())
    }

    /// Cart lines straight from storage, oldest first.
    pub async fn load_lines<C>(conn: &C, user_id: i64) -> Result<Vec<cart_item::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        Ok(CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::Id)
            .all(conn)
            .await?)
    }

    pub async fn clear_lines<C>(conn: &C, user_id: i64) -> Result<u64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn invalidate(&self, user_id: i64) {
        cache::invalidate(&*self.cache, &[keys::cart(user_id)]).await;
    }
}
