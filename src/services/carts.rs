use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{cart, cart_item, product, product_variant},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Cart domain logic. One open cart per user; totals are derived and rewritten
/// on every mutation by [`compute_totals`].
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, utoipa::ToSchema)]
pub struct VariantSelection {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub value: String,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    #[validate]
    pub variant: Option<VariantSelection>,
}

fn default_quantity() -> i32 {
    1
}

/// Zero or a negative quantity removes the line.
#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateItemInput {
    #[validate(range(max = 999))]
    pub quantity: i32,
}

/// Cart plus its lines, as returned to clients.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<cart_item::Model>,
    pub total_items: i32,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CartSummary {
    pub total_items: i32,
    pub total_price: Decimal,
    pub item_count: usize,
}

/// Derived totals over a set of cart lines.
pub fn compute_totals(items: &[cart_item::Model]) -> (i32, Decimal) {
    let total_items = items.iter().map(|i| i.quantity).sum();
    let total_price = items.iter().map(|i| i.line_total()).sum();
    (total_items, total_price)
}

/// Stock gate for physical products: the variant's stock when one is
/// selected, the base stock otherwise. Digital categories always pass.
fn ensure_stock(
    product: &product::Model,
    variant_row: Option<&product_variant::Model>,
    selection: Option<&VariantSelection>,
    quantity: i32,
) -> Result<(), ServiceError> {
    if !product.category.is_physical() {
        return Ok(());
    }
    match selection {
        Some(_) => match variant_row {
            Some(row) if row.stock >= quantity => Ok(()),
            _ => Err(ServiceError::OutOfStock(
                "insufficient stock for selected variant".to_string(),
            )),
        },
        None if product.stock >= quantity => Ok(()),
        None => Err(ServiceError::OutOfStock(format!(
            "only {} unit(s) of {} available",
            product.stock, product.name
        ))),
    }
}

/// Unit price captured on a line: the matching variant option's price when
/// one was selected and exists, the base price otherwise.
fn resolve_price(
    product: &product::Model,
    variant_row: Option<&product_variant::Model>,
) -> Decimal {
    variant_row.map(|v| v.price).unwrap_or(product.price)
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's open cart, creating an empty one on first access.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let existing = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        let cart = match existing {
            Some(cart) => cart,
            None => {
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    total_items: Set(0),
                    total_price: Set(Decimal::ZERO),
                    created_at: Set(Utc::now()),
                    updated_at: Set(None),
                }
                .insert(&*self.db)
                .await?
            }
        };

        let items = self.load_items(&*self.db, cart.id).await?;
        Ok(Self::view(cart, items))
    }

    #[instrument(skip(self, input))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;

        let variant_row = self
            .find_variant(&txn, &product, input.variant.as_ref())
            .await?;
        ensure_stock(
            &product,
            variant_row.as_ref(),
            input.variant.as_ref(),
            input.quantity,
        )?;
        let unit_price = resolve_price(&product, variant_row.as_ref());

        let cart = self.find_or_create_cart(&txn, user_id).await?;
        let items = self.load_items(&txn, cart.id).await?;

        let selection = input
            .variant
            .as_ref()
            .map(|v| (v.name.as_str(), v.value.as_str()));
        let existing = items
            .iter()
            .find(|item| item.same_selection(product.id, selection));

        match existing {
            Some(line) => {
                // Merged quantity must also clear the stock gate.
                let merged = line.quantity + input.quantity;
                ensure_stock(&product, variant_row.as_ref(), input.variant.as_ref(), merged)?;
                let mut active: cart_item::ActiveModel = line.clone().into();
                active.quantity = Set(merged);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(input.quantity),
                    unit_price: Set(unit_price),
                    variant_name: Set(input.variant.as_ref().map(|v| v.name.clone())),
                    variant_value: Set(input.variant.as_ref().map(|v| v.value.clone())),
                    added_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        let cart = self.persist_totals(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: product.id,
            })
            .await;

        Ok(Self::view(cart, items))
    }

    #[instrument(skip(self, input))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        input: UpdateItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        if input.quantity <= 0 {
            return self.remove_item(user_id, item_id).await;
        }

        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, user_id).await?;

        let item = cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item".to_string()))?;

        let product = product::Entity::find_by_id(item.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;

        let selection = match (&item.variant_name, &item.variant_value) {
            (Some(name), Some(value)) => Some(VariantSelection {
                name: name.clone(),
                value: value.clone(),
            }),
            _ => None,
        };
        let variant_row = self
            .find_variant(&txn, &product, selection.as_ref())
            .await?;
        ensure_stock(
            &product,
            variant_row.as_ref(),
            selection.as_ref(),
            input.quantity,
        )?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(input.quantity);
        active.update(&txn).await?;

        let cart = self.persist_totals(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        Ok(Self::view(cart, items))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, user_id).await?;

        let item = cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item".to_string()))?;
        item.delete(&txn).await?;

        let cart = self.persist_totals(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                item_id,
            })
            .await;

        Ok(Self::view(cart, items))
    }

    /// Empties the cart. The cart row itself survives.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, user_id).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart_id = cart.id;
        self.persist_totals(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        Ok(())
    }

    /// Lightweight totals for the cart badge; zeros when no cart exists yet.
    #[instrument(skip(self))]
    pub async fn summary(&self, user_id: Uuid) -> Result<CartSummary, ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        match cart {
            Some(cart) => {
                let items = self.load_items(&*self.db, cart.id).await?;
                Ok(CartSummary {
                    total_items: cart.total_items,
                    total_price: cart.total_price,
                    item_count: items.len(),
                })
            }
            None => Ok(CartSummary {
                total_items: 0,
                total_price: Decimal::ZERO,
                item_count: 0,
            }),
        }
    }

    /// The cart with lines, for checkout. `None` when the user has no cart.
    pub async fn cart_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<(cart::Model, Vec<cart_item::Model>)>, ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?;
        match cart {
            Some(cart) => {
                let items = self.load_items(conn, cart.id).await?;
                Ok(Some((cart, items)))
            }
            None => Ok(None),
        }
    }

    async fn find_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart".to_string()))
    }

    async fn find_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok(cart);
        }
        Ok(cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total_items: Set(0),
            total_price: Set(Decimal::ZERO),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(conn)
        .await?)
    }

    async fn find_variant<C: ConnectionTrait>(
        &self,
        conn: &C,
        product: &product::Model,
        selection: Option<&VariantSelection>,
    ) -> Result<Option<product_variant::Model>, ServiceError> {
        let Some(sel) = selection else {
            return Ok(None);
        };
        Ok(product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .filter(product_variant::Column::Name.eq(sel.name.clone()))
            .filter(product_variant::Column::Value.eq(sel.value.clone()))
            .one(conn)
            .await?)
    }

    async fn load_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(conn)
            .await?)
    }

    /// Recomputes and stores the derived totals from the current line set.
    async fn persist_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: cart::Model,
    ) -> Result<cart::Model, ServiceError> {
        let items = self.load_items(conn, cart.id).await?;
        let (total_items, total_price) = compute_totals(&items);

        let mut active: cart::ActiveModel = cart.into();
        active.total_items = Set(total_items);
        active.total_price = Set(total_price);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(conn).await?)
    }

    fn view(cart: cart::Model, items: Vec<cart_item::Model>) -> CartView {
        CartView {
            id: cart.id,
            user_id: cart.user_id,
            total_items: cart.total_items,
            total_price: cart.total_price,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product::ProductCategory;
    use rust_decimal_macros::dec;

    fn line(quantity: i32, unit_price: Decimal) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            variant_name: None,
            variant_value: None,
            added_at: Utc::now(),
        }
    }

    fn merch_product(stock: i32) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Hoodie".into(),
            slug: "hoodie".into(),
            description: String::new(),
            category: ProductCategory::Merch,
            price: dec!(45.00),
            compare_price: None,
            stock,
            sold: 0,
            is_active: true,
            is_featured: false,
            thumbnail: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn variant_of(product: &product::Model, stock: i32, price: Decimal) -> product_variant::Model {
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id: product.id,
            name: "Size".into(),
            value: "L".into(),
            price,
            stock,
            sku: Some("HD-L".into()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn totals_are_sums_over_lines() {
        let items = vec![line(2, dec!(19.99)), line(1, dec!(45.00)), line(3, dec!(5.50))];
        let (total_items, total_price) = compute_totals(&items);
        assert_eq!(total_items, 6);
        assert_eq!(total_price, dec!(101.48));
    }

    #[test]
    fn empty_cart_totals_are_zero() {
        let (total_items, total_price) = compute_totals(&[]);
        assert_eq!(total_items, 0);
        assert_eq!(total_price, Decimal::ZERO);
    }

    #[test]
    fn stock_gate_passes_exactly_at_the_boundary() {
        let product = merch_product(5);
        assert!(ensure_stock(&product, None, None, 5).is_ok());
        assert!(matches!(
            ensure_stock(&product, None, None, 6),
            Err(ServiceError::OutOfStock(_))
        ));
    }

    #[test]
    fn variant_stock_overrides_base_stock() {
        let product = merch_product(100);
        let variant = variant_of(&product, 2, dec!(49.00));
        let selection = VariantSelection {
            name: "Size".into(),
            value: "L".into(),
        };
        assert!(ensure_stock(&product, Some(&variant), Some(&selection), 2).is_ok());
        assert!(matches!(
            ensure_stock(&product, Some(&variant), Some(&selection), 3),
            Err(ServiceError::OutOfStock(_))
        ));
    }

    #[test]
    fn unknown_variant_on_merch_is_out_of_stock() {
        let product = merch_product(100);
        let selection = VariantSelection {
            name: "Size".into(),
            value: "XXL".into(),
        };
        assert!(matches!(
            ensure_stock(&product, None, Some(&selection), 1),
            Err(ServiceError::OutOfStock(_))
        ));
    }

    #[test]
    fn digital_products_ignore_stock() {
        let mut product = merch_product(0);
        product.category = ProductCategory::Course;
        assert!(ensure_stock(&product, None, None, 50).is_ok());
    }

    #[test]
    fn price_prefers_the_matched_variant() {
        let product = merch_product(10);
        let variant = variant_of(&product, 10, dec!(49.00));
        assert_eq!(resolve_price(&product, Some(&variant)), dec!(49.00));
        assert_eq!(resolve_price(&product, None), dec!(45.00));
    }

    #[test]
    fn lines_merge_only_on_same_product_and_variant() {
        let product_id = Uuid::new_v4();
        let mut item = line(1, dec!(10.00));
        item.product_id = product_id;
        item.variant_name = Some("Size".into());
        item.variant_value = Some("L".into());

        assert!(item.same_selection(product_id, Some(("Size", "L"))));
        assert!(!item.same_selection(product_id, Some(("Size", "M"))));
        assert!(!item.same_selection(product_id, None));
        assert!(!item.same_selection(Uuid::new_v4(), Some(("Size", "L"))));
    }
}
