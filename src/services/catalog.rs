use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, LoaderTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        product::{self, ProductCategory},
        product_variant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

const FEATURED_LIMIT: u64 = 8;

/// Read and admin-write access to the product catalog.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct ProductFilter {
    pub category: Option<ProductCategory>,
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub sort: Option<ProductSort>,
}

#[derive(Debug, Clone, Copy, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ProductSort {
    PriceLow,
    PriceHigh,
    Newest,
    Popular,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub slug: String,
    #[validate(length(max = 10_000))]
    #[serde(default)]
    pub description: String,
    pub category: ProductCategory,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    #[serde(default)]
    pub stock: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_featured: bool,
    pub thumbnail: Option<String>,
    #[serde(default)]
    #[validate]
    pub variants: Vec<CreateVariantInput>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateVariantInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub value: String,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
    pub sku: Option<String>,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 10_000))]
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub price: Option<Decimal>,
    pub compare_price: Option<Decimal>,
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub thumbnail: Option<String>,
}

/// Product with its variant options, the shape clients consume.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: product::Model,
    pub variants: Vec<product_variant::Model>,
    pub is_available: bool,
}

impl ProductView {
    fn from_parts(product: product::Model, variants: Vec<product_variant::Model>) -> Self {
        let is_available = product.is_available();
        Self {
            product,
            variants,
            is_available,
        }
    }
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Paginated listing of active products with the storefront filters.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: ProductFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<ProductView>, u64), ServiceError> {
        let mut condition = Condition::all().add(product::Column::IsActive.eq(true));
        if let Some(category) = filter.category {
            condition = condition.add(product::Column::Category.eq(category));
        }
        if let Some(search) = filter.search.filter(|s| !s.trim().is_empty()) {
            condition = condition.add(
                Condition::any()
                    .add(product::Column::Name.contains(search.trim()))
                    .add(product::Column::Description.contains(search.trim())),
            );
        }
        if let Some(min) = filter.min_price {
            condition = condition.add(product::Column::Price.gte(min));
        }
        if let Some(max) = filter.max_price {
            condition = condition.add(product::Column::Price.lte(max));
        }

        let mut query = product::Entity::find().filter(condition);
        query = match filter.sort.unwrap_or(ProductSort::Newest) {
            ProductSort::PriceLow => query.order_by_asc(product::Column::Price),
            ProductSort::PriceHigh => query.order_by_desc(product::Column::Price),
            ProductSort::Newest => query.order_by_desc(product::Column::CreatedAt),
            ProductSort::Popular => query.order_by_desc(product::Column::Sold),
        };

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        self.with_variants(products).await.map(|views| (views, total))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ProductView, ServiceError> {
        let product = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;
        let variants = self.variants_of(&product).await?;
        Ok(ProductView::from_parts(product, variants))
    }

    /// Slug lookup only resolves active products.
    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Result<ProductView, ServiceError> {
        let product = product::Entity::find()
            .filter(product::Column::Slug.eq(slug))
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;
        let variants = self.variants_of(&product).await?;
        Ok(ProductView::from_parts(product, variants))
    }

    #[instrument(skip(self))]
    pub async fn featured(&self) -> Result<Vec<ProductView>, ServiceError> {
        let products = product::Entity::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::IsFeatured.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .limit(FEATURED_LIMIT)
            .all(&*self.db)
            .await?;
        self.with_variants(products).await
    }

    /// Distinct categories that currently have active products.
    #[instrument(skip(self))]
    pub async fn categories(&self) -> Result<Vec<ProductCategory>, ServiceError> {
        let categories: Vec<ProductCategory> = product::Entity::find()
            .filter(product::Column::IsActive.eq(true))
            .select_only()
            .column(product::Column::Category)
            .distinct()
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(categories)
    }

    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        input: CreateProductInput,
        created_by: Uuid,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        if input.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price must not be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(input.slug),
            description: Set(input.description),
            category: Set(input.category),
            price: Set(input.price),
            compare_price: Set(input.compare_price),
            stock: Set(input.stock),
            sold: Set(0),
            is_active: Set(input.is_active),
            is_featured: Set(input.is_featured),
            thumbnail: Set(input.thumbnail),
            created_by: Set(Some(created_by)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut variants = Vec::with_capacity(input.variants.len());
        for v in input.variants {
            variants.push(
                product_variant::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product.id),
                    name: Set(v.name),
                    value: Set(v.value),
                    price: Set(v.price),
                    stock: Set(v.stock),
                    sku: Set(v.sku),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?,
            );
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductCreated(product.id))
            .await;
        Ok(ProductView::from_parts(product, variants))
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;

        let product = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;

        let mut active: product::ActiveModel = product.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(category) = input.category {
            active.category = Set(category);
        }
        if let Some(price) = input.price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "price must not be negative".to_string(),
                ));
            }
            active.price = Set(price);
        }
        if let Some(compare_price) = input.compare_price {
            active.compare_price = Set(Some(compare_price));
        }
        if let Some(stock) = input.stock {
            active.stock = Set(stock);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_featured) = input.is_featured {
            active.is_featured = Set(is_featured);
        }
        if let Some(thumbnail) = input.thumbnail {
            active.thumbnail = Set(Some(thumbnail));
        }
        active.updated_at = Set(Some(Utc::now()));

        let product = active.update(&*self.db).await?;
        let variants = self.variants_of(&product).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(product.id))
            .await;
        Ok(ProductView::from_parts(product, variants))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let product = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;
        product.delete(&*self.db).await?;

        self.event_sender.send_or_log(Event::ProductDeleted(id)).await;
        Ok(())
    }

    async fn variants_of(
        &self,
        product: &product::Model,
    ) -> Result<Vec<product_variant::Model>, ServiceError> {
        Ok(product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .all(&*self.db)
            .await?)
    }

    async fn with_variants(
        &self,
        products: Vec<product::Model>,
    ) -> Result<Vec<ProductView>, ServiceError> {
        let variants = products
            .load_many(product_variant::Entity, &*self.db)
            .await?;
        Ok(products
            .into_iter()
            .zip(variants)
            .map(|(p, v)| ProductView::from_parts(p, v))
            .collect())
    }
}
