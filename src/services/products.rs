use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    cache::{CacheClient, FEATURED_PRODUCTS_KEY},
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    /// Image URL; upload handling lives outside this service.
    #[serde(default)]
    pub image: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
}

/// Catalog reads plus the featured-products snapshot cache. The cache is a
/// single key with no expiry; it is deleted and rewritten when an operator
/// toggles a product's featured flag.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    cache: CacheClient,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>, cache: CacheClient) -> Self {
        Self { db, cache }
    }

    #[instrument(skip(self, query))]
    pub async fn list(&self, query: ProductQuery) -> Result<Vec<product::Model>, ServiceError> {
        let mut select = ProductEntity::find();

        if let Some(search) = query.search.filter(|s| !s.is_empty()) {
            select = select.filter(
                product::Column::Name
                    .contains(&search)
                    .or(product::Column::Description.contains(&search)),
            );
        }
        if let Some(category) = query.category.filter(|c| !c.is_empty()) {
            select = select.filter(product::Column::Category.contains(&category));
        }
        if let Some(min) = query.min_price {
            select = select.filter(product::Column::Price.gte(min));
        }
        if let Some(max) = query.max_price {
            select = select.filter(product::Column::Price.lte(max));
        }

        select = match query.sort_by.as_deref() {
            Some("price_asc") => select.order_by_asc(product::Column::Price),
            Some("price_desc") => select.order_by_desc(product::Column::Price),
            _ => select.order_by_desc(product::Column::CreatedAt),
        };

        let rows = select.all(&*self.db).await?;
        Ok(rows)
    }

    pub async fn by_category(&self, category: &str) -> Result<Vec<product::Model>, ServiceError> {
        let rows = ProductEntity::find()
            .filter(product::Column::Category.eq(category))
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Cache-aside read of the featured snapshot. A missing or unreadable
    /// cache degrades to the database query; a stale snapshot is accepted
    /// until the next operator toggle rewrites it.
    #[instrument(skip(self))]
    pub async fn featured(&self) -> Result<Vec<product::Model>, ServiceError> {
        if let Some(cached) = self.cache.get(FEATURED_PRODUCTS_KEY).await {
            match serde_json::from_str::<Vec<product::Model>>(&cached) {
                Ok(rows) => return Ok(rows),
                Err(e) => warn!("Discarding unreadable featured snapshot: {}", e),
            }
        }

        let rows = ProductEntity::find()
            .filter(product::Column::IsFeatured.eq(true))
            .all(&*self.db)
            .await?;

        match serde_json::to_string(&rows) {
            Ok(snapshot) => self.cache.set(FEATURED_PRODUCTS_KEY, &snapshot).await,
            Err(e) => warn!("Could not serialize featured snapshot: {}", e),
        }

        Ok(rows)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(
        &self,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        if request.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price must not be negative".to_string(),
            ));
        }

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            price: Set(request.price),
            image: Set(request.image),
            category: Set(request.category),
            is_featured: Set(false),
            created_at: Set(Utc::now()),
        };

        let created = model.insert(&*self.db).await?;
        Ok(created)
    }

    /// Flips the featured flag, then rewrites the snapshot. The rewrite is
    /// best-effort; the toggle itself is the durable change.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn toggle_featured(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        let found = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))?;

        let next = !found.is_featured;
        let mut active: product::ActiveModel = found.into();
        active.is_featured = Set(next);
        let updated = active.update(&*self.db).await?;

        self.refresh_featured_cache().await;
        Ok(updated)
    }

    async fn refresh_featured_cache(&self) {
        let rows = match ProductEntity::find()
            .filter(product::Column::IsFeatured.eq(true))
            .all(&*self.db)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Skipping featured cache rewrite: {}", e);
                return;
            }
        };

        match serde_json::to_string(&rows) {
            Ok(snapshot) => {
                self.cache.delete(FEATURED_PRODUCTS_KEY).await;
                self.cache.set(FEATURED_PRODUCTS_KEY, &snapshot).await;
            }
            Err(e) => warn!("Could not serialize featured snapshot: {}", e),
        }
    }
}
