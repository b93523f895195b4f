use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::product,
    errors::ServiceError,
    services::products::{CreateProductRequest, ProductQuery},
    ApiResponse, AppState,
};

/// List products with optional search, category and price filters
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(
        ("search" = Option<String>, Query, description = "Match against name or description"),
        ("category" = Option<String>, Query, description = "Category filter"),
        ("sort_by" = Option<String>, Query, description = "price_asc | price_desc | newest"),
    ),
    responses(
        (status = 200, description = "Products retrieved", body = ApiResponse<Vec<product::Model>>),
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ApiResponse<Vec<product::Model>>>, ServiceError> {
    let products = state.services.products.list(query).await?;
    Ok(Json(ApiResponse::success(products)))
}

/// Featured products, served from the cache snapshot when available
#[utoipa::path(
    get,
    path = "/api/v1/products/featured",
    responses(
        (status = 200, description = "Featured products", body = ApiResponse<Vec<product::Model>>),
    ),
    tag = "Products"
)]
pub async fn featured_products(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<product::Model>>>, ServiceError> {
    let products = state.services.products.featured().await?;
    Ok(Json(ApiResponse::success(products)))
}

/// Products in one category
#[utoipa::path(
    get,
    path = "/api/v1/products/category/{category}",
    params(("category" = String, Path, description = "Category name")),
    responses(
        (status = 200, description = "Products retrieved", body = ApiResponse<Vec<product::Model>>),
    ),
    tag = "Products"
)]
pub async fn products_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<ApiResponse<Vec<product::Model>>>, ServiceError> {
    let products = state.services.products.by_category(&category).await?;
    Ok(Json(ApiResponse::success(products)))
}

/// Create a product (operator only)
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<product::Model>),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ServiceError> {
    auth_user.require_admin()?;
    let created = state.services.products.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Toggle a product's featured flag and rewrite the cache snapshot (operator only)
#[utoipa::path(
    patch,
    path = "/api/v1/products/{id}/toggle-featured",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product updated", body = ApiResponse<product::Model>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Products"
)]
pub async fn toggle_featured(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<product::Model>>, ServiceError> {
    auth_user.require_admin()?;
    let updated = state.services.products.toggle_featured(id).await?;
    Ok(Json(ApiResponse::success(updated)))
}

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/featured", get(featured_products))
        .route("/category/:category", get(products_by_category))
        .route("/:id/toggle-featured", patch(toggle_featured))
}
