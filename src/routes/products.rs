use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::db::products::{self as db_products, NewProduct};
use crate::db::users;
use crate::error::{AppError, Result};
use crate::models::{CreateProductRequest, JobId, ProductCreatedResponse, ProductResponse};

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/products", post(create_product))
        .route("/api/v1/products/:id", get(get_product))
        .with_state(state)
}

/// Salva un prodotto e accoda l'elaborazione delle sue immagini
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 200, description = "Prodotto salvato e job pubblicato", body = ProductCreatedResponse),
        (status = 400, description = "Payload non valido", body = crate::models::ErrorResponse),
        (status = 404, description = "Utente inesistente", body = crate::models::ErrorResponse),
        (status = 500, description = "Errore interno", body = crate::models::ErrorResponse),
    ),
    tag = "Prodotti"
)]
pub async fn create_product(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<Json<ProductCreatedResponse>> {
    let Json(request) = payload.map_err(|e| {
        tracing::warn!("Payload prodotto non valido: {}", e.body_text());
        AppError::BadRequest("Payload non valido".to_string())
    })?;
    request.validate()?;

    if !users::user_exists(&state.db, request.user_id).await? {
        return Err(AppError::NotFound(format!("Utente {}", request.user_id)));
    }

    let product_id = db_products::insert_product(
        &state.db,
        &NewProduct {
            user_id: request.user_id,
            name: &request.product_name,
            description: &request.product_description,
            price: request.product_price,
            images: &request.product_images,
        },
    )
    .await
    .map_err(|e| {
        tracing::error!("Inserimento prodotto fallito: {}", e);
        AppError::Database(e)
    })?;

    // Il record resta salvato anche se la pubblicazione fallisce
    state
        .producer
        .publish(JobId(product_id))
        .await
        .map_err(|e| AppError::Internal(format!("Pubblicazione job fallita: {}", e)))?;

    Ok(Json(ProductCreatedResponse {
        product_id,
        message: "Prodotto salvato".to_string(),
    }))
}

/// Stato di un prodotto, incluse le immagini elaborate
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = i64, Path, description = "ID del prodotto")),
    responses(
        (status = 200, description = "Prodotto trovato", body = ProductResponse),
        (status = 404, description = "Prodotto inesistente", body = crate::models::ErrorResponse),
    ),
    tag = "Prodotti"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductResponse>> {
    let record = db_products::get_product(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Prodotto {}", id)))?;

    Ok(Json(ProductResponse::try_from(record)?))
}
