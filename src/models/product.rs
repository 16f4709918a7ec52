use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::products::ProductRecord;
use crate::error::{AppError, Result};

/// Payload per la creazione di un prodotto
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub user_id: i64,
    pub product_name: String,
    #[serde(default)]
    pub product_description: String,
    /// URL delle immagini sorgente, nell'ordine di elaborazione
    #[serde(default)]
    pub product_images: Vec<String>,
    pub product_price: f64,
}

impl CreateProductRequest {
    pub fn validate(&self) -> Result<()> {
        if self.product_name.trim().is_empty() {
            return Err(AppError::BadRequest("product_name obbligatorio".to_string()));
        }
        if !self.product_price.is_finite() || self.product_price < 0.0 {
            return Err(AppError::BadRequest(format!(
                "product_price non valido: {}",
                self.product_price
            )));
        }
        if let Some(bad) = self.product_images.iter().find(|u| u.trim().is_empty()) {
            return Err(AppError::BadRequest(format!(
                "URL immagine non valido: {:?}",
                bad
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductCreatedResponse {
    pub product_id: i64,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub product_id: i64,
    pub user_id: i64,
    pub product_name: String,
    pub product_description: String,
    pub product_price: f64,
    pub product_images: Vec<String>,
    pub compressed_product_images: Vec<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl TryFrom<ProductRecord> for ProductResponse {
    type Error = AppError;

    fn try_from(r: ProductRecord) -> Result<Self> {
        let product_images = r.source_images()?;
        let compressed_product_images = r.processed_images()?;
        Ok(Self {
            product_id: r.product_id,
            user_id: r.user_id,
            product_name: r.product_name,
            product_description: r.product_description,
            product_price: r.product_price,
            product_images,
            compressed_product_images,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
