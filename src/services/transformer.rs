//! Trasformazione delle immagini: download, decodifica, resize, codifica, salvataggio

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::handlers::image as image_ops;
use crate::utils::save_bytes;

/// Capacità di trasformazione pura, senza conoscenza di job o code.
///
/// `decode`, `resize` ed `encode` sono CPU-bound: la pipeline le esegue su
/// `spawn_blocking`.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Bytes>;

    fn decode(&self, data: &[u8]) -> Result<DynamicImage>;

    fn resize(&self, image: DynamicImage, target_width: u32) -> Result<DynamicImage>;

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>>;

    async fn save(&self, data: &[u8], path: &Path) -> Result<()>;
}

/// Implementazione predefinita: HTTP(S) via reqwest, `file://` da disco,
/// codec del crate `image`, output su filesystem locale.
#[derive(Debug, Clone)]
pub struct HttpImageTransformer {
    client: reqwest::Client,
}

impl HttpImageTransformer {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::Internal(format!("Errore client HTTP: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ImageTransformer for HttpImageTransformer {
    async fn fetch(&self, uri: &str) -> Result<Bytes> {
        let url = reqwest::Url::parse(uri)
            .map_err(|e| AppError::Download(format!("URL non valido {:?}: {}", uri, e)))?;

        match url.scheme() {
            "http" | "https" => {
                let response = self.client.get(url).send().await?;

                if !response.status().is_success() {
                    return Err(AppError::Download(format!(
                        "HTTP {} scaricando {}",
                        response.status(),
                        uri
                    )));
                }

                Ok(response.bytes().await?)
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| AppError::Download(format!("path non valido: {}", uri)))?;
                Ok(Bytes::from(tokio::fs::read(path).await?))
            }
            other => Err(AppError::Download(format!(
                "schema non supportato: {}",
                other
            ))),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<DynamicImage> {
        image_ops::decode_image(data)
    }

    fn resize(&self, image: DynamicImage, target_width: u32) -> Result<DynamicImage> {
        image_ops::resize_to_width(image, target_width)
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
        image_ops::encode_jpeg(image, quality)
    }

    async fn save(&self, data: &[u8], path: &Path) -> Result<()> {
        save_bytes(path, data).await
    }
}
