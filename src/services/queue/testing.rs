//! Fake di store e transformer per i test della pipeline e del consumer

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::handlers::image as image_ops;
use crate::models::JobId;
use crate::services::{ImageTransformer, ProductStore};

#[derive(Default)]
pub(crate) struct FakeStore {
    sources: Mutex<HashMap<i64, Vec<String>>>,
    processed: Mutex<HashMap<i64, Vec<String>>>,
    pub exists_calls: AtomicUsize,
    pub replace_calls: AtomicUsize,
    pub fail_persist: AtomicBool,
}

impl FakeStore {
    pub fn with_product(self, id: i64, sources: &[&str]) -> Self {
        self.sources
            .lock()
            .unwrap()
            .insert(id, sources.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn set_processed(&self, id: i64, paths: &[&str]) {
        self.processed
            .lock()
            .unwrap()
            .insert(id, paths.iter().map(|s| s.to_string()).collect());
    }

    pub fn processed(&self, id: i64) -> Option<Vec<String>> {
        self.processed.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl ProductStore for FakeStore {
    async fn exists(&self, id: JobId) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sources.lock().unwrap().contains_key(&id.0))
    }

    async fn source_images(&self, id: JobId) -> Result<Vec<String>> {
        self.sources
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn replace_processed_images(
        &self,
        id: JobId,
        paths: &[String],
        _updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(AppError::Internal("database non raggiungibile".to_string()));
        }
        self.processed.lock().unwrap().insert(id.0, paths.to_vec());
        Ok(())
    }
}

/// URL con "404" falliscono al download, con "corrupt" restituiscono byte
/// non decodificabili, con "thin" un PNG 1x40000 che non si può
/// ridimensionare, con "nosave" falliscono al salvataggio. Gli altri
/// restituiscono un PNG 64x32.
#[derive(Default)]
pub(crate) struct FakeTransformer {
    pub fetches: AtomicUsize,
    pub saved: Mutex<Vec<PathBuf>>,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeTransformer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10])));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

#[async_trait]
impl ImageTransformer for FakeTransformer {
    async fn fetch(&self, uri: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if uri.contains("404") {
            return Err(AppError::Download(format!("HTTP 404 Not Found scaricando {}", uri)));
        }
        if uri.contains("corrupt") {
            return Ok(Bytes::from_static(b"definitely not an image"));
        }
        if uri.contains("thin") {
            return Ok(Bytes::from(png_bytes(1, 40_000)));
        }
        Ok(Bytes::from(png_bytes(64, 32)))
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

    async fn save(&self, _data: &[u8], path: &Path) -> Result<()> {
        if path.to_string_lossy().contains("nosave") {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permesso negato",
            )));
        }
        self.saved.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
