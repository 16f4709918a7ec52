//! Pipeline per singolo job: verifica → sorgenti → trasformazione → salvataggio

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{ImageFailure, ImageStage, Job, JobId, JobOutcome, JobStatus};
use crate::services::{ImageTransformer, ProductStore};
use crate::utils::{output_filenames, output_path};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub target_width: u32,
    /// Qualità JPEG 1-100
    pub quality: u8,
    pub output_dir: PathBuf,
    /// Immagini dello stesso job elaborate in parallelo
    pub image_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_width: 1024,
            quality: 60,
            output_dir: PathBuf::from("outputs"),
            image_concurrency: 4,
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn ProductStore>,
    transformer: Arc<dyn ImageTransformer>,
    settings: PipelineSettings,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Esegue una fase CPU-bound fuori dal runtime async
async fn blocking<T, F>(stage: ImageStage, f: F) -> std::result::Result<T, (ImageStage, AppError)>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| (stage, e)),
        Err(e) => Err((stage, AppError::Transform(format!("task interrotto: {}", e)))),
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ProductStore>,
        transformer: Arc<dyn ImageTransformer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            transformer,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Esegue il job. Non fallisce mai: ogni errore diventa parte dell'esito.
    pub async fn run(&self, job: Job) -> JobOutcome {
        let id = job.id;

        // Il prodotto potrebbe essere sparito tra pubblicazione e consegna
        match self.store.exists(id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Prodotto {} inesistente, job annullato", id);
                return JobOutcome::aborted(id, JobStatus::NotFound, "prodotto inesistente");
            }
            Err(e) => {
                tracing::error!("Errore verificando il prodotto {}: {}", id, e);
                return JobOutcome::aborted(id, JobStatus::Failed, e.to_string());
            }
        }

        let sources = match self.store.source_images(id).await {
            Ok(sources) => sources,
            Err(AppError::NotFound(e)) => {
                tracing::warn!("Prodotto {} rimosso durante il job: {}", id, e);
                return JobOutcome::aborted(id, JobStatus::NotFound, e);
            }
            Err(e) => {
                tracing::error!("Errore leggendo le immagini del prodotto {}: {}", id, e);
                return JobOutcome::aborted(id, JobStatus::Failed, e.to_string());
            }
        };

        tracing::info!("Elaborazione di {} immagini per il prodotto {}", sources.len(), id);

        // Nomi decisi prima di partire: due immagini in parallelo non
        // scrivono mai sullo stesso file
        let filenames = output_filenames(&sources);
        // buffered() mantiene l'ordine delle sorgenti tra le immagini riuscite
        let results: Vec<_> = futures::stream::iter(0..sources.len().min(filenames.len()))
            .map(|i| self.process_image(id, &sources[i], &filenames[i]))
            .buffered(self.settings.image_concurrency.max(1))
            .collect()
            .await;

        let mut processed = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(path) => processed.push(path),
                Err(failure) => {
                    tracing::warn!(
                        "Immagine {} scartata ({:?}): {}",
                        failure.source,
                        failure.stage,
                        failure.error
                    );
                    failures.push(failure);
                }
            }
        }

        // Un insieme vuoto non sovrascrive mai un risultato precedente
        if processed.is_empty() {
            tracing::warn!("Nessuna immagine elaborata per il prodotto {}, record invariato", id);
            return JobOutcome {
                job_id: id,
                status: JobStatus::NoImages,
                processed,
                failures,
                error: None,
            };
        }

        if let Err(e) = self
            .store
            .replace_processed_images(id, &processed, chrono::Utc::now())
            .await
        {
            // I file già scritti restano su disco; una riconsegna li sovrascrive
            tracing::error!(
                "Salvataggio dei risultati del prodotto {} fallito ({} file orfani): {}",
                id,
                processed.len(),
                e
            );
            let status = match e {
                AppError::NotFound(_) => JobStatus::NotFound,
                _ => JobStatus::Failed,
            };
            return JobOutcome {
                job_id: id,
                status,
                processed: Vec::new(),
                failures,
                error: Some(e.to_string()),
            };
        }

        let status = if failures.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Partial
        };

        tracing::info!(
            "Prodotto {}: {}/{} immagini elaborate",
            id,
            processed.len(),
            sources.len()
        );

        JobOutcome {
            job_id: id,
            status,
            processed,
            failures,
            error: None,
        }
    }

    async fn process_image(
        &self,
        id: JobId,
        source: &str,
        filename: &str,
    ) -> std::result::Result<String, ImageFailure> {
        let fail = |stage: ImageStage, e: AppError| ImageFailure {
            source: source.to_string(),
            stage,
            error: e.to_string(),
        };

        let data = self
            .transformer
            .fetch(source)
            .await
            .map_err(|e| fail(ImageStage::Download, e))?;

        let transformer = self.transformer.clone();
        let decoded = blocking(ImageStage::Decode, move || transformer.decode(&data))
            .await
            .map_err(|(stage, e)| fail(stage, e))?;

        let transformer = self.transformer.clone();
        let width = self.settings.target_width;
        let resized = blocking(ImageStage::Resize, move || transformer.resize(decoded, width))
            .await
            .map_err(|(stage, e)| fail(stage, e))?;

        let transformer = self.transformer.clone();
        let quality = self.settings.quality;
        let encoded = blocking(ImageStage::Encode, move || transformer.encode(&resized, quality))
            .await
            .map_err(|(stage, e)| fail(stage, e))?;

        let path = output_path(&self.settings.output_dir, id, filename);
        self.transformer
            .save(&encoded, &path)
            .await
            .map_err(|e| fail(ImageStage::Save, e))?;

        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::testing::{FakeStore, FakeTransformer};
    use std::sync::atomic::Ordering;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            target_width: 16,
            image_concurrency: 2,
            ..Default::default()
        }
    }

    fn pipeline(store: &Arc<FakeStore>, transformer: &Arc<FakeTransformer>) -> Pipeline {
        Pipeline::new(store.clone(), transformer.clone(), settings())
    }

    #[tokio::test]
    async fn test_all_images_succeed() {
        let store = Arc::new(FakeStore::default().with_product(
            1,
            &["https://h/a.jpg", "https://h/b.jpg", "https://h/c.jpg"],
        ));
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(1)).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(
            outcome.processed,
            vec!["outputs/1/a.jpg", "outputs/1/b.jpg", "outputs/1/c.jpg"]
        );
        assert_eq!(store.processed(1).unwrap(), outcome.processed);
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_download_404_is_skipped() {
        let store = Arc::new(FakeStore::default().with_product(
            42,
            &["https://h/one.jpg", "https://h/404/two.jpg", "https://h/three.jpg"],
        ));
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(42)).await;

        assert_eq!(outcome.status, JobStatus::Partial);
        assert!(outcome.is_success());
        assert_eq!(outcome.processed.len(), 2);
        assert!(outcome.processed.iter().all(|p| p.starts_with("outputs/42/")));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, ImageStage::Download);
        assert_eq!(store.processed(42).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_product_does_no_work() {
        let store = Arc::new(FakeStore::default());
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(7)).await;

        assert_eq!(outcome.status, JobStatus::NotFound);
        assert_eq!(transformer.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 0);
        assert!(store.processed(7).is_none());
    }

    #[tokio::test]
    async fn test_zero_successes_leave_record_untouched() {
        let store = Arc::new(
            FakeStore::default().with_product(3, &["https://h/404/a.jpg", "https://h/corrupt.jpg"]),
        );
        store.set_processed(3, &["outputs/3/old.jpg"]);
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(3)).await;

        assert_eq!(outcome.status, JobStatus::NoImages);
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.processed(3).unwrap(), vec!["outputs/3/old.jpg"]);
        let stages: Vec<_> = outcome.failures.iter().map(|f| f.stage).collect();
        assert_eq!(stages, vec![ImageStage::Download, ImageStage::Decode]);
    }

    #[tokio::test]
    async fn test_empty_source_set_writes_nothing() {
        let store = Arc::new(FakeStore::default().with_product(5, &[]));
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(5)).await;

        assert_eq!(outcome.status, JobStatus::NoImages);
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_save_failure_skips_image() {
        let store = Arc::new(
            FakeStore::default().with_product(9, &["https://h/nosave.jpg", "https://h/ok.jpg"]),
        );
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(9)).await;

        assert_eq!(outcome.status, JobStatus::Partial);
        assert_eq!(outcome.processed, vec!["outputs/9/ok.jpg"]);
        assert_eq!(outcome.failures[0].stage, ImageStage::Save);
    }

    #[tokio::test]
    async fn test_unresizable_image_is_skipped() {
        let store = Arc::new(
            FakeStore::default().with_product(12, &["https://h/thin.png", "https://h/ok.jpg"]),
        );
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(12)).await;

        assert_eq!(outcome.status, JobStatus::Partial);
        assert_eq!(outcome.processed, vec!["outputs/12/ok.jpg"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, ImageStage::Resize);
        assert_eq!(outcome.failures[0].source, "https://h/thin.png");
    }

    #[tokio::test]
    async fn test_same_basename_gets_distinct_outputs() {
        let store = Arc::new(FakeStore::default().with_product(
            13,
            &["https://a/x.jpg", "https://b/x.jpg", "https://c/y.jpg"],
        ));
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(13)).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(
            outcome.processed,
            vec!["outputs/13/x.jpg", "outputs/13/x-1.jpg", "outputs/13/y.jpg"]
        );
        let mut saved = transformer.saved.lock().unwrap().clone();
        saved.sort();
        saved.dedup();
        assert_eq!(saved.len(), 3);
    }

    #[tokio::test]
    async fn test_persist_failure_is_terminal() {
        let store = Arc::new(FakeStore::default().with_product(11, &["https://h/a.jpg"]));
        store.fail_persist.store(true, Ordering::SeqCst);
        let transformer = Arc::new(FakeTransformer::default());

        let outcome = pipeline(&store, &transformer).run(Job::new(11)).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.processed.is_empty());
        assert!(outcome.error.is_some());
        // il file resta su disco
        assert_eq!(transformer.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_replaces_instead_of_appending() {
        let store = Arc::new(FakeStore::default().with_product(2, &["https://h/a.jpg"]));
        let transformer = Arc::new(FakeTransformer::default());
        let pipeline = pipeline(&store, &transformer);

        pipeline.run(Job::new(2)).await;
        let again = pipeline.run(Job::new(2)).await;

        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(store.processed(2).unwrap(), vec!["outputs/2/a.jpg"]);
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 2);
    }
}
