//! Pubblicazione dei job dopo la creazione di un prodotto

use std::sync::Arc;

use super::channel::{JobChannel, QueueHandle};
use crate::error::Result;
use crate::models::{Job, JobId};

/// Pubblica un job per ogni prodotto creato.
///
/// Il chiamante deve aver già reso persistente il prodotto. Se la
/// pubblicazione fallisce il record resta comunque salvato: la richiesta va
/// trattata come fallita, senza retry.
#[derive(Clone)]
pub struct Producer {
    channel: Arc<dyn JobChannel>,
    queue: QueueHandle,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue", &self.queue.name())
            .finish()
    }
}

impl Producer {
    /// Dichiara la coda (idempotente) e restituisce il producer
    pub async fn new(channel: Arc<dyn JobChannel>, queue_name: &str) -> Result<Self> {
        let queue = channel.declare(queue_name).await?;
        Ok(Self { channel, queue })
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub async fn publish(&self, job_id: JobId) -> Result<()> {
        let job = Job { id: job_id };

        if let Err(e) = self.channel.publish(&self.queue, &job.to_payload()).await {
            tracing::error!("Pubblicazione del job {} fallita: {}", job_id, e);
            return Err(e);
        }

        tracing::info!(
            "Job {} pubblicato sulla coda {}",
            job_id,
            self.queue.name()
        );
        Ok(())
    }
}
