//! Contratto del canale job tra producer e consumer

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::Result;

/// Coda dichiarata: durevole, non esclusiva, mai cancellata automaticamente
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    name: String,
}

impl QueueHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Conferma di avvenuta elaborazione di una consegna
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, tag: &str) -> Result<()>;
}

/// Un messaggio ricevuto, eventualmente una riconsegna
pub struct Delivery {
    pub tag: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

impl Delivery {
    pub fn new(
        tag: impl Into<String>,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Self {
        Self {
            tag: tag.into(),
            payload,
            redelivered,
            acker,
        }
    }

    /// No-op per i canali con conferma automatica
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack(&self.tag).await,
            None => Ok(()),
        }
    }
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Canale ordinato con consegna at-least-once.
///
/// L'ordine di pubblicazione è preservato in ricezione; l'ordine di
/// completamento no, una volta che i job vengono elaborati in parallelo.
#[async_trait]
pub trait JobChannel: Send + Sync {
    /// Idempotente
    async fn declare(&self, name: &str) -> Result<QueueHandle>;

    /// Fallisce solo per errori di trasporto, senza retry impliciti
    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> Result<()>;

    /// Sequenza illimitata di consegne, termina solo alla chiusura del canale
    async fn subscribe(&self, queue: &QueueHandle) -> Result<DeliveryStream>;
}
