//! Canale job in memoria, per test e uso embedded

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use super::channel::{Acknowledger, Delivery, DeliveryStream, JobChannel, QueueHandle};
use crate::error::{AppError, Result};

struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<Message>,
    // Consumer concorrenti si contendono lo stesso receiver
    rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
    unacked: Mutex<BTreeMap<u64, Vec<u8>>>,
    acked: Mutex<Vec<String>>,
}

impl MemoryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            unacked: Mutex::new(BTreeMap::new()),
            acked: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, payload: Vec<u8>, redelivered: bool) -> Result<()> {
        self.tx
            .send(Message {
                payload,
                redelivered,
            })
            .map_err(|_| AppError::Internal("coda in memoria chiusa".to_string()))
    }
}

#[async_trait]
impl Acknowledger for MemoryQueue {
    async fn ack(&self, tag: &str) -> Result<()> {
        if let Ok(tag_num) = tag.parse::<u64>() {
            if let Ok(mut unacked) = self.unacked.lock() {
                unacked.remove(&tag_num);
            }
        }
        if let Ok(mut acked) = self.acked.lock() {
            acked.push(tag.to_string());
        }
        Ok(())
    }
}

/// Canale in-process con semantica at-least-once.
///
/// Le consegne non confermate restano tracciate e possono essere rimesse in
/// coda con [`MemoryJobChannel::redeliver_unacked`], simulando il crash di un
/// consumer tra ricezione e conferma.
#[derive(Default)]
pub struct MemoryJobChannel {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    next_tag: Arc<AtomicU64>,
    closed: CancellationToken,
}

impl MemoryJobChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| AppError::Internal("lock code avvelenato".to_string()))?;
        queues
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("coda non dichiarata: {}", name)))
    }

    /// Rimette in coda tutte le consegne non confermate, restituisce quante
    pub fn redeliver_unacked(&self, queue: &QueueHandle) -> Result<usize> {
        let q = self.queue(queue.name())?;
        let pending: Vec<Vec<u8>> = match q.unacked.lock() {
            Ok(mut unacked) => std::mem::take(&mut *unacked).into_values().collect(),
            Err(_) => return Err(AppError::Internal("lock avvelenato".to_string())),
        };

        let count = pending.len();
        for payload in pending {
            q.push(payload, true)?;
        }
        Ok(count)
    }

    pub fn acked(&self, queue: &QueueHandle) -> Vec<String> {
        self.queue(queue.name())
            .ok()
            .and_then(|q| q.acked.lock().ok().map(|a| a.clone()))
            .unwrap_or_default()
    }

    pub fn unacked_count(&self, queue: &QueueHandle) -> usize {
        self.queue(queue.name())
            .ok()
            .and_then(|q| q.unacked.lock().ok().map(|u| u.len()))
            .unwrap_or(0)
    }

    /// Termina tutte le sottoscrizioni attive e future
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl JobChannel for MemoryJobChannel {
    async fn declare(&self, name: &str) -> Result<QueueHandle> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| AppError::Internal("lock code avvelenato".to_string()))?;
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new()));
        Ok(QueueHandle::new(name))
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> Result<()> {
        self.queue(queue.name())?.push(payload.to_vec(), false)
    }

    async fn subscribe(&self, queue: &QueueHandle) -> Result<DeliveryStream> {
        let q = self.queue(queue.name())?;
        let ctx = (q, self.closed.clone(), self.next_tag.clone());

        let stream = futures::stream::unfold(ctx, |(q, closed, next_tag)| async move {
            let message = tokio::select! {
                biased;
                _ = closed.cancelled() => None,
                m = async { q.rx.lock().await.recv().await } => m,
            }?;

            let tag = next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            if let Ok(mut unacked) = q.unacked.lock() {
                unacked.insert(tag, message.payload.clone());
            }

            let acker: Arc<dyn Acknowledger> = q.clone();
            let delivery = Delivery::new(
                tag.to_string(),
                message.payload,
                message.redelivered,
                Some(acker),
            );
            Some((delivery, (q, closed, next_tag)))
        });

        Ok(stream.boxed())
    }
}
