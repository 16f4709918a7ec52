//! Loop di ricezione: un'unità di lavoro per consegna, con concorrenza limitata

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::channel::JobChannel;
use super::pipeline::Pipeline;
use crate::error::Result;
use crate::models::{Job, JobOutcome, JobStatus};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Job in elaborazione contemporaneamente
    pub max_concurrent_jobs: usize,
    /// None = attende tutti i job in corso allo shutdown
    pub drain_timeout: Option<Duration>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            drain_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    /// In attesa di consegne, con almeno uno slot libero
    Listening,
    /// Tutti gli slot occupati da job in corso: nessuna consegna viene prelevata
    Dispatched,
    Draining,
    Stopped,
}

/// Conteggi per esito, restituiti alla fine di [`Consumer::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub received: usize,
    pub completed: usize,
    pub partial: usize,
    pub no_images: usize,
    pub not_found: usize,
    pub failed: usize,
    pub malformed: usize,
    pub panicked: usize,
    pub aborted: usize,
}

impl ConsumerReport {
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome.status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Partial => self.partial += 1,
            JobStatus::NoImages => self.no_images += 1,
            JobStatus::NotFound => self.not_found += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    /// Job arrivati a un esito, esclusi i payload scartati
    pub fn finished(&self) -> usize {
        self.completed + self.partial + self.no_images + self.not_found + self.failed
    }
}

pub struct Consumer {
    channel: Arc<dyn JobChannel>,
    queue_name: String,
    pipeline: Arc<Pipeline>,
    settings: ConsumerSettings,
    outcomes: Option<mpsc::UnboundedSender<JobOutcome>>,
    state: watch::Sender<ConsumerState>,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn JobChannel>,
        queue_name: impl Into<String>,
        pipeline: Arc<Pipeline>,
        settings: ConsumerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            channel,
            queue_name: queue_name.into(),
            pipeline,
            settings,
            outcomes: None,
            state,
        }
    }

    /// Inoltra ogni esito anche a un canale esterno
    pub fn with_outcome_sink(mut self, sink: mpsc::UnboundedSender<JobOutcome>) -> Self {
        self.outcomes = Some(sink);
        self
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn reap(&self, result: std::result::Result<JobOutcome, JoinError>, report: &mut ConsumerReport) {
        match result {
            Ok(outcome) => {
                report.record(&outcome);
                if let Some(sink) = &self.outcomes {
                    let _ = sink.send(outcome);
                }
            }
            Err(e) if e.is_panic() => {
                // consegna non confermata: verrà riconsegnata
                tracing::error!("Job terminato con panic: {}", e);
                report.panicked += 1;
            }
            Err(_) => report.aborted += 1,
        }
    }

    /// Riceve e smista job finché `shutdown` non viene cancellato o il canale
    /// non si chiude, poi attende i job in corso.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ConsumerReport> {
        let queue = self.channel.declare(&self.queue_name).await?;
        let mut deliveries = self.channel.subscribe(&queue).await?;

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_jobs.max(1)));
        let mut units: JoinSet<JobOutcome> = JoinSet::new();
        let mut report = ConsumerReport::default();

        tracing::info!(
            "Consumer in ascolto su {} (max {} job concorrenti)",
            queue.name(),
            self.settings.max_concurrent_jobs
        );
        self.set_state(ConsumerState::Listening);

        loop {
            if semaphore.available_permits() == 0 {
                self.set_state(ConsumerState::Dispatched);
            }

            // Prima il permesso, poi la consegna: a pool saturo non si preleva nulla
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(result) = units.join_next(), if !units.is_empty() => {
                    self.reap(result, &mut report);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            self.set_state(ConsumerState::Listening);

            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(result) = units.join_next(), if !units.is_empty() => {
                    self.reap(result, &mut report);
                    continue;
                }
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        tracing::warn!("Canale {} chiuso, arresto del consumer", queue.name());
                        break;
                    }
                },
            };

            report.received += 1;

            let job = match Job::from_payload(&delivery.payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Messaggio {} scartato: {}", delivery.tag, e);
                    report.malformed += 1;
                    if let Err(e) = delivery.ack().await {
                        tracing::error!("Conferma del messaggio {} fallita: {}", delivery.tag, e);
                    }
                    continue;
                }
            };

            let span = tracing::info_span!(
                "job",
                id = %job.id,
                redelivered = delivery.redelivered
            );
            let pipeline = self.pipeline.clone();

            units.spawn(
                async move {
                    let _permit = permit;
                    let outcome = pipeline.run(job).await;
                    tracing::info!("Job terminato: {}", outcome.status);

                    // Conferma solo a lavoro concluso: un crash prima di qui
                    // provoca una riconsegna
                    if let Err(e) = delivery.ack().await {
                        tracing::error!("Conferma del messaggio {} fallita: {}", delivery.tag, e);
                    }
                    outcome
                }
                .instrument(span),
            );
        }

        drop(deliveries);
        self.set_state(ConsumerState::Draining);
        tracing::info!("Arresto: attesa di {} job in corso", units.len());

        let drained = {
            let drain = async {
                while let Some(result) = units.join_next().await {
                    self.reap(result, &mut report);
                }
            };
            match self.settings.drain_timeout {
                Some(timeout) => tokio::time::timeout(timeout, drain).await.is_ok(),
                None => {
                    drain.await;
                    true
                }
            }
        };

        if !drained {
            tracing::warn!(
                "Timeout di arresto scaduto, {} job interrotti e lasciati da riconsegnare",
                units.len()
            );
            units.abort_all();
            while let Some(result) = units.join_next().await {
                self.reap(result, &mut report);
            }
        }

        self.set_state(ConsumerState::Stopped);
        tracing::info!(
            "Consumer fermo: {} ricevuti, {} completati, {} parziali, {} falliti",
            report.received,
            report.completed,
            report.partial,
            report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::testing::{FakeStore, FakeTransformer};
    use crate::services::queue::{MemoryJobChannel, PipelineSettings};
    use std::sync::atomic::Ordering;

    const QUEUE: &str = "jobs";

    fn store_with(ids: impl IntoIterator<Item = i64>) -> Arc<FakeStore> {
        let store = ids.into_iter().fold(FakeStore::default(), |store, id| {
            store.with_product(id, &["https://h/a.jpg"])
        });
        Arc::new(store)
    }

    fn consumer(
        channel: &Arc<MemoryJobChannel>,
        store: Arc<FakeStore>,
        transformer: Arc<FakeTransformer>,
        settings: ConsumerSettings,
    ) -> Consumer {
        let pipeline = Pipeline::new(
            store,
            transformer,
            PipelineSettings {
                target_width: 8,
                image_concurrency: 1,
                ..Default::default()
            },
        );
        Consumer::new(channel.clone(), QUEUE, Arc::new(pipeline), settings)
    }

    async fn publish(channel: &MemoryJobChannel, payloads: &[&str]) {
        let queue = channel.declare(QUEUE).await.unwrap();
        for p in payloads {
            channel.publish(&queue, p.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_processes_and_acks_every_job() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["1", "2", "3"]).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = consumer(
            &channel,
            store_with(1..=3),
            Arc::new(FakeTransformer::default()),
            ConsumerSettings::default(),
        )
        .with_outcome_sink(tx);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        for _ in 0..3 {
            let outcome = rx.recv().await.unwrap();
            assert_eq!(outcome.status, JobStatus::Completed);
        }
        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.completed, 3);
        let queue = channel.declare(QUEUE).await.unwrap();
        assert_eq!(channel.acked(&queue).len(), 3);
        assert_eq!(channel.unacked_count(&queue), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["1", "2", "3", "4", "5", "6"]).await;

        let transformer = Arc::new(FakeTransformer::with_delay(Duration::from_millis(30)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = consumer(
            &channel,
            store_with(1..=6),
            transformer.clone(),
            ConsumerSettings {
                max_concurrent_jobs: 2,
                drain_timeout: None,
            },
        )
        .with_outcome_sink(tx);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        for _ in 0..6 {
            rx.recv().await.unwrap();
        }
        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.completed, 6);
        let peak = transformer.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "picco di {} job concorrenti", peak);
    }

    #[tokio::test]
    async fn test_saturated_pool_stops_receiving() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["1", "2", "3"]).await;

        let consumer = consumer(
            &channel,
            store_with(1..=3),
            Arc::new(FakeTransformer::with_delay(Duration::from_millis(300))),
            ConsumerSettings {
                max_concurrent_jobs: 1,
                drain_timeout: None,
            },
        );

        let state = consumer.state();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        // una sola consegna prelevata, le altre restano in coda
        let queue = channel.declare(QUEUE).await.unwrap();
        assert_eq!(channel.unacked_count(&queue), 1);
        assert_eq!(*state.borrow(), ConsumerState::Dispatched);

        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked_and_dropped() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["abc", "1"]).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = consumer(
            &channel,
            store_with([1]),
            Arc::new(FakeTransformer::default()),
            ConsumerSettings::default(),
        )
        .with_outcome_sink(tx);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.job_id.0, 1);
        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.received, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.completed, 1);
        let queue = channel.declare(QUEUE).await.unwrap();
        assert_eq!(channel.acked(&queue).len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_jobs() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["1"]).await;

        let store = store_with([1]);
        let consumer = consumer(
            &channel,
            store.clone(),
            Arc::new(FakeTransformer::with_delay(Duration::from_millis(100))),
            ConsumerSettings::default(),
        );
        let mut state = consumer.state();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(store.processed(1).unwrap(), vec!["outputs/1/a.jpg"]);
        assert_eq!(*state.borrow_and_update(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_drain_timeout_leaves_job_for_redelivery() {
        let channel = Arc::new(MemoryJobChannel::new());
        publish(&channel, &["1"]).await;

        let consumer = consumer(
            &channel,
            store_with([1]),
            Arc::new(FakeTransformer::with_delay(Duration::from_secs(5))),
            ConsumerSettings {
                max_concurrent_jobs: 1,
                drain_timeout: Some(Duration::from_millis(20)),
            },
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.aborted, 1);
        assert_eq!(report.finished(), 0);
        let queue = channel.declare(QUEUE).await.unwrap();
        assert_eq!(channel.unacked_count(&queue), 1);
        assert_eq!(channel.redeliver_unacked(&queue).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_consumer() {
        let channel = Arc::new(MemoryJobChannel::new());
        let consumer = consumer(
            &channel,
            store_with([]),
            Arc::new(FakeTransformer::default()),
            ConsumerSettings::default(),
        );

        channel.close();
        let report = tokio::time::timeout(
            Duration::from_secs(1),
            consumer.run(CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report, ConsumerReport::default());
    }
}
