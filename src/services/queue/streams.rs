//! Canale job su Redis Streams con consumer group
//!
//! Ogni coda è uno stream; tutti i consumer condividono lo stesso group, quindi
//! ogni messaggio va a un solo consumer. I messaggi restano nella pending list
//! finché non vengono confermati con `XACK`: se un consumer muore prima della
//! conferma, al riavvio (con lo stesso nome) li riceve di nuovo.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::channel::{Acknowledger, Delivery, DeliveryStream, JobChannel, QueueHandle};
use crate::error::Result;

/// Campo dello stream che contiene il payload del job
const PAYLOAD_FIELD: &str = "job";

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Voci pendenti esaminate per ogni tentativo di recupero
const CLAIM_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub group: String,
    pub consumer: String,
    /// Dimensione del batch letto e del buffer verso il consumer
    pub prefetch: usize,
    pub block_ms: u64,
    /// Trim approssimativo dello stream alla pubblicazione
    pub stream_max_len: usize,
    /// Le voci pendenti da più di tanto presso un altro consumer vengono
    /// reclamate e riconsegnate. 0 = disabilitato
    pub claim_idle_ms: u64,
}

pub struct RedisJobChannel {
    client: redis::Client,
    conn: ConnectionManager,
    settings: RedisSettings,
}

impl std::fmt::Debug for RedisJobChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobChannel")
            .field("group", &self.settings.group)
            .field("consumer", &self.settings.consumer)
            .finish()
    }
}

impl RedisJobChannel {
    pub async fn connect(settings: RedisSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(
            "Connesso a Redis (group: {}, consumer: {})",
            settings.group,
            settings.consumer
        );

        Ok(Self {
            client,
            conn,
            settings,
        })
    }
}

async fn ensure_group(conn: &mut ConnectionManager, stream: &str, group: &str) -> RedisResult<()> {
    // "0": il group vede anche i messaggi pubblicati prima della sua creazione
    let created: RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
    match created {
        Ok(()) => {
            tracing::info!("Creato consumer group {} sullo stream {}", group, stream);
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl JobChannel for RedisJobChannel {
    async fn declare(&self, name: &str) -> Result<QueueHandle> {
        let mut conn = self.conn.clone();
        ensure_group(&mut conn, name, &self.settings.group).await?;
        Ok(QueueHandle::new(name))
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd_maxlen(
                queue.name(),
                StreamMaxlen::Approx(self.settings.stream_max_len),
                "*",
                &[(PAYLOAD_FIELD, payload)],
            )
            .await?;
        Ok(())
    }

    async fn subscribe(&self, queue: &QueueHandle) -> Result<DeliveryStream> {
        // Connessione dedicata: XREADGROUP BLOCK occuperebbe quella condivisa
        let reader_conn = self.client.get_connection_manager().await?;
        let (tx, rx) = mpsc::channel(self.settings.prefetch.max(1));

        let acker: Arc<dyn Acknowledger> = Arc::new(RedisAcker {
            conn: self.conn.clone(),
            stream: queue.name().to_string(),
            group: self.settings.group.clone(),
        });

        let reader = StreamReader {
            conn: reader_conn,
            stream: queue.name().to_string(),
            settings: self.settings.clone(),
            acker,
        };
        tokio::spawn(reader.run(tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

struct RedisAcker {
    conn: ConnectionManager,
    stream: String,
    group: String,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn ack(&self, tag: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&self.stream, &self.group, &[tag]).await?;
        Ok(())
    }
}

struct StreamReader {
    conn: ConnectionManager,
    stream: String,
    settings: RedisSettings,
    acker: Arc<dyn Acknowledger>,
}

impl StreamReader {
    /// Reclama le voci rimaste pendenti presso altri consumer (crash, riavvio
    /// con un nome diverso, job interrotti allo shutdown). Restituisce
    /// `(id, payload)`.
    async fn claim_abandoned(&mut self) -> RedisResult<Vec<(String, Vec<u8>)>> {
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.settings.group)
            .arg("IDLE")
            .arg(self.settings.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(CLAIM_BATCH)
            .query_async(&mut self.conn)
            .await?;

        // Le proprie voci pendenti sono job ancora in corso o già nel buffer
        let ids: Vec<String> = pending
            .into_iter()
            .filter(|(_, owner, _, _)| *owner != self.settings.consumer)
            .map(|(id, _, _, _)| id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM ricontrolla l'inattività: con più consumer vince uno solo
        let claimed: Vec<redis::Value> = redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg(self.settings.claim_idle_ms)
            .arg(&ids)
            .query_async(&mut self.conn)
            .await?;

        Ok(claimed
            .iter()
            .filter_map(|v| redis::from_redis_value::<(String, Vec<(String, Vec<u8>)>)>(v).ok())
            .map(|(id, fields)| {
                let payload = fields
                    .into_iter()
                    .find(|(field, _)| field == PAYLOAD_FIELD)
                    .map(|(_, value)| value)
                    .unwrap_or_default();
                (id, payload)
            })
            .collect())
    }

    async fn run(mut self, tx: mpsc::Sender<Delivery>) {
        let mut backoff = INITIAL_BACKOFF;
        // Prima la pending list di questo consumer, poi i messaggi nuovi (">")
        let mut cursor = "0".to_string();
        let claim_every = Duration::from_millis((self.settings.claim_idle_ms / 2).max(100));
        let mut last_claim: Option<Instant> = None;

        tracing::info!(
            "In ascolto sullo stream {} come {}",
            self.stream,
            self.settings.consumer
        );

        while !tx.is_closed() {
            let replaying = cursor != ">";

            let claim_due = last_claim.map_or(true, |t| t.elapsed() >= claim_every);
            if !replaying && self.settings.claim_idle_ms > 0 && claim_due {
                last_claim = Some(Instant::now());
                match self.claim_abandoned().await {
                    Ok(claimed) => {
                        for (id, payload) in claimed {
                            tracing::info!("Voce {} reclamata da un consumer inattivo", id);
                            let delivery =
                                Delivery::new(id, payload, true, Some(self.acker.clone()));
                            if tx.send(delivery).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Recupero voci pendenti di {} fallito: {}", self.stream, e)
                    }
                }
            }

            let mut opts = StreamReadOptions::default()
                .group(&self.settings.group, &self.settings.consumer)
                .count(self.settings.prefetch.max(1));
            if !replaying {
                opts = opts.block(self.settings.block_ms as usize);
            }

            let reply: RedisResult<Option<StreamReadReply>> = self
                .conn
                .xread_options(&[&self.stream], &[&cursor], &opts)
                .await;

            let entries: Vec<StreamId> = match reply {
                Ok(reply) => {
                    backoff = INITIAL_BACKOFF;
                    reply
                        .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
                        .unwrap_or_default()
                }
                Err(e) => {
                    tracing::warn!(
                        "Errore lettura stream {}: {} (nuovo tentativo tra {:?})",
                        self.stream,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);

                    // Stream o group cancellati dall'esterno
                    if e.code() == Some("NOGROUP") {
                        if let Err(e) =
                            ensure_group(&mut self.conn, &self.stream, &self.settings.group).await
                        {
                            tracing::error!("Impossibile ricreare il consumer group: {}", e);
                        }
                    }
                    continue;
                }
            };

            if replaying && entries.is_empty() {
                tracing::debug!("Pending list di {} esaurita", self.settings.consumer);
                cursor = ">".to_string();
                continue;
            }

            for entry in entries {
                if replaying {
                    cursor = entry.id.clone();
                }

                // Una voce pending rimossa dal trim non ha più campi: payload vuoto
                let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                let delivery = Delivery::new(entry.id, payload, replaying, Some(self.acker.clone()));

                if tx.send(delivery).await.is_err() {
                    tracing::debug!("Consumer chiuso, reader dello stream {} terminato", self.stream);
                    return;
                }
            }
        }
    }
}
