use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub queue_name: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub target_width: u32,
    pub image_quality: u8,
    pub output_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub image_concurrency: usize,
    pub prefetch: usize,
    pub block_ms: u64,
    pub stream_max_len: usize,
    /// Inattività dopo cui un messaggio non confermato di un altro consumer
    /// viene reclamato, 0 = mai
    pub claim_idle_ms: u64,
    /// Nessun timeout se assente: un download bloccato blocca solo il suo job
    pub fetch_timeout_secs: Option<u64>,
    /// Attesa massima per i job in corso allo shutdown, 0 = illimitata
    pub drain_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "sqlite:prodimg.db?mode=rwc".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_name: "product_images".to_string(),
            consumer_group: "image-workers".to_string(),
            consumer_name: format!("worker-{}", uuid::Uuid::new_v4()),
            target_width: 1024,
            image_quality: 60,
            output_dir: PathBuf::from("outputs"),
            max_concurrent_jobs: 10,
            image_concurrency: 4,
            prefetch: 16,
            block_ms: 5000,
            stream_max_len: 100_000,
            claim_idle_ms: 300_000,
            fetch_timeout_secs: None,
            drain_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PRODIMG_HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PRODIMG_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(name) = std::env::var("PRODIMG_QUEUE_NAME") {
            config.queue_name = name;
        }

        if let Ok(group) = std::env::var("PRODIMG_CONSUMER_GROUP") {
            config.consumer_group = group;
        }

        // Nome stabile tra i riavvii: permette di riprendere i messaggi non confermati
        if let Ok(name) = std::env::var("PRODIMG_CONSUMER_NAME") {
            config.consumer_name = name;
        }

        if let Ok(width) = std::env::var("PRODIMG_TARGET_WIDTH") {
            if let Ok(w) = width.parse::<u32>() {
                if w > 0 {
                    config.target_width = w;
                }
            }
        }

        if let Ok(quality) = std::env::var("PRODIMG_IMAGE_QUALITY") {
            if let Ok(q) = quality.parse::<u8>() {
                config.image_quality = q.clamp(1, 100);
            }
        }

        if let Ok(dir) = std::env::var("PRODIMG_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Ok(max) = std::env::var("PRODIMG_MAX_CONCURRENT_JOBS") {
            if let Ok(m) = max.parse::<usize>() {
                config.max_concurrent_jobs = m.max(1);
            }
        }

        if let Ok(n) = std::env::var("PRODIMG_IMAGE_CONCURRENCY") {
            if let Ok(n) = n.parse::<usize>() {
                config.image_concurrency = n.max(1);
            }
        }

        if let Ok(n) = std::env::var("PRODIMG_PREFETCH") {
            if let Ok(n) = n.parse::<usize>() {
                config.prefetch = n.max(1);
            }
        }

        if let Ok(ms) = std::env::var("PRODIMG_BLOCK_MS") {
            if let Ok(ms) = ms.parse() {
                config.block_ms = ms;
            }
        }

        if let Ok(len) = std::env::var("PRODIMG_STREAM_MAX_LEN") {
            if let Ok(len) = len.parse() {
                config.stream_max_len = len;
            }
        }

        if let Ok(ms) = std::env::var("PRODIMG_CLAIM_IDLE_MS") {
            if let Ok(ms) = ms.parse() {
                config.claim_idle_ms = ms;
            }
        }

        if let Ok(secs) = std::env::var("PRODIMG_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout_secs = secs.parse().ok().filter(|s| *s > 0);
        }

        if let Ok(secs) = std::env::var("PRODIMG_DRAIN_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                config.drain_timeout_secs = s;
            }
        }

        config
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn pipeline_settings(&self) -> crate::services::queue::PipelineSettings {
        crate::services::queue::PipelineSettings {
            target_width: self.target_width,
            quality: self.image_quality,
            output_dir: self.output_dir.clone(),
            image_concurrency: self.image_concurrency,
        }
    }

    pub fn consumer_settings(&self) -> crate::services::queue::ConsumerSettings {
        crate::services::queue::ConsumerSettings {
            max_concurrent_jobs: self.max_concurrent_jobs,
            drain_timeout: Some(self.drain_timeout_secs)
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn redis_settings(&self) -> crate::services::queue::RedisSettings {
        crate::services::queue::RedisSettings {
            url: self.redis_url.clone(),
            group: self.consumer_group.clone(),
            consumer: self.consumer_name.clone(),
            prefetch: self.prefetch,
            block_ms: self.block_ms,
            stream_max_len: self.stream_max_len,
            claim_idle_ms: self.claim_idle_ms,
        }
    }
}
