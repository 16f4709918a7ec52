//! Coda dei job immagine
//!
//! Il producer pubblica l'id del prodotto, il consumer lo riceve ed esegue la
//! pipeline di trasformazione con concorrenza limitata.

mod channel;
mod consumer;
mod memory;
mod pipeline;
mod producer;
mod streams;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{Acknowledger, Delivery, DeliveryStream, JobChannel, QueueHandle};
pub use consumer::{Consumer, ConsumerReport, ConsumerSettings, ConsumerState};
pub use memory::MemoryJobChannel;
pub use pipeline::{Pipeline, PipelineSettings};
pub use producer::Producer;
pub use streams::{RedisJobChannel, RedisSettings};
