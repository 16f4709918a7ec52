pub mod queue;
pub mod store;
pub mod transformer;

pub use store::{ProductStore, SqliteProductStore};
pub use transformer::{HttpImageTransformer, ImageTransformer};
