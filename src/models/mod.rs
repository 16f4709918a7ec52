pub mod job;
pub mod product;
pub mod response;

pub use job::*;
pub use product::*;
pub use response::*;
