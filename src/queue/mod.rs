pub mod types;
pub mod handlers;
pub mod write_queue;

#[cfg(test)]
mod tests;

pub use types::*;
pub use handlers::{WriteHandler, WriteHandlerRegistry};
pub use write_queue::WriteQueue;
