pub mod types;
pub mod store;
pub mod file;


pub use types::*;
pub use store::{KeyValueStore, MemoryStore, load_json, save_json};
pub use file::FileStore;
