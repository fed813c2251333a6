pub mod types;
pub mod registry;
pub mod phases;


pub use types::*;
pub use registry::{ResourceLoader, ResourceLoaderRegistry};
pub use phases::{PhasedResync, ResourceCache};
