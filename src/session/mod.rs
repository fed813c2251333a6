pub mod lock;
pub mod recovery;
pub mod coordinator;


pub use lock::*;
pub use recovery::*;
pub use coordinator::*;
