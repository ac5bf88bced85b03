pub mod connection;
pub mod handler;
pub mod router;
pub mod types;

pub use connection::{ConnectionManager, SendOutcome, WsSender};
pub use router::ChatRouter;
