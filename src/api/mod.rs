pub mod connection;
pub mod router;

pub use connection::ConnectionHandler;
pub use router::Router;
