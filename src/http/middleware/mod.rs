pub mod connection_close;

pub use connection_close::close_connections_when_exiting;
