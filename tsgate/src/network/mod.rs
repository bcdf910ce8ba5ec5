//! The native session boundary: traits the database backend implements
//! and the [`Connection`] wrapper the pool hands out.

mod connection;
mod session;

pub use connection::Connection;
pub use session::{Database, Session};
