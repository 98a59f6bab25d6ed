pub mod connection;
pub mod migrator;
pub mod schema;

pub use connection::*;
pub use migrator::*;
pub use schema::*;
