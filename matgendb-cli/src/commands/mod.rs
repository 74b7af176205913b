pub mod index;
pub mod init;
pub mod insert;
pub mod query;

pub use index::*;
pub use init::*;
pub use insert::*;
pub use query::*;
