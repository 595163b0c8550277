//! # datum connector: SQL Server logins and users
//!
//! The representative relational-directory connector. It reconciles engine
//! objects against SQL Server's composite identity model: a server login,
//! an optionally linked database user, and the user's role memberships.
//!
//! The actual SQL client is a thin seam behind [`SqlWrapper`]; the
//! connector itself only builds statements and sequences them. See
//! [`SqlUserEndpoint`] for the sequencing rules.

pub mod endpoint;
pub mod wrapper;

pub use endpoint::SqlUserEndpoint;
pub use wrapper::SqlWrapper;
