//! Library to backup a [BookStack][bs] deployment.
//!
//! The deployment is expected to run via Docker Compose with a MariaDB (or
//! MySQL) service holding the wiki database. The different backup modules
//! are located in the [`backends`] module; pushing the resulting artifacts
//! to a git remote is handled by the [`publish`] module.
//!
//! [bs]: https://www.bookstackapp.com/

#![forbid(unsafe_code)]

pub mod backends;
pub mod bookstack;
pub mod cli;
pub mod publish;
pub mod util;
