//! Small helpers shared by the backup backends.

pub mod lock;
pub mod retention;
