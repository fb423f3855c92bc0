//! Store adapters. SQLite is the only backend; everything above it talks
//! to these modules, never to a connection directly.

pub mod sqlite;
