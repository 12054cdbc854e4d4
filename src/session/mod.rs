//! Session registry, live terminal sessions, and their teardown.

pub mod cleanup;
pub mod registry;
pub mod terminal;
