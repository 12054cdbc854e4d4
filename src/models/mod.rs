//! Domain model module declarations.

pub mod session;
