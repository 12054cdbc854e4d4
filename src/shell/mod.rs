//! Native shell processes: launching, stream decoding, output pumps, and
//! interrupt delivery.

pub mod encoding;
pub mod launcher;
pub mod pump;
pub mod signal;
