//! Bridge account state: cached snapshot and head-driven refresh

pub mod cache;
pub mod coalescer;

pub use cache::{AccountSnapshot, AccountStateCache};
pub use coalescer::HeadCoalescer;
