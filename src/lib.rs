//! Reassembles paginated query results observed on an HTTP transport and
//! re-fetches results the host application capped.

pub mod accumulator;
pub mod capture;
pub mod classify;
pub mod config;
pub mod model;
pub mod proxy;
pub mod reconstruct;
pub mod replay;
pub mod transport;
