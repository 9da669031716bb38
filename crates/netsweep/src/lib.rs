pub mod common;
pub mod sweep;

pub type Error = crate::common::error::NetError;
pub type Result<T> = std::result::Result<T, Error>;

pub const NETSWEEP_VERSION: &str = env!("CARGO_PKG_VERSION");
