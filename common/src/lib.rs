pub mod cache;
pub mod error;
pub mod storage;
pub mod utils;
