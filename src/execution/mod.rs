pub mod builder;
pub mod executor;
pub mod keys;
pub mod retry;
