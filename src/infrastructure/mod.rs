pub mod config;
pub mod connectivity;
pub mod error;
pub mod push_client;
pub mod storage;
pub mod timer_repository;
pub mod transaction;
