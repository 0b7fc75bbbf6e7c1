pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod task;
