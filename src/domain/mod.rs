pub mod models;
pub mod pending_queue;
pub mod time_window;
