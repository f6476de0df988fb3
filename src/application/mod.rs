pub mod bootstrap;
pub mod history;
pub mod logging;
pub mod sync_engine;
