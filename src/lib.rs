pub mod claim;
pub mod error;
pub mod http_client;
pub mod model;
pub mod pool;
pub mod race;
pub mod recorder;
