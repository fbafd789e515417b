//! Cache access: the backend trait, the shared connection manager, and the
//! two backend implementations (Redis/Garnet over RESP2, and an in-process
//! map for tests and local development).

pub mod backend;
pub mod manager;
pub mod memory;
pub mod redis;

pub use backend::CacheBackend;
pub use manager::CacheConnectionManager;
pub use memory::MemoryCache;
pub use redis::RedisCache;
