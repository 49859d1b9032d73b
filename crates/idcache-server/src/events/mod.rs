//! Change event transport between instances.

pub mod redis;

pub use self::redis::{ChannelError, RedisEventChannel};
