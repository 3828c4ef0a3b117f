pub use crate::configs::DaDispatcherConfig;

pub mod configs;
