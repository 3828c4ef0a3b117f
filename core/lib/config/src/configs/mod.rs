pub use self::da_dispatcher::DaDispatcherConfig;

pub mod da_dispatcher;
