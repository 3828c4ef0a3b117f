pub(crate) mod utils;

mod batcher_test;
