#![allow(dead_code)]

pub use sdsweep_test_utils::builders;
pub use sdsweep_test_utils::fake_worker;
pub use sdsweep_test_utils::{init_tracing, with_timeout};
