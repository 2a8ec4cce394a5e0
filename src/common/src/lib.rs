pub mod cli;
pub mod config;
pub mod object_ref;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Configuration;
pub use object_ref::{ObjectRef, ObjectRefError};
