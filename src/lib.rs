/// Logs at debug level when `$val` is true. Used for per-object tracing that is far too
/// noisy to leave to the logger's own filtering.
#[macro_export]
macro_rules! log_if {
    ($val: expr,$($rest:tt)*) => {
        if $val {
            log::debug!($($rest)*);
        }
    };
}

pub mod error;
pub mod heap;
pub mod options;
pub mod runtime;
pub mod snapshot;

pub use error::{HeapError, Result, SnapshotError};
