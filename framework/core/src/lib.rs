mod error;
mod failure;
mod shutdown;

pub mod prelude {
    pub use crate::error::{ConditionTimeoutError, RunAbortedError};
    pub use crate::failure::FailureSignal;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}
