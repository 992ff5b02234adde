mod bin_path;
mod child_process;

pub mod prelude {
    pub use crate::bin_path::{resolve_binary, AGENT_PATH_ENV, SCRAPER_PATH_ENV};
    pub use crate::child_process::{ChildProcessRunner, CPU_PROFILE_PATH_ENV, STOP_TIMEOUT};

    pub use testbed_runner::prelude::*;
}
