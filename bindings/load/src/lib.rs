mod load_generator;
mod mock_backend;
mod port;

pub mod prelude {
    pub use crate::load_generator::TcpLoadGenerator;
    pub use crate::mock_backend::TcpMockBackend;
    pub use crate::port::{available_port, localhost};

    pub use testbed_runner::prelude::*;
}
