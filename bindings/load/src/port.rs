use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use testbed_runner::prelude::TestbedResult;

/// A localhost port that nothing is listening on right now.
///
/// The port is only free at the time of the call, so use it straight away.
pub fn available_port() -> TestbedResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

pub fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}
