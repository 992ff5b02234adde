use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// How long a started process has to open its endpoint.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether something is accepting TCP connections at `endpoint`.
pub fn is_reachable(endpoint: SocketAddr) -> bool {
    match TcpStream::connect_timeout(&endpoint, CONNECT_TIMEOUT) {
        Ok(_) => true,
        Err(e) => {
            log::trace!("Endpoint {endpoint} not reachable yet: {e}");
            false
        }
    }
}

pub(crate) fn describe(endpoint: SocketAddr) -> String {
    format!("connection to tcp:{endpoint}")
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn listening_endpoint_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(is_reachable(addr));

        drop(listener);
        assert!(!is_reachable(addr));
    }

    #[test]
    fn description_names_endpoint() {
        let addr: SocketAddr = "127.0.0.1:4317".parse().unwrap();
        assert_eq!("connection to tcp:127.0.0.1:4317", describe(addr));
    }
}
