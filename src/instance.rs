//! Single-instance guard backed by a loopback TCP listener.

use std::net::TcpListener;

pub const INSTANCE_ADDR: &str = "127.0.0.1:29582";

/// Held for the lifetime of the process; dropping it releases the port.
#[derive(Debug)]
pub struct InstanceGuard {
    _listener: TcpListener,
}

/// `None` when another process already holds `addr`.
pub fn try_acquire(addr: &str) -> Option<InstanceGuard> {
    match TcpListener::bind(addr) {
        Ok(listener) => Some(InstanceGuard {
            _listener: listener,
        }),
        Err(e) => {
            log::debug!("instance port {} unavailable: {}", addr, e);
            None
        }
    }
}
