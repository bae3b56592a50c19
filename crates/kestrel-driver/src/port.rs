use kestrel_core::{Error, Result};
use std::io::ErrorKind;
use std::net::TcpListener;

const BIND_RETRIES: u32 = 5;

/// Pick a usable local TCP port for the debugging endpoint.
///
/// With `preferred` set, validates that the port currently binds and returns
/// it. Otherwise asks the OS for an ephemeral port, reads the assigned
/// number, and releases the listener immediately so the launched app can
/// claim it.
pub fn allocate_port(preferred: Option<u16>) -> Result<u16> {
    if let Some(port) = preferred {
        return match TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => Ok(port),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                Err(Error::spawn(format!("port {} already in use", port)))
            }
            Err(e) => Err(Error::spawn(format!("cannot bind port {}: {}", port, e))),
        };
    }

    let mut last_err = None;
    for _ in 0..BIND_RETRIES {
        match TcpListener::bind(("127.0.0.1", 0)) {
            Ok(listener) => {
                let port = listener
                    .local_addr()
                    .map_err(|e| Error::spawn(format!("cannot read allocated port: {}", e)))?
                    .port();
                drop(listener);
                return Ok(port);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(Error::spawn(format!(
        "could not allocate a free port after {} attempts: {}",
        BIND_RETRIES,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocated_port_is_bindable() {
        let port = allocate_port(None).unwrap();
        assert!(port > 0);
        // The port must be immediately reusable.
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        drop(listener);
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        // Hold each allocation's port bound while allocating the next so the
        // OS cannot hand the same ephemeral port out twice.
        let mut held = Vec::new();
        let mut ports = HashSet::new();
        for _ in 0..8 {
            let port = allocate_port(None).unwrap();
            held.push(TcpListener::bind(("127.0.0.1", port)).unwrap());
            ports.insert(port);
        }
        assert_eq!(ports.len(), 8);
    }

    #[test]
    fn test_preferred_port_in_use_is_rejected() {
        let holder = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();

        let err = allocate_port(Some(taken)).unwrap_err();
        assert_eq!(err.code(), "E_SPAWN");
    }

    #[test]
    fn test_preferred_free_port_is_accepted() {
        let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        assert_eq!(allocate_port(Some(port)).unwrap(), port);
    }
}
