//! Loop-bound name resolution.

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolves host names on behalf of the connections of one [`EventLoop`].
///
/// Created lazily by [`EventLoop::dns`] and shared by every connection on that
/// loop. Lookups run on the loop's runtime (the system resolver itself on its
/// blocking pool) so they never stall dispatch.
///
/// [`EventLoop`]: crate::EventLoop
/// [`EventLoop::dns`]: crate::EventLoop::dns
#[derive(Debug)]
pub struct DnsResolver {
    handle: Handle,
}

impl DnsResolver {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Resolves `host` to the socket addresses for `port`.
    ///
    /// IP literals (including bracket-free IPv6) are returned without a lookup.
    ///
    /// # Errors
    ///
    /// [`Error::Resolve`] when the lookup fails or yields nothing.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let name = host.to_owned();
        let lookup = self.handle.spawn(async move {
            lookup_host((name.as_str(), port))
                .await
                .map(|addrs| addrs.collect::<Vec<_>>())
        });

        let addrs = match lookup.await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                debug!(host, error = %e, "lookup failed");
                Vec::new()
            }
            Err(e) => {
                debug!(host, error = %e, "lookup task did not complete");
                Vec::new()
            }
        };

        if addrs.is_empty() {
            return Err(Error::Resolve {
                host: host.to_owned(),
            });
        }
        debug!(host, count = addrs.len(), "resolved");
        Ok(addrs)
    }
}
