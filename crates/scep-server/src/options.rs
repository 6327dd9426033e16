//! Contains available options to configure the [ScepServer][crate::ScepServer].
use std::net::{IpAddr, SocketAddr};

use crate::constants::DEFAULT_SOCKET_ADDRESS;

/// Specifies available server options.
///
/// The [`Default`] implementation binds the socket to 127.0.0.1 on port 8080
/// (HTTP).
///
/// ### Example with Custom IP Address and Port
///
/// ```
/// use scep_server::ServerOptions;
///
/// // Set IP address and port at the same time
/// let options = ServerOptions::builder()
///     .bind_address([0, 0, 0, 0], 12345)
///     .build();
///
/// // Set IP address only
/// let options = ServerOptions::builder()
///     .bind_ip([0, 0, 0, 0])
///     .build();
///
/// // Set port only
/// let options = ServerOptions::builder()
///     .bind_port(12345)
///     .build();
/// ```
#[derive(Debug)]
pub struct ServerOptions {
    /// The socket address the [`TcpListener`][tokio::net::TcpListener] binds
    /// to.
    pub socket_addr: SocketAddr,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServerOptions {
    /// Returns the default [`ServerOptionsBuilder`] which allows to selectively
    /// customize the options.
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder::default()
    }
}

/// The [`ServerOptionsBuilder`] which allows to selectively customize the
/// server [`ServerOptions`].
#[derive(Debug, Default)]
pub struct ServerOptionsBuilder {
    socket_addr: Option<SocketAddr>,
}

impl ServerOptionsBuilder {
    /// Sets the socket address the server binds to.
    pub fn bind_address(mut self, bind_ip: impl Into<IpAddr>, bind_port: u16) -> Self {
        self.socket_addr = Some(SocketAddr::new(bind_ip.into(), bind_port));
        self
    }

    /// Sets the IP address of the socket address the server binds to.
    pub fn bind_ip(mut self, bind_ip: impl Into<IpAddr>) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDRESS);
        addr.set_ip(bind_ip.into());
        self
    }

    /// Sets the port of the socket address the server binds to.
    pub fn bind_port(mut self, bind_port: u16) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDRESS);
        addr.set_port(bind_port);
        self
    }

    /// Builds the final [`ServerOptions`] by using default values for any not
    /// explicitly set option.
    pub fn build(self) -> ServerOptions {
        ServerOptions {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDRESS),
        }
    }
}
