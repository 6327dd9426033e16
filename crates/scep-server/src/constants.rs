//! Contains various constant definitions, mostly default values of the
//! command line options.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// The default HTTP port `8080`
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// The default IP address [`Ipv4Addr::LOCALHOST`] (`127.0.0.1`) the server
/// binds to. Exposing the server is left to a reverse proxy terminating TLS.
pub const DEFAULT_LISTEN_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// The default socket address `127.0.0.1:8080` the server binds to.
pub const DEFAULT_SOCKET_ADDRESS: SocketAddr =
    SocketAddr::new(DEFAULT_LISTEN_ADDRESS, DEFAULT_HTTP_PORT);

/// The default depot directory, relative to the working directory.
pub const DEFAULT_DEPOT_PATH: &str = "depot";

/// Certificates expiring within this many days can be renewed.
pub const DEFAULT_ALLOW_RENEWAL_DAYS: u32 = 14;

pub const DEFAULT_CERTIFICATE_VALIDITY_DAYS: u32 =
    scep_certs::ca::DEFAULT_CERTIFICATE_VALIDITY_DAYS;

/// The CSR verifier is killed if it takes longer than this.
pub const DEFAULT_CSR_VERIFIER_TIMEOUT: Duration = Duration::from_secs(30);

/// The path all SCEP operations are served under.
pub const SCEP_PATH: &str = "/scep";
