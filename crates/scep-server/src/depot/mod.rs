//! The depot stores the CA material and keeps track of issued certificates.
//!
//! [`Depot`] is the capability the signer pipeline is built upon, [`FileDepot`]
//! its implementation backed by a directory on disk.
use std::path::PathBuf;

use async_trait::async_trait;
use scep_certs::keys::rsa;
use snafu::Snafu;
use x509_cert::{Certificate, name::Name};

mod file;
pub use file::FileDepot;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to read {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write {path:?}"))]
    WriteFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the CA certificates in {path:?}"))]
    ParseCaCertificates {
        source: x509_cert::der::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load the CA key from {path:?}"))]
    LoadCaKey { source: rsa::Error, path: PathBuf },

    #[snafu(display("failed to parse the certificate in {path:?}"))]
    ParseCertificate {
        source: x509_cert::der::Error,
        path: PathBuf,
    },

    #[snafu(display("{path:?} contains no certificate"))]
    NoCertificate { path: PathBuf },

    #[snafu(display("failed to encode the certificate as PEM"))]
    EncodeCertificate { source: x509_cert::der::Error },

    #[snafu(display("the serial file {path:?} contains the invalid serial {serial:?}"))]
    InvalidSerial {
        source: std::num::ParseIntError,
        path: PathBuf,
        serial: String,
    },

    #[snafu(display("no serial numbers left"))]
    SerialsExhausted,
}

/// Storage and retrieval of CA material and issued certificates.
#[async_trait]
pub trait Depot: Send + Sync {
    /// Returns the CA certificate chain, the CA certificate first, and the CA
    /// key, decrypted with `passphrase` if it is encrypted.
    async fn ca(&self, passphrase: &[u8]) -> Result<(Vec<Certificate>, rsa::SigningKey)>;

    /// Hands out the next unused serial number.
    async fn serial(&self) -> Result<u64>;

    /// Stores an issued certificate under `name`.
    async fn put(&self, name: &str, certificate: &Certificate) -> Result<()>;

    /// Returns the issued certificate for `subject` which is currently valid
    /// and expires last, if any.
    async fn find_valid(&self, subject: &Name) -> Result<Option<Certificate>>;
}
