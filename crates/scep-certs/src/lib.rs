//! This crate provides types and functions to work with the X.509 material of
//! a SCEP certificate authority. It can be used to bootstrap a self-signed CA
//! into a depot directory, to load the (encrypted) CA key again, to parse
//! PKCS#10 certificate signing requests and to issue client certificates for
//! them.
//!
//! The RSA private key of the CA is stored in the legacy, RFC 1421 style
//! encrypted PEM container (`Proc-Type: 4,ENCRYPTED`), which is what OpenSSL
//! and other SCEP implementations write and read for `RSA PRIVATE KEY` blocks.
//!
//! ## References
//!
//! - <https://datatracker.ietf.org/doc/html/rfc5280>
//! - <https://datatracker.ietf.org/doc/html/rfc2986>
//! - <https://datatracker.ietf.org/doc/html/rfc8894>
//! - <https://datatracker.ietf.org/doc/html/rfc1421>
pub mod bootstrap;
pub mod ca;
pub mod cert_builder;
pub mod csr;
pub mod keys;

pub use bootstrap::{create_certificate_authority, create_key};
pub use ca::CertificateAuthority;
pub use cert_builder::CertificateBuilder;
pub use csr::CertificateSigningRequest;

