//! Contains primitives to create, store and load the private key of the
//! certificate authority.
//!
//! ## RSA
//!
//! SCEP clients expect an RSA CA, as the CA key is also used to decrypt the
//! PKCS#7 envelopes of the enrollment requests. In order to work with RSA
//! keys, this crate requires the [`rsa`] dependency.
//!
//! ```no_run
//! use scep_certs::keys::rsa::SigningKey;
//! let key = SigningKey::new(4096).unwrap();
//! ```
//!
//! It should be noted, that the crate is currently vulnerable to the recently
//! discovered Marvin attack. The `openssl` crate is also impacted by this. See:
//!
//! - <https://people.redhat.com/~hkario/marvin/>
//! - <https://rustsec.org/advisories/RUSTSEC-2023-0071.html>
//! - <https://github.com/RustCrypto/RSA/issues/19>
//!
//! ## Encrypted PEM
//!
//! The [`legacy_pem`] module implements the RFC 1421 encryption of PEM blocks
//! which is used to store the CA key at rest.
pub mod legacy_pem;
pub mod rsa;
