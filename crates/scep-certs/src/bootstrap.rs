//! One-time bootstrap of the CA material in a depot directory.
//!
//! The bootstrap writes two files, each created exclusively (the create fails
//! if the file is already present) and readable by the owner only:
//!
//! - [`CA_KEY_FILE_NAME`], the encrypted `RSA PRIVATE KEY` PEM block.
//! - [`CA_CERTIFICATE_FILE_NAME`], the self-signed `CERTIFICATE` PEM block.
//!
//! Existing material is never overwritten and a file that could not be
//! written completely is removed again.
use std::{
    fs::{DirBuilder, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};
use tracing::{info, instrument, warn};

use crate::{
    ca::{CaSubject, CertificateAuthority, CreateCertificateAuthorityError},
    keys::rsa::{self, SigningKey},
};

/// File name of the encrypted CA key inside the depot.
pub const CA_KEY_FILE_NAME: &str = "ca.key";

/// File name of the CA certificate inside the depot.
pub const CA_CERTIFICATE_FILE_NAME: &str = "ca.pem";

#[cfg(unix)]
const DEPOT_DIRECTORY_MODE: u32 = 0o755;
#[cfg(unix)]
const CA_FILE_MODE: u32 = 0o400;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create depot directory {path:?}"))]
    CreateDepotDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("a CA key already exists at {path:?}"))]
    KeyAlreadyExists { path: PathBuf },

    #[snafu(display("a CA certificate already exists at {path:?}"))]
    CertAlreadyExists { path: PathBuf },

    #[snafu(display("failed to create {path:?}"))]
    CreateFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write {path:?}"))]
    WriteFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to create the CA key"))]
    CreateKey { source: rsa::Error },

    #[snafu(display("failed to encrypt the CA key"))]
    EncryptKey { source: rsa::Error },

    #[snafu(display("failed to create the CA certificate"))]
    CreateCertificateAuthority {
        source: CreateCertificateAuthorityError,
    },

    #[snafu(display("failed to encode the CA certificate as PEM"))]
    EncodeCertificate { source: x509_cert::der::Error },
}

impl Error {
    /// Returns `true` if the bootstrap failed because CA material is already
    /// present in the depot.
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            Self::KeyAlreadyExists { .. } | Self::CertAlreadyExists { .. }
        )
    }
}

/// Runs the complete bootstrap, first the key and then the certificate.
pub fn init(
    depot: &Path,
    key_size: usize,
    passphrase: &[u8],
    years: u32,
    subject: &CaSubject<'_>,
) -> Result<CertificateAuthority> {
    let key = create_key(key_size, passphrase, depot)?;
    create_certificate_authority(key, years, subject, depot)
}

/// Creates a new RSA key of `bits` modulus size and stores it, encrypted with
/// `passphrase`, as [`CA_KEY_FILE_NAME`] in the `depot` directory.
///
/// The depot directory is created if it doesn't exist yet. An empty
/// `passphrase` still produces an encrypted key.
#[instrument(skip(passphrase))]
pub fn create_key(bits: usize, passphrase: &[u8], depot: &Path) -> Result<SigningKey> {
    create_depot_directory(depot)?;

    let path = depot.join(CA_KEY_FILE_NAME);
    let file = ExclusiveFile::create(&path, |path| KeyAlreadyExistsSnafu { path }.build())?;

    let key = SigningKey::new(bits).context(CreateKeySnafu)?;
    let pem = key.to_encrypted_pem(passphrase).context(EncryptKeySnafu)?;
    file.persist_with(|file| file.write_all(pem.as_bytes()))?;

    info!(ca.key.path = %path.display(), ca.key.size = bits, "created CA key");
    Ok(key)
}

/// Creates a self-signed CA certificate for `key`, valid for `years` calendar
/// years, and stores it as [`CA_CERTIFICATE_FILE_NAME`] in the `depot`
/// directory.
#[instrument(skip(key))]
pub fn create_certificate_authority(
    key: SigningKey,
    years: u32,
    subject: &CaSubject<'_>,
    depot: &Path,
) -> Result<CertificateAuthority> {
    create_depot_directory(depot)?;

    let path = depot.join(CA_CERTIFICATE_FILE_NAME);
    let file = ExclusiveFile::create(&path, |path| CertAlreadyExistsSnafu { path }.build())?;

    let ca = CertificateAuthority::builder()
        .subject(subject.clone())
        .years(years)
        .signing_key_pair(key)
        .build()
        .context(CreateCertificateAuthoritySnafu)?;
    let pem = ca.to_certificate_pem().context(EncodeCertificateSnafu)?;
    file.persist_with(|file| file.write_all(pem.as_bytes()))?;

    info!(
        ca.certificate.path = %path.display(),
        ca.subject = %ca.subject_name(),
        "created CA certificate"
    );
    Ok(ca)
}

fn create_depot_directory(depot: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, DEPOT_DIRECTORY_MODE);

    builder
        .create(depot)
        .context(CreateDepotDirectorySnafu { path: depot })
}

/// A file that was created exclusively and is removed again when it is
/// dropped before [`ExclusiveFile::persist_with`] succeeded.
#[derive(Debug)]
struct ExclusiveFile {
    file: File,
    path: PathBuf,
    persisted: bool,
}

impl ExclusiveFile {
    /// Atomically creates `path`, failing with the error returned by
    /// `already_exists` if the file is present.
    fn create(path: &Path, already_exists: impl FnOnce(PathBuf) -> Error) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);

        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, CA_FILE_MODE);

        match options.open(path) {
            Ok(file) => Ok(Self {
                file,
                path: path.to_path_buf(),
                persisted: false,
            }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(already_exists(path.to_path_buf()))
            }
            Err(source) => Err(Error::CreateFile {
                source,
                path: path.to_path_buf(),
            }),
        }
    }

    fn persist_with(mut self, write: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
        write(&mut self.file)
            .and_then(|()| self.file.sync_all())
            .context(WriteFileSnafu { path: &self.path })?;

        self.persisted = true;
        Ok(())
    }
}

impl Drop for ExclusiveFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }

        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(
                error = &err as &dyn std::error::Error,
                path = %self.path.display(),
                "failed to remove partially written file"
            );
        }
    }
}
