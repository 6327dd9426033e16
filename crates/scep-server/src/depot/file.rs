use std::{
    fmt,
    path::{Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use scep_certs::{
    bootstrap::{CA_CERTIFICATE_FILE_NAME, CA_KEY_FILE_NAME},
    ca::PEM_LINE_ENDING,
    keys::rsa::SigningKey,
};
use snafu::{OptionExt, ResultExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    der::{DateTime, EncodePem},
    name::Name,
};
use zeroize::Zeroizing;

use crate::depot::{
    Depot, EncodeCertificateSnafu, InvalidSerialSnafu, LoadCaKeySnafu, NoCertificateSnafu,
    ParseCaCertificatesSnafu, ParseCertificateSnafu, ReadFileSnafu, Result, SerialsExhaustedSnafu,
    WriteFileSnafu,
};

const SERIAL_FILE_NAME: &str = "serial";
const INDEX_FILE_NAME: &str = "index.txt";

/// Serial `1` belongs to the CA certificate.
const FIRST_SERIAL: u64 = 2;

/// A [`Depot`] backed by a directory, laid out like this:
///
/// ```text
/// depot/
/// ├── ca.key                 encrypted CA key
/// ├── ca.pem                 CA certificate chain
/// ├── serial                 next serial number (hex)
/// ├── index.txt              one line per issued certificate
/// └── <name>.<serial>.pem    issued certificates
/// ```
///
/// The index uses the tab separated columns of an OpenSSL CA database:
/// status (`V`alid or `R`evoked), expiry, revocation date, serial, file name
/// and subject. Storing a certificate revokes the still valid certificates
/// of the same subject.
#[derive(Debug)]
pub struct FileDepot {
    path: PathBuf,

    /// Serializes serial allocation and index updates.
    lock: Mutex<()>,
}

impl FileDepot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self, file_name: &str) -> Result<Vec<u8>> {
        let path = self.path.join(file_name);
        tokio::fs::read(&path).await.context(ReadFileSnafu { path })
    }

    /// Returns [`None`] if the file doesn't exist.
    async fn read_optional(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path.join(file_name);
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(ReadFileSnafu { path }),
        }
    }

    /// Replaces the file through a temporary file and a rename, readers never
    /// see a partially written file.
    async fn replace(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        let path = self.path.join(file_name);
        let tmp_path = self.path.join(format!(".{file_name}.tmp"));

        tokio::fs::write(&tmp_path, contents)
            .await
            .context(WriteFileSnafu { path: &tmp_path })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context(WriteFileSnafu { path })
    }

    async fn read_index(&self) -> Result<Vec<IndexEntry>> {
        let contents = self.read_optional(INDEX_FILE_NAME).await?;
        let contents = contents.unwrap_or_default();

        Ok(String::from_utf8_lossy(&contents)
            .lines()
            .filter_map(IndexEntry::parse)
            .collect())
    }

    async fn load_certificate(&self, file_name: &str) -> Result<Certificate> {
        let pem = self.read(file_name).await?;
        let path = self.path.join(file_name);
        let chain = load_pem_chain(&pem).context(ParseCertificateSnafu { path: path.clone() })?;

        chain
            .into_iter()
            .next()
            .context(NoCertificateSnafu { path })
    }
}

#[async_trait]
impl Depot for FileDepot {
    #[instrument(skip_all, fields(depot.path = %self.path.display()))]
    async fn ca(&self, passphrase: &[u8]) -> Result<(Vec<Certificate>, SigningKey)> {
        let pem = self.read(CA_CERTIFICATE_FILE_NAME).await?;
        let certificates = load_pem_chain(&pem).context(ParseCaCertificatesSnafu {
            path: self.path.join(CA_CERTIFICATE_FILE_NAME),
        })?;

        let key_pem = Zeroizing::new(self.read(CA_KEY_FILE_NAME).await?);
        let signing_key = SigningKey::from_pem(&key_pem, passphrase).context(LoadCaKeySnafu {
            path: self.path.join(CA_KEY_FILE_NAME),
        })?;

        debug!(
            ca.certificates = certificates.len(),
            ca.key.size = signing_key.key_size(),
            "loaded CA from depot"
        );
        Ok((certificates, signing_key))
    }

    #[instrument(skip_all, fields(depot.path = %self.path.display()))]
    async fn serial(&self) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let serial = match self.read_optional(SERIAL_FILE_NAME).await? {
            Some(contents) => {
                let serial = String::from_utf8_lossy(&contents).trim().to_owned();
                u64::from_str_radix(&serial, 16).context(InvalidSerialSnafu {
                    path: self.path.join(SERIAL_FILE_NAME),
                    serial,
                })?
            }
            None => FIRST_SERIAL,
        };

        let next = serial.checked_add(1).context(SerialsExhaustedSnafu)?;
        self.replace(SERIAL_FILE_NAME, format!("{next:X}\n").as_bytes())
            .await?;

        debug!(certificate.serial = serial, "allocated serial number");
        Ok(serial)
    }

    #[instrument(skip_all, fields(depot.path = %self.path.display(), certificate.name = name))]
    async fn put(&self, name: &str, certificate: &Certificate) -> Result<()> {
        let tbs = &certificate.tbs_certificate;
        let serial = hex::encode_upper(tbs.serial_number.as_bytes());
        let subject = tbs.subject.to_string();
        let file_name = format!("{name}.{serial}.pem");

        let pem = certificate
            .to_pem(PEM_LINE_ENDING)
            .context(EncodeCertificateSnafu)?;

        let _guard = self.lock.lock().await;

        let path = self.path.join(&file_name);
        tokio::fs::write(&path, pem.as_bytes())
            .await
            .context(WriteFileSnafu { path })?;

        let revoked_at = index_time(SystemTime::now());
        let mut index = self.read_index().await?;
        for entry in index
            .iter_mut()
            .filter(|entry| entry.status == Status::Valid && entry.subject == subject)
        {
            debug!(certificate.serial = %entry.serial, "revoking superseded certificate");
            entry.status = Status::Revoked;
            entry.revoked_at.clone_from(&revoked_at);
        }
        index.push(IndexEntry {
            status: Status::Valid,
            expires_at: index_time(tbs.validity.not_after.to_system_time()),
            revoked_at: String::new(),
            serial,
            file_name,
            subject,
        });

        let contents: String = index.iter().map(|entry| format!("{entry}\n")).collect();
        self.replace(INDEX_FILE_NAME, contents.as_bytes()).await
    }

    #[instrument(skip_all, fields(depot.path = %self.path.display(), certificate.subject = %subject))]
    async fn find_valid(&self, subject: &Name) -> Result<Option<Certificate>> {
        let subject = subject.to_string();
        let now = SystemTime::now();

        let _guard = self.lock.lock().await;

        let mut newest: Option<Certificate> = None;
        for entry in self.read_index().await? {
            if entry.status != Status::Valid || entry.subject != subject {
                continue;
            }

            let certificate = self.load_certificate(&entry.file_name).await?;
            let not_after = certificate
                .tbs_certificate
                .validity
                .not_after
                .to_system_time();
            if not_after <= now {
                continue;
            }

            let is_newer = newest.as_ref().is_none_or(|current| {
                current.tbs_certificate.validity.not_after.to_system_time() < not_after
            });
            if is_newer {
                newest = Some(certificate);
            }
        }

        Ok(newest)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Valid,
    Revoked,
}

#[derive(Debug, PartialEq, Eq)]
struct IndexEntry {
    status: Status,
    expires_at: String,
    revoked_at: String,
    serial: String,
    file_name: String,
    subject: String,
}

impl IndexEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut columns = line.splitn(6, '\t');
        let status = match columns.next()? {
            "V" => Status::Valid,
            "R" => Status::Revoked,
            _ => return None,
        };

        Some(Self {
            status,
            expires_at: columns.next()?.to_owned(),
            revoked_at: columns.next()?.to_owned(),
            serial: columns.next()?.to_owned(),
            file_name: columns.next()?.to_owned(),
            subject: columns.next()?.to_owned(),
        })
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            Status::Valid => "V",
            Status::Revoked => "R",
        };

        write!(
            f,
            "{status}\t{}\t{}\t{}\t{}\t{}",
            self.expires_at, self.revoked_at, self.serial, self.file_name, self.subject
        )
    }
}

/// Parses all `CERTIFICATE` blocks in `pem`. Blank input contains no
/// certificates.
fn load_pem_chain(pem: &[u8]) -> Result<Vec<Certificate>, x509_cert::der::Error> {
    if pem.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    Certificate::load_pem_chain(pem)
}

/// Formats `time` as `YYMMDDHHMMSSZ`. Times outside of the range X.509 can
/// express are left empty.
fn index_time(time: SystemTime) -> String {
    DateTime::from_system_time(time)
        .map(|dt| {
            format!(
                "{:02}{:02}{:02}{:02}{:02}{:02}Z",
                dt.year() % 100,
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minutes(),
                dt.seconds()
            )
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scep_certs::{
        CertificateAuthority, CertificateBuilder, CertificateSigningRequest, bootstrap,
        ca::CaSubject,
    };
    use tempfile::TempDir;

    use super::*;

    fn test_ca() -> CertificateAuthority {
        CertificateAuthority::builder()
            .key_size(1024)
            .build()
            .unwrap()
    }

    fn issue(ca: &CertificateAuthority, common_name: &str, serial: u64, days: u32) -> Certificate {
        let key = SigningKey::new(1024).unwrap();
        let subject: Name = format!("CN={common_name}").parse().unwrap();
        let csr = CertificateSigningRequest::builder()
            .subject(subject)
            .signing_key(&key)
            .build()
            .unwrap();

        CertificateBuilder::builder()
            .csr(&csr)
            .serial_number(serial)
            .validity_days(days)
            .signed_by(ca)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn loads_bootstrapped_ca() {
        let dir = TempDir::new().unwrap();
        bootstrap::init(dir.path(), 1024, b"secret", 1, &CaSubject::default()).unwrap();

        let depot = FileDepot::new(dir.path());
        let (certificates, key) = depot.ca(b"secret").await.unwrap();

        assert_eq!(certificates.len(), 1);
        assert_eq!(key.key_size(), 1024);
    }

    #[tokio::test]
    async fn wrong_passphrase_is_refused() {
        let dir = TempDir::new().unwrap();
        bootstrap::init(dir.path(), 1024, b"secret", 1, &CaSubject::default()).unwrap();

        let err = FileDepot::new(dir.path())
            .ca(b"wrong")
            .await
            .expect_err("a wrong passphrase must not load the key");
        assert!(matches!(err, crate::depot::Error::LoadCaKey { .. }));
    }

    #[tokio::test]
    async fn missing_ca_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = FileDepot::new(dir.path())
            .ca(b"")
            .await
            .expect_err("an empty depot has no CA");
        assert!(matches!(err, crate::depot::Error::ReadFile { .. }));
    }

    #[tokio::test]
    async fn serials_increase_from_two() {
        let dir = TempDir::new().unwrap();
        let depot = FileDepot::new(dir.path());

        assert_eq!(depot.serial().await.unwrap(), 2);
        assert_eq!(depot.serial().await.unwrap(), 3);
        assert_eq!(depot.serial().await.unwrap(), 4);

        let persisted = std::fs::read_to_string(dir.path().join(SERIAL_FILE_NAME)).unwrap();
        assert_eq!(persisted, "5\n");
        assert_eq!(FileDepot::new(dir.path()).serial().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn corrupt_serial_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SERIAL_FILE_NAME), "not hex").unwrap();

        let err = FileDepot::new(dir.path())
            .serial()
            .await
            .expect_err("garbage must not be used as serial");
        assert!(matches!(err, crate::depot::Error::InvalidSerial { .. }));
    }

    #[tokio::test]
    async fn put_then_find_valid() {
        let dir = TempDir::new().unwrap();
        let depot = FileDepot::new(dir.path());
        let ca = test_ca();

        let certificate = issue(&ca, "client", 2, 30);
        depot.put("client", &certificate).await.unwrap();

        assert!(dir.path().join("client.02.pem").is_file());

        let found = depot
            .find_valid(&certificate.tbs_certificate.subject)
            .await
            .unwrap()
            .expect("the stored certificate is valid");
        assert_eq!(found, certificate);

        let other: Name = "CN=other".parse().unwrap();
        assert!(depot.find_valid(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_certificate_revokes_older_one() {
        let dir = TempDir::new().unwrap();
        let depot = FileDepot::new(dir.path());
        let ca = test_ca();

        let first = issue(&ca, "client", 2, 10);
        let second = issue(&ca, "client", 3, 20);
        depot.put("client", &first).await.unwrap();
        depot.put("client", &second).await.unwrap();

        let index = depot.read_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].status, Status::Revoked);
        assert!(!index[0].revoked_at.is_empty());
        assert_eq!(index[1].status, Status::Valid);

        let found = depot
            .find_valid(&second.tbs_certificate.subject)
            .await
            .unwrap();
        assert_eq!(found, Some(second));
    }

    #[test]
    fn index_entry_round_trip() {
        let line = "V\t301231235959Z\t\t0A\tclient.0A.pem\tCN=client,O=Test";
        let entry = IndexEntry::parse(line).expect("valid index line");

        assert_eq!(entry.status, Status::Valid);
        assert_eq!(entry.subject, "CN=client,O=Test");
        assert_eq!(entry.to_string(), line);

        assert!(IndexEntry::parse("X\tgarbage").is_none());
        assert!(IndexEntry::parse("V\ttoo\tshort").is_none());
    }

    #[test]
    fn formats_index_time() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(index_time(time), "231114221320Z");
    }
}
