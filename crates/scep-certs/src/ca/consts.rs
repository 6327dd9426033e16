use x509_cert::der::pem::LineEnding;

/// The default CA validity time span of ten years.
pub const DEFAULT_CA_VALIDITY_YEARS: u32 = 10;

/// The default organization (`O`) of the CA subject.
pub const DEFAULT_CA_ORGANIZATION: &str = "scep-ca";

/// The default organizational unit (`OU`) of the CA subject.
pub const DEFAULT_CA_ORGANIZATIONAL_UNIT: &str = "SCEP CA";

/// The default country (`C`) of the CA subject.
pub const DEFAULT_CA_COUNTRY: &str = "US";

/// The self-signed CA always uses serial number 1, issued certificates
/// start at 2.
pub const CA_SERIAL_NUMBER: u64 = 1;

/// The default validity of issued client certificates, in days.
pub const DEFAULT_CERTIFICATE_VALIDITY_DAYS: u32 = 365;

/// Issued certificates are backdated by this many seconds to tolerate clock
/// skew between the CA and its clients.
pub const CERTIFICATE_BACKDATE_SECONDS: u64 = 600;

/// The line ending used for all PEM encoded output.
pub const PEM_LINE_ENDING: LineEnding = LineEnding::LF;
