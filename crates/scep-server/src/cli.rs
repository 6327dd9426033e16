//! Command line interface of the `scepserver` binary.
//!
//! Every option can also be set through the environment variable listed in
//! its help text. Empty values count as not supplied.
//!
//! ```
//! use clap::Parser;
//! use scep_server::cli::{Cli, Command};
//!
//! let cli = Cli::parse_from(["scepserver", "ca", "--init", "--depot", "/var/lib/scep"]);
//! assert!(matches!(cli.command, Command::Ca(args) if args.init));
//! ```
use std::{net::IpAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use scep_certs::{
    ca::{
        CaSubject, DEFAULT_CA_COUNTRY, DEFAULT_CA_ORGANIZATION, DEFAULT_CA_ORGANIZATIONAL_UNIT,
        DEFAULT_CA_VALIDITY_YEARS,
    },
    keys::rsa::DEFAULT_KEY_SIZE,
};
use scep_telemetry::TelemetryOptions;

use crate::{
    constants::{
        DEFAULT_ALLOW_RENEWAL_DAYS, DEFAULT_CERTIFICATE_VALIDITY_DAYS, DEFAULT_CSR_VERIFIER_TIMEOUT,
        DEFAULT_DEPOT_PATH, DEFAULT_HTTP_PORT, DEFAULT_LISTEN_ADDRESS,
    },
    options::ServerOptions,
    secret::{self, Secret},
};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "scepserver", version, about = "SCEP server backed by a file depot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the SCEP server.
    Run(RunArguments),

    /// Manage the CA in the depot.
    Ca(CaArguments),
}

impl Command {
    pub fn telemetry(&self) -> TelemetryOptions {
        match self {
            Self::Run(args) => args.telemetry,
            Self::Ca(args) => args.telemetry,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Port to listen on
    #[arg(long, env = "SCEP_HTTP_LISTEN_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub port: u16,

    /// IP address to listen on
    #[arg(long, env = "SCEP_HTTP_LISTEN_ADDRESS", default_value_t = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: IpAddr,

    /// Path to the CA and certificate depot
    #[arg(long, env = "SCEP_FILE_DEPOT", default_value = DEFAULT_DEPOT_PATH)]
    pub depot: PathBuf,

    /// Passphrase of the CA key
    #[arg(long = "capass", env = "SCEP_CA_PASS", hide_env_values = true)]
    pub ca_passphrase: Option<String>,

    /// File containing the passphrase of the CA key
    #[arg(long = "capass-file", env = "SCEP_CA_PASS_FILE", value_name = "FILE")]
    pub ca_passphrase_file: Option<PathBuf>,

    /// Validity of issued client certificates in days
    #[arg(long = "crtvalid", env = "SCEP_CERT_VALID", default_value_t = DEFAULT_CERTIFICATE_VALIDITY_DAYS)]
    pub certificate_validity_days: u32,

    /// Number of days before expiry from which on certificates can be renewed,
    /// 0 always allows renewal
    #[arg(long = "allowrenew", env = "SCEP_CERT_RENEW", default_value_t = DEFAULT_ALLOW_RENEWAL_DAYS)]
    pub allow_renewal_days: u32,

    /// Challenge password clients have to present
    #[arg(long = "challenge", env = "SCEP_CHALLENGE_PASSWORD", hide_env_values = true)]
    pub challenge: Option<String>,

    /// File containing the challenge password clients have to present
    #[arg(long = "challenge-file", env = "SCEP_CHALLENGE_PASSWORD_FILE", value_name = "FILE")]
    pub challenge_file: Option<PathBuf>,

    /// Executable deciding whether a CSR is signed, it receives the DER
    /// encoded CSR on stdin and accepts it with exit status 0
    #[arg(long = "csrverifierexec", env = "SCEP_CSR_VERIFIER_EXEC", value_name = "FILE")]
    pub csr_verifier_exec: Option<PathBuf>,

    /// Time after which a running CSR verifier is killed
    #[arg(
        long = "csrverifier-timeout",
        env = "SCEP_CSR_VERIFIER_TIMEOUT",
        default_value_t = DEFAULT_CSR_VERIFIER_TIMEOUT.into(),
    )]
    pub csr_verifier_timeout: humantime::Duration,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

impl RunArguments {
    pub fn ca_passphrase(&self) -> secret::Result<Secret> {
        secret::resolve(
            "CA passphrase",
            self.ca_passphrase.as_deref(),
            self.ca_passphrase_file.as_deref(),
        )
    }

    pub fn challenge(&self) -> secret::Result<Secret> {
        secret::resolve(
            "challenge password",
            self.challenge.as_deref(),
            self.challenge_file.as_deref(),
        )
    }

    /// Returns the configured CSR verifier, treating an empty path as unset.
    pub fn csr_verifier_exec(&self) -> Option<&PathBuf> {
        self.csr_verifier_exec
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::builder()
            .bind_address(self.listen_address, self.port)
            .build()
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct CaArguments {
    /// Create a new CA in the depot. Without this flag nothing happens
    #[arg(long)]
    pub init: bool,

    /// Path to the CA and certificate depot
    #[arg(long, env = "SCEP_FILE_DEPOT", default_value = DEFAULT_DEPOT_PATH)]
    pub depot: PathBuf,

    /// Validity of the CA certificate in years
    #[arg(long, default_value_t = DEFAULT_CA_VALIDITY_YEARS)]
    pub years: u32,

    /// Size of the CA key in bits
    #[arg(long, default_value_t = DEFAULT_KEY_SIZE)]
    pub key_size: usize,

    /// Organization of the CA subject
    #[arg(long, default_value = DEFAULT_CA_ORGANIZATION)]
    pub organization: String,

    /// Organizational unit of the CA subject
    #[arg(long, default_value = DEFAULT_CA_ORGANIZATIONAL_UNIT)]
    pub organizational_unit: String,

    /// Country of the CA subject
    #[arg(long, default_value = DEFAULT_CA_COUNTRY)]
    pub country: String,

    /// Common name of the CA subject, left out if not set
    #[arg(long)]
    pub common_name: Option<String>,

    /// Passphrase the CA key is encrypted with
    #[arg(long, hide_env_values = true)]
    pub key_password: Option<String>,

    /// File containing the passphrase the CA key is encrypted with
    #[arg(long, value_name = "FILE")]
    pub key_password_file: Option<PathBuf>,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

impl CaArguments {
    pub fn key_password(&self) -> secret::Result<Secret> {
        secret::resolve(
            "CA key password",
            self.key_password.as_deref(),
            self.key_password_file.as_deref(),
        )
    }

    pub fn subject(&self) -> CaSubject<'_> {
        CaSubject {
            organization: &self.organization,
            organizational_unit: &self.organizational_unit,
            country: &self.country,
            common_name: self.common_name.as_deref().filter(|cn| !cn.is_empty()),
        }
    }
}
