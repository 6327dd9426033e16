//! A SCEP server which issues client certificates with a CA kept in a file
//! depot.
//!
//! The server is assembled from these parts:
//!
//! - [`secret`] resolves the CA passphrase and the challenge password.
//! - [`depot`] stores the CA and the issued certificates.
//! - [`signer`] contains the signer capability and its policy decorators,
//!   which are chained by the [`Pipeline`].
//! - [`Service`] exposes the chain as SCEP operations, [`ScepServer`] serves
//!   them over HTTP.
//!
//! The CA itself is created once with [`init_ca`], the server is started with
//! [`serve`].
use std::sync::Arc;

use scep_certs::bootstrap;
use snafu::{ResultExt, Snafu};
use tracing::{info, instrument};

use crate::{
    cli::{CaArguments, RunArguments},
    depot::{Depot, FileDepot},
    signer::{CsrVerifier, ExecutableCsrVerifier, verifier},
};

pub mod cli;
pub mod constants;
pub mod depot;
pub mod http;
pub mod options;
pub mod pipeline;
pub mod secret;
pub mod service;
pub mod signer;

// Selected re-exports
pub use crate::{
    http::ScepServer,
    options::ServerOptions,
    pipeline::Pipeline,
    service::Service,
};

/// A result type alias with the [`Error`] type as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to resolve a secret"))]
    ResolveSecret { source: secret::Error },

    #[snafu(display("failed to set up the CSR verifier"))]
    CreateCsrVerifier { source: verifier::Error },

    #[snafu(display("failed to build the signer pipeline"))]
    BuildPipeline { source: pipeline::Error },

    #[snafu(display("failed to create the SCEP service"))]
    CreateService { source: service::Error },

    #[snafu(display("failed to run the SCEP server"))]
    RunServer { source: http::Error },

    #[snafu(display("failed to initialize the CA"))]
    InitializeCa { source: bootstrap::Error },
}

/// Creates the CA key and certificate in the depot if `--init` is given.
#[instrument(skip_all, fields(depot.path = %args.depot.display()))]
pub fn init_ca(args: &CaArguments) -> Result<()> {
    if !args.init {
        info!("nothing to do, pass --init to create a CA");
        return Ok(());
    }

    let key_password = args.key_password().context(ResolveSecretSnafu)?;
    let ca = bootstrap::init(
        &args.depot,
        args.key_size,
        key_password.as_bytes(),
        args.years,
        &args.subject(),
    )
    .context(InitializeCaSnafu)?;

    info!(ca.subject = %ca.subject_name(), "initialized CA");
    Ok(())
}

/// Assembles the signer pipeline from `args` and serves SCEP requests until
/// the process is terminated.
///
/// All secrets are resolved before anything else is set up, a missing or
/// undecryptable CA fails the startup.
#[instrument(skip_all, fields(depot.path = %args.depot.display()))]
pub async fn serve(args: RunArguments) -> Result<()> {
    let ca_passphrase = args.ca_passphrase().context(ResolveSecretSnafu)?;
    let challenge = args.challenge().context(ResolveSecretSnafu)?;

    let verifier = args
        .csr_verifier_exec()
        .map(|path| ExecutableCsrVerifier::new(path, *args.csr_verifier_timeout))
        .transpose()
        .context(CreateCsrVerifierSnafu)?
        .map(|verifier| Arc::new(verifier) as Arc<dyn CsrVerifier>);

    let depot: Arc<dyn Depot> = Arc::new(FileDepot::new(&args.depot));
    let pipeline = Pipeline::builder()
        .depot(depot)
        .allow_renewal_days(args.allow_renewal_days)
        .validity_days(args.certificate_validity_days)
        .ca_passphrase(ca_passphrase)
        .challenge(challenge)
        .maybe_verifier(verifier)
        .build()
        .await
        .context(BuildPipelineSnafu)?;

    let (signer, ca) = pipeline.into_parts();
    let service = Service::new(ca, signer).context(CreateServiceSnafu)?;

    ScepServer::new(service, args.server_options())
        .run()
        .await
        .context(RunServerSnafu)
}
