use clap::Parser;
use scep_server::cli::{Cli, Command};
use scep_telemetry::Tracing;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitializeTracing { source: scep_telemetry::Error },

    #[snafu(transparent)]
    Server { source: scep_server::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let _tracing_guard = Tracing::new("scepserver", cli.command.telemetry())
        .init()
        .context(InitializeTracingSnafu)?;

    let result = match cli.command {
        Command::Run(args) => scep_server::serve(args).await,
        Command::Ca(args) => scep_server::init_ca(&args),
    };

    if let Err(err) = &result {
        tracing::error!(error = err as &dyn std::error::Error, "scepserver failed");
    }

    Ok(result?)
}
