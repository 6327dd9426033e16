use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, Command},
};
use tracing::{debug, instrument};

use crate::signer::verifier::{
    CsrVerifier, InspectExecutableSnafu, NotExecutableSnafu, Result, SpawnSnafu, TerminatedSnafu,
    TimedOutSnafu, Verdict, WaitSnafu, WriteRequestSnafu,
};

/// Runs an executable for every request, the DER encoded CSR is written to
/// its stdin.
///
/// Exit status `0` accepts the request, any other exit status rejects it.
/// The process is killed if it doesn't exit within the timeout.
#[derive(Debug)]
pub struct ExecutableCsrVerifier {
    path: PathBuf,
    timeout: Duration,
}

impl ExecutableCsrVerifier {
    /// Fails unless `path` is a regular file with at least one executable bit
    /// set.
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let path = path.into();
        ensure!(is_executable(&path)?, NotExecutableSnafu { path });

        Ok(Self { path, timeout })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).context(InspectExecutableSnafu { path })?;
    Ok(metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> Result<bool> {
    let metadata = std::fs::metadata(path).context(InspectExecutableSnafu { path })?;
    Ok(metadata.is_file())
}

#[async_trait]
impl CsrVerifier for ExecutableCsrVerifier {
    #[instrument(skip_all, fields(verifier.path = %self.path.display()))]
    async fn verify(&self, csr_der: &[u8]) -> Result<Verdict> {
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu)?;

        let timeout = self.timeout;
        let status = tokio::time::timeout(timeout, run(&mut child, csr_der))
            .await
            .ok()
            .context(TimedOutSnafu { timeout })??;

        debug!(verifier.exit_status = %status, "CSR verifier finished");
        match status.code() {
            Some(0) => Ok(Verdict::Accepted),
            Some(_) => Ok(Verdict::Rejected),
            None => TerminatedSnafu.fail(),
        }
    }
}

/// Feeds the request to the verifier and waits for it to exit.
async fn run(child: &mut Child, csr_der: &[u8]) -> Result<ExitStatus> {
    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(csr_der).await {
            // The verifier may decide without reading the request
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
            result => result.context(WriteRequestSnafu)?,
        }
    }

    child.wait().await.context(WaitSnafu)
}
