//! Resolves sensitive values, like the CA passphrase or the challenge
//! password, which can be configured either inline or through a file.
use std::{
    fmt,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the {name} can either be set inline or from a file, not both"))]
    ConflictingSecretSources { name: &'static str },

    #[snafu(display("failed to read the {name} from {path:?}"))]
    ReadSecretFile {
        source: std::io::Error,
        name: &'static str,
        path: PathBuf,
    },
}

/// A secret value. It is wiped from memory on drop and never printed.
///
/// An empty secret means "not configured": no challenge is enforced, or the
/// CA key is encrypted with an empty passphrase.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

/// Returns the effective value of the secret called `name`, which is either
/// set `inline` or read from `file`. Empty values count as unset.
///
/// Every `\n` is removed from file contents, other whitespace is kept.
/// Setting both sources is an error, in which case the file is not read.
#[instrument(skip(inline))]
pub fn resolve(name: &'static str, inline: Option<&str>, file: Option<&Path>) -> Result<Secret> {
    let inline = inline.filter(|value| !value.is_empty());
    let file = file.filter(|path| !path.as_os_str().is_empty());

    match (inline, file) {
        (Some(_), Some(_)) => ConflictingSecretSourcesSnafu { name }.fail(),
        (Some(value), None) => Ok(Secret::new(value)),
        (None, Some(path)) => {
            let contents = Zeroizing::new(
                std::fs::read_to_string(path).context(ReadSecretFileSnafu { name, path })?,
            );
            debug!(secret.name = name, secret.path = %path.display(), "read secret from file");

            Ok(Secret::new(
                contents
                    .chars()
                    .filter(|&c| c != '\n')
                    .collect::<String>(),
            ))
        }
        (None, None) => Ok(Secret::default()),
    }
}
