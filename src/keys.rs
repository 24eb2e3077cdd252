//! Signing keys used to bootstrap new instances and to log in to them.

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::config::read_to_string_ambient;

/// Keypair reference resolved for provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningKey {
    public_fingerprint: String,
    private_key_path: Option<Utf8PathBuf>,
}

impl SigningKey {
    /// Creates a key from its public fingerprint and optional private key
    /// file.
    #[must_use]
    pub fn new(public_fingerprint: impl Into<String>, private_key_path: Option<Utf8PathBuf>) -> Self {
        Self {
            public_fingerprint: public_fingerprint.into(),
            private_key_path,
        }
    }

    /// Public key text embedded in the bootstrap payload, without its final
    /// base64 pad character.
    #[must_use]
    pub fn public_fingerprint(&self) -> &str {
        &self.public_fingerprint
    }

    /// Private key file used as the SSH identity, when known.
    #[must_use]
    pub const fn private_key_path(&self) -> Option<&Utf8PathBuf> {
        self.private_key_path.as_ref()
    }
}

/// Resolves the signing key for the current cloud account.
pub trait KeyProvider: Send + Sync {
    /// Returns the key, or `None` when no usable key is configured.
    fn resolve_signing_key(&self) -> Option<SigningKey>;
}

/// Errors raised while loading a public key file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// The key file could not be read.
    #[error("failed to read public key `{path}`: {message}")]
    Read {
        /// Expanded path of the key file.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The file does not contain an OpenSSH public key line.
    #[error("public key `{path}` is not in OpenSSH format")]
    Malformed {
        /// Expanded path of the key file.
        path: String,
    },
    /// The key body has no trailing pad the bootstrap payload could restore.
    #[error("public key `{path}` has no base64 padding and cannot be embedded")]
    Unpadded {
        /// Expanded path of the key file.
        path: String,
    },
}

/// Reads the public key from disk on every resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileKeyProvider {
    public_key_file: String,
    private_key_file: Option<String>,
}

impl FileKeyProvider {
    /// Creates a provider. Paths support a leading `~/`.
    #[must_use]
    pub fn new(public_key_file: impl Into<String>, private_key_file: Option<String>) -> Self {
        Self {
            public_key_file: public_key_file.into(),
            private_key_file,
        }
    }

    /// Loads the key, reporting why it is unusable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the file cannot be read or parsed.
    pub fn load(&self) -> Result<SigningKey, KeyError> {
        let path = expand_tilde(&self.public_key_file);
        let content = read_to_string_ambient(&path).map_err(|message| KeyError::Read {
            path: path.clone(),
            message,
        })?;
        let fingerprint = fingerprint_from_public_key(&content).map_err(|err| match err {
            FingerprintError::Malformed => KeyError::Malformed { path: path.clone() },
            FingerprintError::Unpadded => KeyError::Unpadded { path: path.clone() },
        })?;
        let private_key_path = self
            .private_key_file
            .as_deref()
            .map(|file| Utf8PathBuf::from(expand_tilde(file)));
        Ok(SigningKey::new(fingerprint, private_key_path))
    }
}

impl KeyProvider for FileKeyProvider {
    fn resolve_signing_key(&self) -> Option<SigningKey> {
        match self.load() {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(error = %err, "signing key unavailable");
                None
            }
        }
    }
}

enum FingerprintError {
    Malformed,
    Unpadded,
}

/// Derives the fingerprint from an OpenSSH public key line
/// (`<type> <base64> [comment]`), dropping the comment and one pad character.
fn fingerprint_from_public_key(content: &str) -> Result<String, FingerprintError> {
    let mut fields = content.split_whitespace();
    let (Some(kind), Some(body)) = (fields.next(), fields.next()) else {
        return Err(FingerprintError::Malformed);
    };
    let trimmed = body.strip_suffix('=').ok_or(FingerprintError::Unpadded)?;
    Ok(format!("{kind} {trimmed}"))
}

pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn key_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write key");
        file
    }

    fn path_of(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().into_owned()
    }

    #[rstest]
    fn loads_fingerprint_without_pad_and_comment() {
        let file = key_file("ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAAB== ci@host\n");
        let provider = FileKeyProvider::new(path_of(&file), Some(String::from("/keys/id_rsa")));

        let key = provider.load().expect("key should load");
        assert_eq!(key.public_fingerprint(), "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAAB=");
        assert_eq!(
            key.private_key_path().map(|p| p.as_str()),
            Some("/keys/id_rsa")
        );
    }

    #[rstest]
    #[case("", "not in OpenSSH format")]
    #[case("ssh-ed25519", "not in OpenSSH format")]
    #[case("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5", "no base64 padding")]
    #[case("ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ ci@host", "no base64 padding")]
    fn rejects_unusable_keys(#[case] content: &str, #[case] fragment: &str) {
        let file = key_file(content);
        let err = FileKeyProvider::new(path_of(&file), None)
            .load()
            .expect_err("key should be rejected");
        assert!(err.to_string().contains(fragment), "unexpected error: {err}");
    }

    #[rstest]
    fn missing_file_resolves_to_none() {
        let provider = FileKeyProvider::new("/nonexistent/ycfleet/key.pub", None);
        assert!(matches!(provider.load(), Err(KeyError::Read { .. })));
        assert_eq!(provider.resolve_signing_key(), None);
    }
}
