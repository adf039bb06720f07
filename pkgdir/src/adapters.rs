// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Default wiring for the boundary traits in `pkgdir_core::ports`. Kept
//! narrow and swappable, the same way `boulder`/`moss` keep
//! `container::Container` and `config::Manager` as independent collaborators
//! rather than folding their concerns into the core logic.

use std::{future::Future, path::PathBuf, pin::Pin, sync::Arc};

use pkgdir_core::ports::{ForgeAdapter, NullWatchdog, SignatureVerifier, Watchdog};
use tracing::warn;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Posts the systemd watchdog-ping datagram (`WATCHDOG=1`) to `$NOTIFY_SOCKET`.
/// Only constructed when that variable is set; see [`watchdog_from_env`].
pub struct SystemdWatchdog {
    socket_path: PathBuf,
}

impl Watchdog for SystemdWatchdog {
    fn ping(&self) {
        let Ok(socket) = std::os::unix::net::UnixDatagram::unbound() else {
            return;
        };
        if let Err(source) = socket.send_to(b"WATCHDOG=1", &self.socket_path) {
            warn!(%source, "failed to ping service-manager watchdog");
        }
    }
}

/// Returns a live [`SystemdWatchdog`] when `NOTIFY_SOCKET` is set in the
/// environment, a [`NullWatchdog`] otherwise.
pub fn watchdog_from_env() -> Arc<dyn Watchdog> {
    match std::env::var_os("NOTIFY_SOCKET") {
        Some(path) => Arc::new(SystemdWatchdog { socket_path: path.into() }),
        None => Arc::new(NullWatchdog),
    }
}

/// Constant-time shared-secret comparison: the external caller of
/// `/update_package` must present `settings.update_shared_secret` verbatim as
/// the signature. A deployment that needs asymmetric signatures swaps this
/// for another `SignatureVerifier` impl without touching `pkgdir-core`.
pub struct SharedSecretVerifier {
    secret: Option<String>,
}

impl SharedSecretVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

impl SignatureVerifier for SharedSecretVerifier {
    fn verify(&self, _payload: &[u8], signature: &str) -> bool {
        let Some(secret) = self.secret.as_ref() else {
            return false;
        };

        let expected = secret.as_bytes();
        let actual = signature.as_bytes();
        if expected.len() != actual.len() {
            return false;
        }

        expected.iter().zip(actual).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

/// No upstream-forge credentials configured: every enrichment call comes
/// back empty. A deployment with GitHub credentials swaps this for a real
/// adapter behind the same trait.
pub struct NullForgeAdapter;

impl ForgeAdapter for NullForgeAdapter {
    fn fetch_readme<'a>(&'a self, _owner: &'a str, _repo: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async { None })
    }

    fn fetch_tags<'a>(&'a self, _owner: &'a str, _repo: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async { Vec::new() })
    }

    fn fetch_trending<'a>(&'a self) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async { Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_verifier_rejects_wrong_length() {
        let verifier = SharedSecretVerifier::new(Some("s3cr3t".to_owned()));
        assert!(!verifier.verify(b"", "short"));
        assert!(verifier.verify(b"", "s3cr3t"));
    }

    #[test]
    fn shared_secret_verifier_rejects_everything_with_no_secret_configured() {
        let verifier = SharedSecretVerifier::new(None);
        assert!(!verifier.verify(b"", ""));
    }
}
