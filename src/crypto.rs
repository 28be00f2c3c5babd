//! Crypto-provider selection and installation helpers.

use crate::error::{Error, Result};
use rustls::crypto::CryptoProvider;
use std::sync::Arc;
use std::sync::OnceLock;

/// Name under which the compiled-in provider can be requested.
#[cfg(feature = "ring")]
pub const BUILTIN_PROVIDER_NAME: &str = "ring";

/// Name under which the compiled-in provider can be requested.
#[cfg(feature = "aws-lc-rs")]
pub const BUILTIN_PROVIDER_NAME: &str = "aws-lc-rs";

/// Ensures a rustls crypto provider is installed as the process default.
///
/// This is idempotent and safe to call multiple times. Installation is best-effort:
/// if the provider is already installed (by the application or another crate),
/// this does nothing.
pub(crate) fn ensure_default_provider_installed() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Best-effort: ignore error if already installed by the application.
        let _ = builtin_provider().install_default();
    });
}

#[cfg(feature = "ring")]
pub(crate) fn builtin_provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(feature = "aws-lc-rs")]
pub(crate) fn builtin_provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

/// How the crypto provider backing validators, key loading and configs is chosen.
///
/// Selecting by name and selecting by instance are distinct code paths; a
/// builder holds exactly one selection at a time (last one set wins).
#[derive(Debug, Clone, Default)]
pub enum ProviderSelection {
    /// Use the process default provider, installing the compiled-in one if
    /// no default has been installed yet.
    #[default]
    Default,

    /// Look the provider up by name ([`BUILTIN_PROVIDER_NAME`]).
    Named(String),

    /// Use this provider instance directly.
    Instance(Arc<CryptoProvider>),
}

/// Resolves a [`ProviderSelection`] to a concrete provider.
///
/// # Errors
///
/// Returns [`Error::UnsupportedProvider`] when a named provider is not the
/// one compiled into this build.
pub(crate) fn select_provider(selection: &ProviderSelection) -> Result<Arc<CryptoProvider>> {
    match selection {
        ProviderSelection::Default => {
            ensure_default_provider_installed();
            match CryptoProvider::get_default() {
                Some(provider) => Ok(Arc::clone(provider)),
                None => Ok(Arc::new(builtin_provider())),
            }
        }
        ProviderSelection::Named(name) => {
            if name == BUILTIN_PROVIDER_NAME {
                Ok(Arc::new(builtin_provider()))
            } else {
                Err(Error::UnsupportedProvider(name.clone()))
            }
        }
        ProviderSelection::Instance(provider) => Ok(Arc::clone(provider)),
    }
}
