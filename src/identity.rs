//! Identity providers and their composite.
//!
//! An [`IdentityProvider`] answers alias-oriented questions about the private
//! keys and certificate chains it holds. The [`CompositeIdentityProvider`]
//! merges N providers into one, which matters for the same reason as on the
//! trust side: a TLS config takes a single certificate resolver.
//!
//! Selection follows first-non-empty-wins: `choose_*`, `private_key` and
//! `certificate_chain` return the first provider's `Some` answer in addition
//! order. The enumeration operations (`client_aliases`, `server_aliases`)
//! concatenate every provider's answer instead, and return `None` only when
//! the concatenation is empty, so callers keep the usual none-means-nothing
//! contract.

use crate::crypto;
use crate::error::{Error, Result};
use crate::prelude::{debug, warn};
use crate::store::CredentialStore;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;
use std::fmt;
use std::sync::Arc;
use x509_parser::oid_registry::{
    OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION, OID_SIG_ED25519,
};
use x509_parser::prelude::*;

/// The default (and only) identity-provider algorithm name.
pub const DEFAULT_IDENTITY_ALGORITHM: &str = "default";

/// A capability object answering alias-oriented identity questions.
///
/// Every operation is read-only; implementations must be safe for
/// unsynchronized concurrent use.
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Picks an alias usable for client authentication, constrained by the
    /// peer's signature schemes and issuer hints.
    fn choose_client_alias(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<String>;

    /// Picks an alias usable for server authentication.
    fn choose_server_alias(&self, schemes: &[SignatureScheme]) -> Option<String>;

    /// The private key stored under this alias.
    fn private_key(&self, alias: &str) -> Option<PrivateKeyDer<'static>>;

    /// The certificate chain stored under this alias, leaf first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>>;

    /// Every alias usable for client authentication, or `None` when there is
    /// none.
    fn client_aliases(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<Vec<String>>;

    /// Every alias usable for server authentication, or `None` when there is
    /// none.
    fn server_aliases(&self, schemes: &[SignatureScheme]) -> Option<Vec<String>>;
}

/// Key family of a certificate or signature scheme, used to rule out aliases
/// whose key can never produce a signature the peer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl KeyFamily {
    fn of_scheme(scheme: SignatureScheme) -> Option<Self> {
        match scheme {
            SignatureScheme::RSA_PKCS1_SHA1
            | SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::RSA_PKCS1_SHA384
            | SignatureScheme::RSA_PKCS1_SHA512
            | SignatureScheme::RSA_PSS_SHA256
            | SignatureScheme::RSA_PSS_SHA384
            | SignatureScheme::RSA_PSS_SHA512 => Some(Self::Rsa),
            SignatureScheme::ECDSA_SHA1_Legacy
            | SignatureScheme::ECDSA_NISTP256_SHA256
            | SignatureScheme::ECDSA_NISTP384_SHA384
            | SignatureScheme::ECDSA_NISTP521_SHA512 => Some(Self::Ecdsa),
            SignatureScheme::ED25519 => Some(Self::Ed25519),
            _ => None,
        }
    }

    fn of_certificate(certificate: &CertificateDer<'_>) -> Option<Self> {
        let (_, parsed) = X509Certificate::from_der(certificate.as_ref()).ok()?;
        let oid = &parsed.public_key().algorithm.algorithm;
        if *oid == OID_PKCS1_RSAENCRYPTION {
            Some(Self::Rsa)
        } else if *oid == OID_KEY_TYPE_EC_PUBLIC_KEY {
            Some(Self::Ecdsa)
        } else if *oid == OID_SIG_ED25519 {
            Some(Self::Ed25519)
        } else {
            None
        }
    }
}

struct IdentityEntry {
    alias: String,
    key: PrivateKeyDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    family: Option<KeyFamily>,
    issuer_names: Vec<Vec<u8>>,
}

impl fmt::Debug for IdentityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityEntry")
            .field("alias", &self.alias)
            .field("chain", &self.chain.len())
            .field("family", &self.family)
            .finish()
    }
}

/// An identity provider backed by the identity entries of a credential store.
#[derive(Debug)]
pub struct StoreIdentityProvider {
    entries: Vec<IdentityEntry>,
}

impl StoreIdentityProvider {
    /// Snapshots the identity entries of a credential store.
    ///
    /// A store without identity entries yields a provider that answers `None`
    /// to everything.
    pub fn from_store(store: &CredentialStore) -> Self {
        let entries = store
            .identities()
            .map(|(alias, key, chain)| {
                let family = chain.first().and_then(KeyFamily::of_certificate);
                // DER issuer names of every chain certificate, matched
                // against the peer's certificate_authorities hints.
                let issuer_names = chain
                    .iter()
                    .filter_map(|certificate| {
                        X509Certificate::from_der(certificate.as_ref())
                            .ok()
                            .map(|(_, parsed)| parsed.issuer().as_raw().to_vec())
                    })
                    .collect();
                IdentityEntry {
                    alias: alias.to_string(),
                    key: key.clone_key(),
                    chain: chain.to_vec(),
                    family,
                    issuer_names,
                }
            })
            .collect();
        Self { entries }
    }

    fn entry(&self, alias: &str) -> Option<&IdentityEntry> {
        self.entries.iter().find(|entry| entry.alias == alias)
    }

    fn matches(&self, entry: &IdentityEntry, schemes: &[SignatureScheme]) -> bool {
        if schemes.is_empty() {
            return true;
        }
        match entry.family {
            Some(family) => schemes
                .iter()
                .any(|scheme| KeyFamily::of_scheme(*scheme) == Some(family)),
            // Unknown key family: do not rule the entry out.
            None => true,
        }
    }

    fn matches_issuers(&self, entry: &IdentityEntry, issuer_hints: &[&[u8]]) -> bool {
        if issuer_hints.is_empty() {
            return true;
        }
        entry
            .issuer_names
            .iter()
            .any(|issuer| issuer_hints.iter().any(|hint| *hint == issuer.as_slice()))
    }
}

impl IdentityProvider for StoreIdentityProvider {
    fn choose_client_alias(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| self.matches(entry, schemes) && self.matches_issuers(entry, issuer_hints))
            .map(|entry| entry.alias.clone())
    }

    fn choose_server_alias(&self, schemes: &[SignatureScheme]) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| self.matches(entry, schemes))
            .map(|entry| entry.alias.clone())
    }

    fn private_key(&self, alias: &str) -> Option<PrivateKeyDer<'static>> {
        self.entry(alias).map(|entry| entry.key.clone_key())
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.entry(alias).map(|entry| entry.chain.clone())
    }

    fn client_aliases(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<Vec<String>> {
        let aliases: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                self.matches(entry, schemes) && self.matches_issuers(entry, issuer_hints)
            })
            .map(|entry| entry.alias.clone())
            .collect();
        if aliases.is_empty() {
            None
        } else {
            Some(aliases)
        }
    }

    fn server_aliases(&self, schemes: &[SignatureScheme]) -> Option<Vec<String>> {
        let aliases: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| self.matches(entry, schemes))
            .map(|entry| entry.alias.clone())
            .collect();
        if aliases.is_empty() {
            None
        } else {
            Some(aliases)
        }
    }
}

enum IdentitySource {
    Provider(Arc<dyn IdentityProvider>),
    Store(StoreIdentityProvider),
    StoreWithAlgorithm(StoreIdentityProvider, String),
}

/// Accumulates identity sources and finalizes them into a
/// [`CompositeIdentityProvider`]. Addition order is preserved.
#[derive(Default)]
pub struct CompositeIdentityProviderBuilder {
    sources: Vec<IdentitySource>,
}

impl fmt::Debug for CompositeIdentityProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeIdentityProviderBuilder")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl CompositeIdentityProviderBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-built provider.
    #[must_use]
    pub fn with_provider<P: IdentityProvider + 'static>(mut self, provider: P) -> Self {
        self.sources.push(IdentitySource::Provider(Arc::new(provider)));
        self
    }

    /// Adds a shared pre-built provider.
    #[must_use]
    pub fn with_shared_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.sources.push(IdentitySource::Provider(provider));
        self
    }

    /// Adds a credential store, to be wrapped into the default store-backed
    /// provider.
    #[must_use]
    pub fn with_store(mut self, store: &CredentialStore) -> Self {
        self.sources
            .push(IdentitySource::Store(StoreIdentityProvider::from_store(store)));
        self
    }

    /// Adds a credential store with a named provider algorithm.
    #[must_use]
    pub fn with_store_and_algorithm(
        mut self,
        store: &CredentialStore,
        algorithm: impl Into<String>,
    ) -> Self {
        self.sources.push(IdentitySource::StoreWithAlgorithm(
            StoreIdentityProvider::from_store(store),
            algorithm.into(),
        ));
        self
    }

    /// Finalizes the builder into an immutable composite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlgorithm`] for an unknown provider
    /// algorithm name.
    pub fn build(self) -> Result<CompositeIdentityProvider> {
        let mut providers: Vec<Arc<dyn IdentityProvider>> = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            let provider: Arc<dyn IdentityProvider> = match source {
                IdentitySource::Provider(provider) => provider,
                IdentitySource::Store(provider) => Arc::new(provider),
                IdentitySource::StoreWithAlgorithm(provider, algorithm) => {
                    if algorithm != DEFAULT_IDENTITY_ALGORITHM {
                        return Err(Error::UnsupportedAlgorithm(algorithm));
                    }
                    Arc::new(provider)
                }
            };
            providers.push(provider);
        }
        Ok(CompositeIdentityProvider { providers })
    }
}

/// An immutable, ordered aggregation of identity providers behaving as one.
#[derive(Debug)]
pub struct CompositeIdentityProvider {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl CompositeIdentityProvider {
    /// Starts a builder.
    pub fn builder() -> CompositeIdentityProviderBuilder {
        CompositeIdentityProviderBuilder::new()
    }

    /// Number of composed providers.
    pub fn size(&self) -> usize {
        self.providers.len()
    }

    fn first_some<T>(
        &self,
        mut f: impl FnMut(&dyn IdentityProvider) -> Option<T>,
    ) -> Option<T> {
        self.providers.iter().find_map(|provider| f(provider.as_ref()))
    }

    fn concatenated(
        &self,
        mut f: impl FnMut(&dyn IdentityProvider) -> Option<Vec<String>>,
    ) -> Option<Vec<String>> {
        let mut all = Vec::new();
        for provider in &self.providers {
            if let Some(aliases) = f(provider.as_ref()) {
                all.extend(aliases);
            }
        }
        if all.is_empty() {
            None
        } else {
            Some(all)
        }
    }
}

impl IdentityProvider for CompositeIdentityProvider {
    fn choose_client_alias(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<String> {
        self.first_some(|provider| provider.choose_client_alias(schemes, issuer_hints))
    }

    fn choose_server_alias(&self, schemes: &[SignatureScheme]) -> Option<String> {
        self.first_some(|provider| provider.choose_server_alias(schemes))
    }

    fn private_key(&self, alias: &str) -> Option<PrivateKeyDer<'static>> {
        self.first_some(|provider| provider.private_key(alias))
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.first_some(|provider| {
            provider
                .certificate_chain(alias)
                .filter(|chain| !chain.is_empty())
        })
    }

    fn client_aliases(
        &self,
        schemes: &[SignatureScheme],
        issuer_hints: &[&[u8]],
    ) -> Option<Vec<String>> {
        self.concatenated(|provider| provider.client_aliases(schemes, issuer_hints))
    }

    fn server_aliases(&self, schemes: &[SignatureScheme]) -> Option<Vec<String>> {
        self.concatenated(|provider| provider.server_aliases(schemes))
    }
}

fn certified_key_for(
    provider: &CompositeIdentityProvider,
    alias: &str,
    crypto: &CryptoProvider,
) -> Option<Arc<CertifiedKey>> {
    let key = provider.private_key(alias)?;
    let chain = provider.certificate_chain(alias)?;
    match crypto.key_provider.load_private_key(key) {
        Ok(signing_key) => Some(Arc::new(CertifiedKey::new(chain, signing_key))),
        Err(e) => {
            warn!("cannot load the private key stored under [{alias}]: {e}");
            None
        }
    }
}

/// Bridges a composite provider into rustls' client certificate resolution.
#[derive(Debug)]
pub struct ClientIdentityResolver {
    provider: Arc<CompositeIdentityProvider>,
    crypto: Arc<CryptoProvider>,
}

impl ClientIdentityResolver {
    /// Wraps a composite provider for use in a `rustls::ClientConfig`.
    pub fn new(
        provider: Arc<CompositeIdentityProvider>,
        selection: &crypto::ProviderSelection,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            crypto: crypto::select_provider(selection)?,
        })
    }

    pub(crate) fn with_crypto(
        provider: Arc<CompositeIdentityProvider>,
        crypto: Arc<CryptoProvider>,
    ) -> Self {
        Self { provider, crypto }
    }
}

impl ResolvesClientCert for ClientIdentityResolver {
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let alias = self
            .provider
            .choose_client_alias(sigschemes, root_hint_subjects)?;
        debug!("resolved client identity [{alias}]");
        certified_key_for(&self.provider, &alias, &self.crypto)
    }

    fn has_certs(&self) -> bool {
        self.provider.client_aliases(&[], &[]).is_some()
    }
}

/// Bridges a composite provider into rustls' server certificate resolution.
#[derive(Debug)]
pub struct ServerIdentityResolver {
    provider: Arc<CompositeIdentityProvider>,
    crypto: Arc<CryptoProvider>,
}

impl ServerIdentityResolver {
    /// Wraps a composite provider for use in a `rustls::ServerConfig`.
    pub fn new(
        provider: Arc<CompositeIdentityProvider>,
        selection: &crypto::ProviderSelection,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            crypto: crypto::select_provider(selection)?,
        })
    }

    pub(crate) fn with_crypto(
        provider: Arc<CompositeIdentityProvider>,
        crypto: Arc<CryptoProvider>,
    ) -> Self {
        Self { provider, crypto }
    }
}

impl ResolvesServerCert for ServerIdentityResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let alias = self
            .provider
            .choose_server_alias(client_hello.signature_schemes())?;
        debug!("resolved server identity [{alias}]");
        certified_key_for(&self.provider, &alias, &self.crypto)
    }
}
