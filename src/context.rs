//! Context assembly: composite material into ready-to-use rustls configs.
//!
//! A [`TlsContext`] binds at most one composite trust validator and at most
//! one composite identity provider (never neither) to protocol versions, a
//! crypto-provider selection, an optional secure-random override and optional
//! cipher-suite overrides. From it, [`TlsContext::client_config`] and
//! [`TlsContext::server_config`] derive the rustls configs.

use crate::crypto::{self, ProviderSelection};
use crate::error::{Error, Result};
use crate::identity::{ClientIdentityResolver, CompositeIdentityProvider, ServerIdentityResolver};
use crate::prelude::debug;
use crate::trust::CompositeTrustValidator;
use rustls::crypto::{CryptoProvider, SecureRandom};
use rustls::{ClientConfig, ProtocolVersion, ServerConfig, SupportedProtocolVersion};
use std::fmt;
use std::sync::Arc;

/// Protocol name standing for the runtime's default version set.
pub const DEFAULT_PROTOCOL: &str = "TLS";

fn named_version(name: &str) -> Result<&'static SupportedProtocolVersion> {
    match name {
        "TLSv1.3" => Ok(&rustls::version::TLS13),
        "TLSv1.2" => Ok(&rustls::version::TLS12),
        other => Err(Error::UnsupportedProtocol(other.to_string())),
    }
}

fn version_name(version: &SupportedProtocolVersion) -> &'static str {
    match version.version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3",
        _ => "TLSv1.2",
    }
}

/// Accumulates material and options and finalizes them into a [`TlsContext`].
#[derive(Default)]
pub struct TlsContextBuilder {
    trust: Option<Arc<CompositeTrustValidator>>,
    identity: Option<Arc<CompositeIdentityProvider>>,
    protocols: Vec<String>,
    provider: ProviderSelection,
    secure_random: Option<&'static dyn SecureRandom>,
    ciphers: Option<Vec<String>>,
}

impl fmt::Debug for TlsContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextBuilder")
            .field("trust", &self.trust.is_some())
            .field("identity", &self.identity.is_some())
            .field("protocols", &self.protocols)
            .field("provider", &self.provider)
            .field("ciphers", &self.ciphers)
            .finish()
    }
}

impl TlsContextBuilder {
    /// Creates a builder with default protocols and provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the trust material backing peer-chain validation.
    #[must_use]
    pub fn with_trust_validator(mut self, validator: Arc<CompositeTrustValidator>) -> Self {
        self.trust = Some(validator);
        self
    }

    /// Sets the identity material backing certificate resolution.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<CompositeIdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Names the protocol versions to enable. `"TLS"` stands for the default
    /// version set; `"TLSv1.3"` and `"TLSv1.2"` name single versions.
    #[must_use]
    pub fn with_protocols<S: Into<String>>(mut self, protocols: impl IntoIterator<Item = S>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Selects the crypto provider backing the derived configs.
    #[must_use]
    pub fn with_provider_selection(mut self, selection: ProviderSelection) -> Self {
        self.provider = selection;
        self
    }

    /// Overrides the provider's secure-random source.
    #[must_use]
    pub fn with_secure_random(mut self, secure_random: &'static dyn SecureRandom) -> Self {
        self.secure_random = Some(secure_random);
        self
    }

    /// Restricts the provider's cipher suites to the named ones.
    #[must_use]
    pub fn with_ciphers<S: Into<String>>(mut self, ciphers: impl IntoIterator<Item = S>) -> Self {
        self.ciphers = Some(ciphers.into_iter().map(Into::into).collect());
        self
    }

    /// Finalizes the builder into an immutable context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when neither trust nor
    /// identity material was supplied or the cipher restriction leaves no
    /// usable suite, [`Error::UnsupportedProtocol`] for an unknown protocol
    /// name, and [`Error::UnsupportedProvider`] for an unknown provider name.
    pub fn build(self) -> Result<TlsContext> {
        if self.trust.is_none() && self.identity.is_none() {
            return Err(Error::InvalidConfiguration(
                "could not create a context: no trust or identity material was supplied".into(),
            ));
        }

        let mut provider = crypto::select_provider(&self.provider)?;

        if let Some(names) = &self.ciphers {
            let cipher_suites: Vec<_> = provider
                .cipher_suites
                .iter()
                .filter(|suite| names.iter().any(|name| *name == format!("{:?}", suite.suite())))
                .copied()
                .collect();
            if cipher_suites.is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "none of the requested ciphers are supported: {names:?}"
                )));
            }
            provider = Arc::new(CryptoProvider {
                cipher_suites,
                ..(*provider).clone()
            });
        }

        if let Some(secure_random) = self.secure_random {
            provider = Arc::new(CryptoProvider {
                secure_random,
                ..(*provider).clone()
            });
        }

        let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
        let names = if self.protocols.is_empty() {
            vec![DEFAULT_PROTOCOL.to_string()]
        } else {
            self.protocols
        };
        for name in &names {
            if name == DEFAULT_PROTOCOL {
                for version in rustls::DEFAULT_VERSIONS {
                    if !versions.iter().any(|v| v.version == version.version) {
                        versions.push(*version);
                    }
                }
            } else {
                let version = named_version(name)?;
                if !versions.iter().any(|v| v.version == version.version) {
                    versions.push(version);
                }
            }
        }

        debug!(
            "created a context with protocols {:?}",
            versions.iter().map(|v| version_name(v)).collect::<Vec<_>>()
        );

        Ok(TlsContext {
            trust: self.trust,
            identity: self.identity,
            provider,
            versions,
        })
    }
}

/// Immutable TLS material bound to protocols and a crypto provider.
pub struct TlsContext {
    trust: Option<Arc<CompositeTrustValidator>>,
    identity: Option<Arc<CompositeIdentityProvider>>,
    provider: Arc<CryptoProvider>,
    versions: Vec<&'static SupportedProtocolVersion>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("trust", &self.trust.is_some())
            .field("identity", &self.identity.is_some())
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl TlsContext {
    /// Starts a builder.
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder::new()
    }

    /// The trust material, when present.
    pub fn trust_validator(&self) -> Option<&Arc<CompositeTrustValidator>> {
        self.trust.as_ref()
    }

    /// The identity material, when present.
    pub fn identity_provider(&self) -> Option<&Arc<CompositeIdentityProvider>> {
        self.identity.as_ref()
    }

    /// The crypto provider the derived configs are built with.
    pub fn crypto_provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// The enabled protocol version names.
    pub fn protocols(&self) -> Vec<&'static str> {
        self.versions.iter().map(|v| version_name(v)).collect()
    }

    /// The enabled cipher suite names.
    pub fn ciphers(&self) -> Vec<String> {
        self.provider
            .cipher_suites
            .iter()
            .map(|suite| format!("{:?}", suite.suite()))
            .collect()
    }

    /// Derives a client config validating servers through the trust material.
    ///
    /// Client authentication is offered only when identity material is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] without trust material, or a
    /// propagated rustls error when the provider and protocol combination is
    /// inconsistent.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let trust = self.trust.as_ref().ok_or_else(|| {
            Error::InvalidConfiguration(
                "a client config requires trust material to validate servers".into(),
            )
        })?;

        let verifier: Arc<dyn rustls::client::danger::ServerCertVerifier> = trust.clone();
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&self.versions)?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = match &self.identity {
            Some(identity) => builder.with_client_cert_resolver(Arc::new(
                ClientIdentityResolver::with_crypto(
                    Arc::clone(identity),
                    Arc::clone(&self.provider),
                ),
            )),
            None => builder.with_no_client_auth(),
        };

        Ok(config)
    }

    /// Derives a server config serving the identity material.
    ///
    /// Client certificates are requested and verified only when trust
    /// material is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] without identity material, or
    /// a propagated rustls error when the provider and protocol combination
    /// is inconsistent.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            Error::InvalidConfiguration(
                "a server config requires identity material to present a certificate".into(),
            )
        })?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&self.versions)?;

        let builder = match &self.trust {
            Some(trust) => {
                let verifier: Arc<dyn rustls::server::danger::ClientCertVerifier> =
                    trust.clone();
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder.with_cert_resolver(Arc::new(ServerIdentityResolver::with_crypto(
            Arc::clone(identity),
            Arc::clone(&self.provider),
        )));

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CredentialStore;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    fn fixture_root_a() -> CertificateDer<'static> {
        CertificateDer::from(
            include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/root_a.der"))
                .to_vec(),
        )
    }

    fn fixture_leaf() -> CertificateDer<'static> {
        CertificateDer::from(
            include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/leaf.der"))
                .to_vec(),
        )
    }

    fn fixture_key() -> PrivateKeyDer<'static> {
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(
            include_bytes!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/fixtures/leaf.key.pkcs8"
            ))
            .to_vec(),
        ))
    }

    fn trust() -> Arc<CompositeTrustValidator> {
        let store = CredentialStore::trust_store_from(vec![fixture_root_a()]).unwrap();
        Arc::new(
            CompositeTrustValidator::builder()
                .with_store(&store)
                .build()
                .unwrap(),
        )
    }

    fn identity() -> Arc<CompositeIdentityProvider> {
        let store =
            CredentialStore::identity_store_from(fixture_key(), vec![fixture_leaf()], None)
                .unwrap();
        Arc::new(
            CompositeIdentityProvider::builder()
                .with_store(&store)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn context_requires_some_material() {
        let err = TlsContext::builder().build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn trust_only_context_derives_a_client_config_but_no_server_config() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .build()
            .unwrap();

        context.client_config().unwrap();
        let err = context.server_config().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn identity_only_context_derives_a_server_config_but_no_client_config() {
        let context = TlsContext::builder()
            .with_identity_provider(identity())
            .build()
            .unwrap();

        context.server_config().unwrap();
        let err = context.client_config().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn full_context_derives_both_configs() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .with_identity_provider(identity())
            .build()
            .unwrap();

        context.client_config().unwrap();
        context.server_config().unwrap();
    }

    #[test]
    fn default_protocols_cover_the_default_version_set() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .build()
            .unwrap();

        let protocols = context.protocols();
        assert!(protocols.contains(&"TLSv1.3"));
        assert!(protocols.contains(&"TLSv1.2"));
    }

    #[test]
    fn named_protocols_are_honored() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .with_protocols(["TLSv1.3"])
            .build()
            .unwrap();

        assert_eq!(context.protocols(), vec!["TLSv1.3"]);
        context.client_config().unwrap();
    }

    #[test]
    fn overlapping_protocol_names_are_listed_once() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .with_protocols(["TLSv1.2", "TLS"])
            .build()
            .unwrap();

        assert_eq!(context.protocols(), vec!["TLSv1.2", "TLSv1.3"]);
    }

    #[test]
    fn unknown_protocol_names_are_rejected() {
        let err = TlsContext::builder()
            .with_trust_validator(trust())
            .with_protocols(["SSLv3"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(name) if name == "SSLv3"));
    }

    #[test]
    fn cipher_restriction_filters_the_suite_list() {
        let context = TlsContext::builder()
            .with_trust_validator(trust())
            .with_ciphers(["TLS13_AES_256_GCM_SHA384"])
            .build()
            .unwrap();

        assert_eq!(context.ciphers(), vec!["TLS13_AES_256_GCM_SHA384"]);
    }

    #[test]
    fn empty_cipher_intersection_is_rejected() {
        let err = TlsContext::builder()
            .with_trust_validator(trust())
            .with_ciphers(["TLS_NOT_A_SUITE"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }
}
