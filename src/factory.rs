//! The one-stop facade: accumulate trust and identity material from any mix
//! of sources and build an immutable [`TlsFactory`] exposing the composite
//! material, the assembled [`TlsContext`] and the derived rustls configs.

use crate::context::{TlsContext, TlsContextBuilder};
use crate::crypto::ProviderSelection;
use crate::error::{Error, Result};
use crate::hostname::HostnameVerificationPolicy;
use crate::identity::{
    CompositeIdentityProvider, CompositeIdentityProviderBuilder, IdentityProvider,
};
use crate::prelude::{info, warn};
use crate::store::CredentialStore;
use crate::trust::{
    CompositeTrustValidator, CompositeTrustValidatorBuilder, InsecureTrustValidator,
    TrustValidator,
};
use rustls::crypto::SecureRandom;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, ServerConfig};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// A credential store together with the password it was protected with.
///
/// Passwords are zeroized when the factory is built, unless password caching
/// was enabled on the builder.
pub struct StoreHolder {
    store: CredentialStore,
    password: Option<Zeroizing<Vec<u8>>>,
}

impl StoreHolder {
    fn new(store: CredentialStore, password: Option<Vec<u8>>) -> Self {
        Self {
            store,
            password: password.map(Zeroizing::new),
        }
    }

    /// The held credential store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The held password, when caching kept it around.
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref().map(Vec::as_slice)
    }

    fn clear_password(&mut self) {
        // Dropping the Zeroizing wrapper wipes the bytes.
        self.password = None;
    }
}

impl fmt::Debug for StoreHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHolder")
            .field("entries", &self.store.len())
            .field("password", &self.password.is_some())
            .finish()
    }
}

/// Accumulates material from any mix of sources and finalizes it into a
/// [`TlsFactory`].
#[derive(Default)]
pub struct TlsFactoryBuilder {
    trust: CompositeTrustValidatorBuilder,
    trust_sources: usize,
    identity: CompositeIdentityProviderBuilder,
    identity_sources: usize,
    trust_stores: Vec<StoreHolder>,
    identity_stores: Vec<StoreHolder>,
    hostname_verification: HostnameVerificationPolicy,
    context: TlsContextBuilder,
    provider: ProviderSelection,
    cache_passwords: bool,
}

impl fmt::Debug for TlsFactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsFactoryBuilder")
            .field("trust_sources", &self.trust_sources)
            .field("identity_sources", &self.identity_sources)
            .field("hostname_verification", &self.hostname_verification)
            .finish()
    }
}

impl TlsFactoryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-built trust validator.
    #[must_use]
    pub fn with_trust_validator<V: TrustValidator + 'static>(mut self, validator: V) -> Self {
        self.trust = self.trust.with_validator(validator);
        self.trust_sources += 1;
        self
    }

    /// Adds a shared pre-built trust validator.
    #[must_use]
    pub fn with_shared_trust_validator(mut self, validator: Arc<dyn TrustValidator>) -> Self {
        self.trust = self.trust.with_shared_validator(validator);
        self.trust_sources += 1;
        self
    }

    /// Adds a credential store as trust material.
    #[must_use]
    pub fn with_trust_store(self, store: CredentialStore) -> Self {
        self.with_trust_store_and_password(store, None)
    }

    /// Adds a password-protected credential store as trust material.
    #[must_use]
    pub fn with_trust_store_and_password(
        mut self,
        store: CredentialStore,
        password: Option<Vec<u8>>,
    ) -> Self {
        self.trust = self.trust.with_store(&store);
        self.trust_stores.push(StoreHolder::new(store, password));
        self.trust_sources += 1;
        self
    }

    /// Adds a credential store as trust material under a named validation
    /// algorithm.
    #[must_use]
    pub fn with_trust_store_and_algorithm(
        mut self,
        store: CredentialStore,
        algorithm: impl Into<String>,
    ) -> Self {
        self.trust = self.trust.with_store_and_algorithm(&store, algorithm);
        self.trust_stores.push(StoreHolder::new(store, None));
        self.trust_sources += 1;
        self
    }

    /// Adds raw certificates as trust material.
    #[must_use]
    pub fn with_trust_certificates(mut self, certificates: Vec<CertificateDer<'static>>) -> Self {
        self.trust = self.trust.with_certificates(certificates);
        self.trust_sources += 1;
        self
    }

    /// Trusts every certificate chain without validation.
    ///
    /// This disables the security TLS is supposed to provide. Meant for
    /// tests and local development only.
    #[must_use]
    pub fn with_unsafe_trust_material(mut self) -> Self {
        warn!("UNSAFE: every certificate chain will be trusted without validation");
        self.trust = self.trust.with_validator(*InsecureTrustValidator::shared());
        self.trust_sources += 1;
        self
    }

    /// Adds a pre-built identity provider.
    #[must_use]
    pub fn with_identity_provider<P: IdentityProvider + 'static>(mut self, provider: P) -> Self {
        self.identity = self.identity.with_provider(provider);
        self.identity_sources += 1;
        self
    }

    /// Adds a shared pre-built identity provider.
    #[must_use]
    pub fn with_shared_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = self.identity.with_shared_provider(provider);
        self.identity_sources += 1;
        self
    }

    /// Adds a credential store as identity material.
    #[must_use]
    pub fn with_identity_store(self, store: CredentialStore) -> Self {
        self.with_identity_store_and_password(store, None)
    }

    /// Adds a password-protected credential store as identity material.
    #[must_use]
    pub fn with_identity_store_and_password(
        mut self,
        store: CredentialStore,
        password: Option<Vec<u8>>,
    ) -> Self {
        self.identity = self.identity.with_store(&store);
        self.identity_stores.push(StoreHolder::new(store, password));
        self.identity_sources += 1;
        self
    }

    /// Adds a credential store as identity material under a named provider
    /// algorithm.
    #[must_use]
    pub fn with_identity_store_and_algorithm(
        mut self,
        store: CredentialStore,
        algorithm: impl Into<String>,
    ) -> Self {
        self.identity = self.identity.with_store_and_algorithm(&store, algorithm);
        self.identity_stores.push(StoreHolder::new(store, None));
        self.identity_sources += 1;
        self
    }

    /// Adds a raw private key and certificate chain as identity material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when the chain is empty.
    pub fn with_identity(
        self,
        key: PrivateKeyDer<'static>,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<Self> {
        let store = CredentialStore::identity_store_from(key, chain, None)?;
        Ok(self.with_identity_store(store))
    }

    /// Sets the hostname verification policy exposed to adapters.
    #[must_use]
    pub fn with_hostname_verification(mut self, policy: HostnameVerificationPolicy) -> Self {
        self.hostname_verification = policy;
        self
    }

    /// Restricts the cipher suites by name.
    #[must_use]
    pub fn with_ciphers<S: Into<String>>(mut self, ciphers: impl IntoIterator<Item = S>) -> Self {
        self.context = self.context.with_ciphers(ciphers);
        self
    }

    /// Names the protocol versions to enable.
    #[must_use]
    pub fn with_protocols<S: Into<String>>(
        mut self,
        protocols: impl IntoIterator<Item = S>,
    ) -> Self {
        self.context = self.context.with_protocols(protocols);
        self
    }

    /// Selects the crypto provider by name.
    #[must_use]
    pub fn with_security_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider = ProviderSelection::Named(name.into());
        self
    }

    /// Selects the crypto provider by instance.
    #[must_use]
    pub fn with_security_provider(mut self, provider: Arc<rustls::crypto::CryptoProvider>) -> Self {
        self.provider = ProviderSelection::Instance(provider);
        self
    }

    /// Overrides the secure-random source of the derived configs.
    #[must_use]
    pub fn with_secure_random(mut self, secure_random: &'static dyn SecureRandom) -> Self {
        self.context = self.context.with_secure_random(secure_random);
        self
    }

    /// Keeps store passwords in memory after [`TlsFactoryBuilder::build`].
    ///
    /// Without this, passwords are zeroized once the factory is built.
    #[must_use]
    pub fn with_password_caching(mut self) -> Self {
        self.cache_passwords = true;
        self
    }

    /// Finalizes the builder into an immutable factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when no material was supplied,
    /// plus any construction error of the composites or the context.
    pub fn build(mut self) -> Result<TlsFactory> {
        if self.trust_sources == 0 && self.identity_sources == 0 {
            return Err(Error::InvalidConfiguration(
                "could not create a factory: no trust or identity material was supplied".into(),
            ));
        }

        // One provider resolution shared by the composites and the context.
        let provider = crate::crypto::select_provider(&self.provider)?;

        let trust = if self.trust_sources > 0 {
            Some(Arc::new(
                self.trust
                    .with_provider_selection(ProviderSelection::Instance(Arc::clone(&provider)))
                    .build()?,
            ))
        } else {
            None
        };

        let identity = if self.identity_sources > 0 {
            Some(Arc::new(self.identity.build()?))
        } else {
            None
        };

        let mut context = self
            .context
            .with_provider_selection(ProviderSelection::Instance(provider));
        if let Some(trust) = &trust {
            context = context.with_trust_validator(Arc::clone(trust));
        }
        if let Some(identity) = &identity {
            context = context.with_identity_provider(Arc::clone(identity));
        }
        let context = context.build()?;

        if !self.cache_passwords {
            for holder in self
                .trust_stores
                .iter_mut()
                .chain(self.identity_stores.iter_mut())
            {
                holder.clear_password();
            }
        }

        info!(
            "created a TLS factory with {} trust source(s) and {} identity source(s)",
            self.trust_sources, self.identity_sources
        );

        Ok(TlsFactory {
            context,
            trust,
            identity,
            trust_stores: self.trust_stores,
            identity_stores: self.identity_stores,
            hostname_verification: self.hostname_verification,
        })
    }
}

/// Immutable facade over the assembled TLS material.
#[derive(Debug)]
pub struct TlsFactory {
    context: TlsContext,
    trust: Option<Arc<CompositeTrustValidator>>,
    identity: Option<Arc<CompositeIdentityProvider>>,
    trust_stores: Vec<StoreHolder>,
    identity_stores: Vec<StoreHolder>,
    hostname_verification: HostnameVerificationPolicy,
}

impl TlsFactory {
    /// Starts a builder.
    pub fn builder() -> TlsFactoryBuilder {
        TlsFactoryBuilder::new()
    }

    /// The assembled context.
    pub fn context(&self) -> &TlsContext {
        &self.context
    }

    /// Derives a client config from the context.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TlsContext::client_config`].
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.context.client_config()
    }

    /// Derives a server config from the context.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TlsContext::server_config`].
    pub fn server_config(&self) -> Result<ServerConfig> {
        self.context.server_config()
    }

    /// The composite trust material, when present.
    pub fn trust_validator(&self) -> Option<&Arc<CompositeTrustValidator>> {
        self.trust.as_ref()
    }

    /// The composite identity material, when present.
    pub fn identity_provider(&self) -> Option<&Arc<CompositeIdentityProvider>> {
        self.identity.as_ref()
    }

    /// Every accepted issuer certificate across all trust sources.
    pub fn trusted_certificates(&self) -> &[CertificateDer<'static>] {
        self.trust
            .as_ref()
            .map(|trust| trust.accepted_issuers())
            .unwrap_or_default()
    }

    /// The enabled cipher suite names.
    pub fn ciphers(&self) -> Vec<String> {
        self.context.ciphers()
    }

    /// The enabled protocol version names.
    pub fn protocols(&self) -> Vec<&'static str> {
        self.context.protocols()
    }

    /// The hostname verification policy for adapters to share.
    pub fn hostname_verification(&self) -> HostnameVerificationPolicy {
        self.hostname_verification
    }

    /// The trust stores this factory was built from.
    pub fn trust_stores(&self) -> &[StoreHolder] {
        &self.trust_stores
    }

    /// The identity stores this factory was built from.
    pub fn identity_stores(&self) -> &[StoreHolder] {
        &self.identity_stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_root_a() -> CertificateDer<'static> {
        CertificateDer::from(
            include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/root_a.der"))
                .to_vec(),
        )
    }

    fn fixture_root_b() -> CertificateDer<'static> {
        CertificateDer::from(
            include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/root_b.der"))
                .to_vec(),
        )
    }

    #[test]
    fn factory_requires_some_material() {
        let err = TlsFactory::builder().build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn trust_material_from_multiple_sources_is_merged() {
        let store = CredentialStore::trust_store_from(vec![fixture_root_a()]).unwrap();
        let factory = TlsFactory::builder()
            .with_trust_store(store)
            .with_trust_certificates(vec![fixture_root_b()])
            .build()
            .unwrap();

        let trust = factory.trust_validator().unwrap();
        assert_eq!(trust.size(), 2);
        assert_eq!(factory.trusted_certificates().len(), 2);
    }

    #[test]
    fn passwords_are_wiped_unless_caching_is_enabled() {
        let store = CredentialStore::trust_store_from(vec![fixture_root_a()]).unwrap();

        let factory = TlsFactory::builder()
            .with_trust_store_and_password(store.clone(), Some(b"changeit".to_vec()))
            .build()
            .unwrap();
        assert!(factory.trust_stores()[0].password().is_none());

        let caching = TlsFactory::builder()
            .with_trust_store_and_password(store, Some(b"changeit".to_vec()))
            .with_password_caching()
            .build()
            .unwrap();
        assert_eq!(caching.trust_stores()[0].password(), Some(&b"changeit"[..]));
    }

    #[test]
    fn unsafe_trust_material_accepts_any_chain() {
        use rustls::pki_types::{ServerName, UnixTime};

        let factory = TlsFactory::builder()
            .with_unsafe_trust_material()
            .build()
            .unwrap();

        let garbage = CertificateDer::from(vec![0x01, 0x02]);
        factory
            .trust_validator()
            .unwrap()
            .check_server_trusted(
                &garbage,
                &[],
                &ServerName::try_from("localhost").unwrap(),
                UnixTime::now(),
            )
            .unwrap();
    }

    #[test]
    fn hostname_verification_policy_is_exposed() {
        let factory = TlsFactory::builder()
            .with_unsafe_trust_material()
            .with_hostname_verification(HostnameVerificationPolicy::AllowAll)
            .build()
            .unwrap();
        assert_eq!(
            factory.hostname_verification(),
            HostnameVerificationPolicy::AllowAll
        );
    }
}
