//! Trust validators and their composite.
//!
//! A [`TrustValidator`] accepts or rejects a certificate chain. The
//! [`CompositeTrustValidator`] presents any number of independently sourced
//! validators as a single object, which matters because TLS stacks honor only
//! one verifier per config: merging N sources requires one object whose
//! behavior fans out across all of them.
//!
//! Validation follows first-acceptance-wins: validators are consulted in the
//! order they were added and the first success returns immediately. Order
//! affects performance and logging only, not correctness, since acceptance is
//! monotonic per validator. When every validator rejects the chain, the
//! composite reports one [`CompositeValidationError`] carrying every
//! per-validator cause.

use crate::crypto;
use crate::error::{CompositeValidationError, Error, Result, ValidationError};
use crate::prelude::debug;
use crate::store::CredentialStore;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::sync::Arc;
use x509_parser::prelude::*;

/// The default (and only) chain-validation algorithm name.
pub const WEBPKI_ALGORITHM: &str = "webpki";

/// A capability object that accepts or rejects certificate chains.
///
/// Implementations must be safe for unsynchronized concurrent use: checks
/// only read immutable state and allocate per-call.
pub trait TrustValidator: Send + Sync + fmt::Debug {
    /// The issuer certificates this validator accepts chains from.
    fn accepted_issuers(&self) -> &[CertificateDer<'static>];

    /// Validates a server certificate chain presented to a client.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the chain is not trusted.
    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), ValidationError>;

    /// Validates a client certificate chain presented to a server.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the chain is not trusted.
    fn check_client_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), ValidationError>;
}

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

fn subject_of(certificate: &CertificateDer<'_>) -> String {
    match X509Certificate::from_der(certificate.as_ref()) {
        Ok((_, parsed)) => parsed.subject().to_string(),
        Err(_) => "<unparsable certificate>".to_string(),
    }
}

/// The default validator: delegates chain validation to rustls' webpki
/// verifiers built from a fixed set of root certificates.
#[derive(Debug)]
pub struct WebPkiValidator {
    issuers: Vec<CertificateDer<'static>>,
    server: Arc<WebPkiServerVerifier>,
    client: Arc<dyn rustls::server::danger::ClientCertVerifier>,
}

impl WebPkiValidator {
    /// Builds a validator from root certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTrustMaterial`] when no certificate is accepted
    /// as a root, or [`Error::VerifierBuilder`] when the underlying webpki
    /// verifier cannot be constructed.
    pub fn from_certificates(
        certificates: Vec<CertificateDer<'static>>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::EmptyTrustMaterial);
        }

        let mut roots = RootCertStore::empty();
        let (added, _) = roots.add_parsable_certificates(certificates.iter().cloned());
        debug!("loaded {added} root certificate(s) into a webpki validator");

        if roots.is_empty() {
            return Err(Error::EmptyTrustMaterial);
        }

        let roots = Arc::new(roots);

        let server = WebPkiServerVerifier::builder_with_provider(
            Arc::clone(&roots),
            Arc::clone(&provider),
        )
        .build()
        .map_err(|e| Error::VerifierBuilder(format!("{e:?}")))?;

        let client = WebPkiClientVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| Error::VerifierBuilder(format!("{e:?}")))?;

        Ok(Self {
            issuers: certificates,
            server,
            client,
        })
    }

    /// Builds a validator from the trust anchors of a credential store.
    ///
    /// # Errors
    ///
    /// Same conditions as [`WebPkiValidator::from_certificates`].
    pub fn from_store(store: &CredentialStore, provider: Arc<CryptoProvider>) -> Result<Self> {
        Self::from_certificates(store.trust_certificates(), provider)
    }
}

impl TrustValidator for WebPkiValidator {
    fn accepted_issuers(&self) -> &[CertificateDer<'static>] {
        &self.issuers
    }

    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), ValidationError> {
        use rustls::client::danger::ServerCertVerifier as _;
        self.server
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
            .map_err(ValidationError::from)
    }

    fn check_client_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), ValidationError> {
        self.client
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ())
            .map_err(ValidationError::from)
    }
}

/// A validator that trusts every chain without any validation.
///
/// Stateless and side-effect free, so a single shared instance serves the
/// whole process. Intended for tests and local development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureTrustValidator;

impl InsecureTrustValidator {
    /// The shared singleton instance.
    pub fn shared() -> &'static Self {
        static INSTANCE: InsecureTrustValidator = InsecureTrustValidator;
        &INSTANCE
    }
}

impl TrustValidator for InsecureTrustValidator {
    fn accepted_issuers(&self) -> &[CertificateDer<'static>] {
        &[]
    }

    fn check_server_trusted(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _now: UnixTime,
    ) -> std::result::Result<(), ValidationError> {
        Ok(())
    }

    fn check_client_trusted(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<(), ValidationError> {
        Ok(())
    }
}

enum TrustSource {
    Validator(Arc<dyn TrustValidator>),
    Store(Vec<CertificateDer<'static>>),
    StoreWithAlgorithm(Vec<CertificateDer<'static>>, String),
}

/// Accumulates trust sources and finalizes them into a
/// [`CompositeTrustValidator`]. Addition order is preserved.
#[derive(Default)]
pub struct CompositeTrustValidatorBuilder {
    sources: Vec<TrustSource>,
    provider: crypto::ProviderSelection,
}

impl fmt::Debug for CompositeTrustValidatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeTrustValidatorBuilder")
            .field("sources", &self.sources.len())
            .field("provider", &self.provider)
            .finish()
    }
}

impl CompositeTrustValidatorBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-built validator.
    #[must_use]
    pub fn with_validator<V: TrustValidator + 'static>(mut self, validator: V) -> Self {
        self.sources.push(TrustSource::Validator(Arc::new(validator)));
        self
    }

    /// Adds a shared pre-built validator.
    #[must_use]
    pub fn with_shared_validator(mut self, validator: Arc<dyn TrustValidator>) -> Self {
        self.sources.push(TrustSource::Validator(validator));
        self
    }

    /// Adds a credential store, to be wrapped into the default webpki validator.
    #[must_use]
    pub fn with_store(mut self, store: &CredentialStore) -> Self {
        self.sources.push(TrustSource::Store(store.trust_certificates()));
        self
    }

    /// Adds a credential store with a named validation algorithm.
    #[must_use]
    pub fn with_store_and_algorithm(
        mut self,
        store: &CredentialStore,
        algorithm: impl Into<String>,
    ) -> Self {
        self.sources.push(TrustSource::StoreWithAlgorithm(
            store.trust_certificates(),
            algorithm.into(),
        ));
        self
    }

    /// Adds raw certificates, to be wrapped into the default webpki validator.
    #[must_use]
    pub fn with_certificates(mut self, certificates: Vec<CertificateDer<'static>>) -> Self {
        self.sources.push(TrustSource::Store(certificates));
        self
    }

    /// Selects the crypto provider used for store-backed validators and
    /// signature verification.
    #[must_use]
    pub fn with_provider_selection(mut self, selection: crypto::ProviderSelection) -> Self {
        self.provider = selection;
        self
    }

    /// Finalizes the builder into an immutable composite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTrustMaterial`] for a store source without trust
    /// anchors, [`Error::UnsupportedAlgorithm`] for an unknown algorithm
    /// name, or [`Error::UnsupportedProvider`] for an unknown provider name.
    pub fn build(self) -> Result<CompositeTrustValidator> {
        let provider = crypto::select_provider(&self.provider)?;

        let mut validators: Vec<Arc<dyn TrustValidator>> = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            let validator: Arc<dyn TrustValidator> = match source {
                TrustSource::Validator(validator) => validator,
                TrustSource::Store(certificates) => Arc::new(WebPkiValidator::from_certificates(
                    certificates,
                    Arc::clone(&provider),
                )?),
                TrustSource::StoreWithAlgorithm(certificates, algorithm) => {
                    if algorithm != WEBPKI_ALGORITHM {
                        return Err(Error::UnsupportedAlgorithm(algorithm));
                    }
                    Arc::new(WebPkiValidator::from_certificates(
                        certificates,
                        Arc::clone(&provider),
                    )?)
                }
            };
            validators.push(validator);
        }

        Ok(CompositeTrustValidator::new(validators, provider))
    }
}

/// An immutable, ordered aggregation of trust validators behaving as one.
///
/// Implements both of rustls' verifier traits so the same object can back a
/// client config (verifying servers) and a server config (verifying clients).
#[derive(Debug)]
pub struct CompositeTrustValidator {
    validators: Vec<Arc<dyn TrustValidator>>,
    accepted_issuers: Vec<CertificateDer<'static>>,
    provider: Arc<CryptoProvider>,
}

impl CompositeTrustValidator {
    /// Starts a builder.
    pub fn builder() -> CompositeTrustValidatorBuilder {
        CompositeTrustValidatorBuilder::new()
    }

    pub(crate) fn new(
        validators: Vec<Arc<dyn TrustValidator>>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        // Union of all accepted issuers, deduplicated by content,
        // first-seen order across validators in list order.
        let mut accepted_issuers: Vec<CertificateDer<'static>> = Vec::new();
        for validator in &validators {
            for certificate in validator.accepted_issuers() {
                let seen = accepted_issuers
                    .iter()
                    .any(|c| c.as_ref() == certificate.as_ref());
                if !seen {
                    accepted_issuers.push(certificate.clone());
                }
            }
        }

        Self {
            validators,
            accepted_issuers,
            provider,
        }
    }

    /// Number of composed validators.
    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// The deduplicated union of all validators' accepted issuers.
    pub fn accepted_issuers(&self) -> &[CertificateDer<'static>] {
        &self.accepted_issuers
    }

    /// Validates a server chain against the validators in order.
    ///
    /// # Errors
    ///
    /// Returns a [`CompositeValidationError`] carrying one cause per
    /// validator when none of them trusts the chain.
    pub fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), CompositeValidationError> {
        debug!(
            "received the following server certificate: [{}]",
            subject_of(end_entity)
        );

        let mut causes = Vec::with_capacity(self.validators.len());
        for validator in &self.validators {
            match validator.check_server_trusted(end_entity, intermediates, server_name, now) {
                Ok(()) => return Ok(()),
                Err(cause) => causes.push(cause),
            }
        }

        Err(CompositeValidationError::new(causes))
    }

    /// Validates a client chain against the validators in order.
    ///
    /// # Errors
    ///
    /// Returns a [`CompositeValidationError`] carrying one cause per
    /// validator when none of them trusts the chain.
    pub fn check_client_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), CompositeValidationError> {
        debug!(
            "received the following client certificate: [{}]",
            subject_of(end_entity)
        );

        let mut causes = Vec::with_capacity(self.validators.len());
        for validator in &self.validators {
            match validator.check_client_trusted(end_entity, intermediates, now) {
                Ok(()) => return Ok(()),
                Err(cause) => causes.push(cause),
            }
        }

        Err(CompositeValidationError::new(causes))
    }
}

impl rustls::client::danger::ServerCertVerifier for CompositeTrustValidator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        self.check_server_trusted(end_entity, intermediates, server_name, now)
            .map(|()| rustls::client::danger::ServerCertVerified::assertion())
            .map_err(other_err)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl rustls::server::danger::ClientCertVerifier for CompositeTrustValidator {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        // Returning an empty hint list is correct (it does not weaken
        // verification); it only affects what the peer *might* send.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        self.check_client_trusted(end_entity, intermediates, now)
            .map(|()| rustls::server::danger::ClientCertVerified::assertion())
            .map_err(other_err)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ProviderSelection;
    use std::sync::OnceLock;

    fn ensure_provider() {
        static ONCE: OnceLock<()> = OnceLock::new();
        ONCE.get_or_init(crate::crypto::ensure_default_provider_installed);
    }

    fn provider() -> Arc<CryptoProvider> {
        ensure_provider();
        crate::crypto::select_provider(&ProviderSelection::Default).unwrap()
    }

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

    fn fixture_leaf() -> CertificateDer<'static> {
        CertificateDer::from(
            include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/leaf.der"))
                .to_vec(),
        )
    }

    fn localhost() -> ServerName<'static> {
        ServerName::try_from("localhost").unwrap()
    }

    fn webpki_for(roots: Vec<CertificateDer<'static>>) -> WebPkiValidator {
        WebPkiValidator::from_certificates(roots, provider()).unwrap()
    }

    #[test]
    fn webpki_validator_accepts_a_chain_signed_by_its_root() {
        let validator = webpki_for(vec![fixture_root_a()]);
        validator
            .check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now())
            .unwrap();
        validator
            .check_client_trusted(&fixture_leaf(), &[], UnixTime::now())
            .unwrap();
    }

    #[test]
    fn webpki_validator_rejects_a_chain_from_another_root() {
        let validator = webpki_for(vec![fixture_root_b()]);
        let err = validator
            .check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::Rejected(_)));
    }

    #[test]
    fn webpki_validator_requires_trust_anchors() {
        let err = WebPkiValidator::from_certificates(Vec::new(), provider()).unwrap_err();
        assert!(matches!(err, Error::EmptyTrustMaterial));
    }

    #[test]
    fn composite_accepts_when_any_validator_accepts() {
        // The accepting validator comes second: the composite must keep
        // trying after the first rejection.
        let composite = CompositeTrustValidator::builder()
            .with_validator(webpki_for(vec![fixture_root_b()]))
            .with_validator(webpki_for(vec![fixture_root_a()]))
            .build()
            .unwrap();

        composite
            .check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now())
            .unwrap();
        composite
            .check_client_trusted(&fixture_leaf(), &[], UnixTime::now())
            .unwrap();
    }

    #[test]
    fn composite_failure_carries_one_cause_per_validator() {
        let composite = CompositeTrustValidator::builder()
            .with_validator(webpki_for(vec![fixture_root_b()]))
            .with_validator(webpki_for(vec![fixture_root_b()]))
            .build()
            .unwrap();

        let err = composite
            .check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now())
            .unwrap_err();

        assert_eq!(err.to_string(), "no validator trusts this certificate chain");
        assert_eq!(err.causes().len(), 2);
        for cause in err.causes() {
            assert!(matches!(cause, ValidationError::Rejected(_)));
        }
    }

    #[test]
    fn accepted_issuers_union_is_deduplicated_in_first_seen_order() {
        let composite = CompositeTrustValidator::builder()
            .with_validator(webpki_for(vec![fixture_root_a(), fixture_root_b()]))
            .with_validator(webpki_for(vec![fixture_root_a()]))
            .build()
            .unwrap();

        let issuers = composite.accepted_issuers();
        assert_eq!(issuers.len(), 2);
        assert_eq!(issuers[0], fixture_root_a());
        assert_eq!(issuers[1], fixture_root_b());
    }

    #[test]
    fn single_validator_composite_is_pass_through() {
        let direct = webpki_for(vec![fixture_root_a()]);
        let composite = CompositeTrustValidator::builder()
            .with_validator(webpki_for(vec![fixture_root_a()]))
            .build()
            .unwrap();

        // Accepting case: both succeed.
        let direct_ok =
            direct.check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now());
        let composite_ok =
            composite.check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now());
        assert_eq!(direct_ok.is_ok(), composite_ok.is_ok());
        assert!(composite_ok.is_ok());

        // Rejecting case: both fail, and the composite carries exactly the
        // direct validator's cause.
        let wrong_name = ServerName::try_from("not-localhost").unwrap();
        let direct_err = direct
            .check_server_trusted(&fixture_leaf(), &[], &wrong_name, UnixTime::now())
            .unwrap_err();
        let composite_err = composite
            .check_server_trusted(&fixture_leaf(), &[], &wrong_name, UnixTime::now())
            .unwrap_err();
        assert_eq!(composite_err.causes().len(), 1);
        assert_eq!(composite_err.causes()[0].to_string(), direct_err.to_string());
    }

    #[test]
    fn insecure_validator_accepts_any_chain() {
        let garbage = CertificateDer::from(vec![0x00, 0x01, 0x02]);
        InsecureTrustValidator::shared()
            .check_server_trusted(&garbage, &[], &localhost(), UnixTime::now())
            .unwrap();
        InsecureTrustValidator::shared()
            .check_client_trusted(&garbage, &[], UnixTime::now())
            .unwrap();
        assert!(InsecureTrustValidator::shared().accepted_issuers().is_empty());
    }

    #[test]
    fn builder_wraps_stores_into_webpki_validators() {
        let store = CredentialStore::trust_store_from(vec![fixture_root_a()]).unwrap();
        let composite = CompositeTrustValidator::builder()
            .with_store(&store)
            .build()
            .unwrap();

        assert_eq!(composite.size(), 1);
        composite
            .check_server_trusted(&fixture_leaf(), &[], &localhost(), UnixTime::now())
            .unwrap();
    }

    #[test]
    fn builder_rejects_unknown_algorithm_names() {
        let store = CredentialStore::trust_store_from(vec![fixture_root_a()]).unwrap();
        let err = CompositeTrustValidator::builder()
            .with_store_and_algorithm(&store, "SunX509")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(name) if name == "SunX509"));
    }

    #[test]
    fn builder_rejects_stores_without_trust_anchors() {
        let store = CredentialStore::new();
        let err = CompositeTrustValidator::builder()
            .with_store(&store)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::EmptyTrustMaterial));
    }

    #[test]
    fn rustls_verifier_surface_reports_supported_schemes() {
        use rustls::client::danger::ServerCertVerifier as _;

        let composite = CompositeTrustValidator::builder()
            .with_validator(webpki_for(vec![fixture_root_a()]))
            .build()
            .unwrap();

        assert!(!composite.supported_verify_schemes().is_empty());

        let verified = composite
            .verify_server_cert(&fixture_leaf(), &[], &localhost(), &[], UnixTime::now())
            .unwrap();
        let _: rustls::client::danger::ServerCertVerified = verified;
    }
}
