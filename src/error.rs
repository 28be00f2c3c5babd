/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `composite-tls` at configuration and build time.
///
/// These are all fail-fast errors: they are reported while material is being
/// assembled, never deferred to handshake time. Handshake-time rejection of a
/// peer chain is a [`CompositeValidationError`], not an [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The supplied configuration can never produce usable TLS material.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A credential store could not be loaded, parsed or written.
    #[error("credential store error")]
    StoreLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A trust source contains no trust anchors.
    #[error("the trust source does not contain any trust anchors")]
    EmptyTrustMaterial,

    /// The requested validator or provider algorithm name is not known.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The requested protocol name is not known to the runtime.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The requested crypto provider name is not available in this build.
    #[error("unsupported crypto provider: {0}")]
    UnsupportedProvider(String),

    /// Failed to build a rustls webpki verifier from the given roots.
    #[error("rustls verifier builder error: {0}")]
    VerifierBuilder(String),

    /// A rustls error occurred while assembling a config.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A single validator's reason for rejecting a certificate chain.
///
/// Expected and recoverable. The composite collects one of these per
/// consulted validator when every validator rejects the chain.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The underlying chain verifier rejected the chain.
    #[error("certificate chain rejected: {0}")]
    Rejected(#[from] rustls::Error),

    /// The validator failed for a reason other than chain verification.
    #[error("{0}")]
    Other(String),
}

/// Aggregate failure raised when no composed validator trusts a chain.
///
/// Carries every per-validator cause in validator order so callers can
/// inspect why each individual source rejected the chain.
#[derive(Debug, thiserror::Error)]
#[error("no validator trusts this certificate chain")]
pub struct CompositeValidationError {
    causes: Vec<ValidationError>,
}

impl CompositeValidationError {
    pub(crate) fn new(causes: Vec<ValidationError>) -> Self {
        Self { causes }
    }

    /// The per-validator causes, in the order the validators were consulted.
    pub fn causes(&self) -> &[ValidationError] {
        &self.causes
    }
}
