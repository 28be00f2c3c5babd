#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # composite-tls
//!
//! `composite-tls` composes TLS trust and identity material from multiple
//! sources into single objects [`rustls`] can use, and assembles them into
//! ready-to-use [`rustls::ClientConfig`] / [`rustls::ServerConfig`] values.
//!
//! A TLS config honors one certificate verifier and one certificate resolver.
//! Applications that gather certificates and keys from several places (bundled
//! roots, per-tenant stores, files on disk) therefore need their sources
//! merged before configuration time. This crate provides:
//!
//! * [`CompositeTrustValidator`] — any number of [`TrustValidator`]s behaving
//!   as one: a chain is trusted when any source trusts it, and a rejection
//!   carries every source's reason.
//! * [`CompositeIdentityProvider`] — any number of [`IdentityProvider`]s
//!   behaving as one, with first-answer-wins selection and concatenated
//!   alias enumeration.
//! * [`CredentialStore`] — an aliased container of trust anchors and private
//!   key/chain identities with deduplicating merge operations and PEM
//!   persistence.
//! * [`TlsContext`] — composite material bound to protocol versions, cipher
//!   suites and a crypto provider, from which the rustls configs derive.
//! * [`TlsFactory`] — a facade accumulating all of the above behind one
//!   builder.
//!
//! All cryptography and TLS mechanics are delegated to `rustls`.
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Enabling more than one provider results in a compile-time error.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

mod observability;
mod prelude;

pub mod alias;
mod context;
mod crypto;
mod error;
mod factory;
mod hostname;
mod identity;
mod store;
mod trust;

// Public re-exports
pub use context::{TlsContext, TlsContextBuilder, DEFAULT_PROTOCOL};
pub use crypto::{ProviderSelection, BUILTIN_PROVIDER_NAME};
pub use error::{CompositeValidationError, Error, Result, ValidationError};
pub use factory::{StoreHolder, TlsFactory, TlsFactoryBuilder};
pub use hostname::HostnameVerificationPolicy;
pub use identity::{
    ClientIdentityResolver, CompositeIdentityProvider, CompositeIdentityProviderBuilder,
    IdentityProvider, ServerIdentityResolver, StoreIdentityProvider,
    DEFAULT_IDENTITY_ALGORITHM,
};
pub use store::{CredentialStore, StoreEntry};
pub use trust::{
    CompositeTrustValidator, CompositeTrustValidatorBuilder, InsecureTrustValidator,
    TrustValidator, WebPkiValidator, WEBPKI_ALGORITHM,
};
