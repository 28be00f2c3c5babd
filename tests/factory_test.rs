//! End-to-end tests: credential stores through the factory down to rustls
//! configs.

use composite_tls::{
    CompositeValidationError, CredentialStore, Error, HostnameVerificationPolicy, TlsFactory,
};
use once_cell::sync::Lazy;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

static ROOT_A: Lazy<CertificateDer<'static>> = Lazy::new(|| {
    CertificateDer::from(include_bytes!("fixtures/root_a.der").to_vec())
});

static ROOT_B: Lazy<CertificateDer<'static>> = Lazy::new(|| {
    CertificateDer::from(include_bytes!("fixtures/root_b.der").to_vec())
});

static LEAF: Lazy<CertificateDer<'static>> = Lazy::new(|| {
    CertificateDer::from(include_bytes!("fixtures/leaf.der").to_vec())
});

fn leaf_key() -> PrivateKeyDer<'static> {
    PrivateKeyDer::from(PrivatePkcs8KeyDer::from(
        include_bytes!("fixtures/leaf.key.pkcs8").to_vec(),
    ))
}

fn localhost() -> ServerName<'static> {
    ServerName::try_from("localhost").unwrap()
}

#[test]
fn single_root_factory_reports_exactly_that_root_as_accepted_issuer() {
    let store = CredentialStore::trust_store_from(vec![ROOT_A.clone()]).unwrap();
    let factory = TlsFactory::builder().with_trust_store(store).build().unwrap();

    let issuers = factory.trusted_certificates();
    assert_eq!(issuers.len(), 1);
    assert_eq!(issuers[0], *ROOT_A);

    let context_issuers = factory
        .context()
        .trust_validator()
        .unwrap()
        .accepted_issuers();
    assert_eq!(context_issuers, issuers);
}

#[test]
fn factory_builds_working_client_and_server_configs() {
    let trust_store = CredentialStore::trust_store_from(vec![ROOT_A.clone()]).unwrap();
    let identity_store =
        CredentialStore::identity_store_from(leaf_key(), vec![LEAF.clone()], None).unwrap();

    let factory = TlsFactory::builder()
        .with_trust_store(trust_store)
        .with_identity_store(identity_store)
        .build()
        .unwrap();

    let client = factory.client_config().unwrap();
    assert!(client.client_auth_cert_resolver.has_certs());

    factory.server_config().unwrap();

    // The composite behind the configs accepts the fixture chain.
    factory
        .trust_validator()
        .unwrap()
        .check_server_trusted(&LEAF, &[], &localhost(), UnixTime::now())
        .unwrap();
}

#[test]
fn a_rejection_reports_one_cause_per_trust_source() {
    let store_a = CredentialStore::trust_store_from(vec![ROOT_B.clone()]).unwrap();
    let store_b = CredentialStore::trust_store_from(vec![ROOT_B.clone()]).unwrap();

    let factory = TlsFactory::builder()
        .with_trust_store(store_a)
        .with_trust_store(store_b)
        .build()
        .unwrap();

    let err: CompositeValidationError = factory
        .trust_validator()
        .unwrap()
        .check_server_trusted(&LEAF, &[], &localhost(), UnixTime::now())
        .unwrap_err();

    assert_eq!(err.to_string(), "no validator trusts this certificate chain");
    assert_eq!(err.causes().len(), 2);
}

#[test]
fn stores_survive_a_pem_round_trip_through_the_factory() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("truststore.pem");

    let store = CredentialStore::trust_store_from(vec![ROOT_A.clone(), ROOT_B.clone()]).unwrap();
    store.write(&path).unwrap();

    let reloaded = CredentialStore::load(&path).unwrap();
    assert_eq!(reloaded.len(), store.len());

    let factory = TlsFactory::builder()
        .with_trust_store(reloaded)
        .build()
        .unwrap();
    assert_eq!(factory.trusted_certificates().len(), 2);
}

#[test]
fn factory_without_material_fails_fast() {
    let err = TlsFactory::builder()
        .with_hostname_verification(HostnameVerificationPolicy::AllowAll)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}
