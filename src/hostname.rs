//! Hostname verification policy.
//!
//! This policy is exposed so HTTP adapters built on top of the derived
//! configs can share one hostname rule; it is not part of chain validation,
//! which stays with the trust validators.

use rustls::pki_types::CertificateDer;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// How a requested hostname is matched against a peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameVerificationPolicy {
    /// Match the hostname against the certificate's DNS subject alternative
    /// names, with single-label wildcard support (`*.example.org`).
    #[default]
    SubjectAltNames,

    /// Accept any hostname. For tests and local development only.
    AllowAll,
}

impl HostnameVerificationPolicy {
    /// Whether `hostname` is acceptable for the given peer certificate.
    ///
    /// Unparsable certificates never match under [`Self::SubjectAltNames`].
    pub fn verify(&self, hostname: &str, certificate: &CertificateDer<'_>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::SubjectAltNames => dns_names_of(certificate)
                .iter()
                .any(|name| dns_name_matches(name, hostname)),
        }
    }
}

fn dns_names_of(certificate: &CertificateDer<'_>) -> Vec<String> {
    let Ok((_, parsed)) = X509Certificate::from_der(certificate.as_ref()) else {
        return Vec::new();
    };
    let Ok(Some(san)) = parsed.subject_alternative_name() else {
        return Vec::new();
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_string()),
            _ => None,
        })
        .collect()
}

fn dns_name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let hostname = hostname.to_ascii_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        // The wildcard covers exactly one label.
        match hostname.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        }
    } else {
        pattern == hostname
    }
}
