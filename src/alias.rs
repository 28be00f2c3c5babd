//! Alias derivation for certificates stored in a [`CredentialStore`](crate::CredentialStore).
//!
//! Aliases are derived from the certificate subject so that a store written to
//! disk and inspected by other tooling carries recognizable entry names. The
//! batch operation disambiguates colliding aliases with a bounded numeric
//! suffix.

use crate::prelude::debug;
use rustls::pki_types::CertificateDer;
use std::collections::HashSet;
use x509_parser::prelude::*;

/// Suffix bound for colliding aliases: `name-1` through `name-1000`.
/// Certificates that would need a higher suffix are dropped from the batch.
pub(crate) const DISAMBIGUATION_BOUND: usize = 1000;

/// Alias used when a certificate carries no parseable subject name.
const FALLBACK_ALIAS: &str = "certificate";

/// Derives a lowercase, store-safe alias from the certificate subject.
///
/// Every run of non-alphanumeric characters in the subject distinguished
/// name is replaced by a single hyphen; leading and trailing hyphens are
/// trimmed. Certificates without a parseable X.509 subject fall back to the
/// fixed alias `certificate`.
pub fn generate_alias(certificate: &CertificateDer<'_>) -> String {
    match X509Certificate::from_der(certificate.as_ref()) {
        Ok((_, parsed)) => sanitize(&parsed.subject().to_string()),
        Err(_) => FALLBACK_ALIAS.to_string(),
    }
}

/// Derives aliases for a batch of certificates, disambiguating collisions.
///
/// The first certificate with a given subject gets the bare alias; later
/// colliding ones get `-1`, `-2`, … up to `-1000`. Entries beyond the bound
/// are dropped from the result. This is a documented limitation rather than
/// an error: a store with over a thousand identically-named anchors is not
/// something the disambiguation scheme tries to represent.
pub fn generate_aliases(
    certificates: &[CertificateDer<'static>],
) -> Vec<(String, CertificateDer<'static>)> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut aliases = Vec::with_capacity(certificates.len());

    for certificate in certificates {
        let base = generate_alias(certificate);

        let unique = if taken.contains(&base) {
            (1..=DISAMBIGUATION_BOUND)
                .map(|suffix| format!("{base}-{suffix}"))
                .find(|candidate| !taken.contains(candidate))
        } else {
            Some(base.clone())
        };

        match unique {
            Some(alias) => {
                taken.insert(alias.clone());
                aliases.push((alias, certificate.clone()));
            }
            None => {
                debug!("dropping certificate: no free alias for [{base}] within the suffix bound");
            }
        }
    }

    aliases
}

fn sanitize(subject: &str) -> String {
    let mut alias = String::with_capacity(subject.len());
    let mut previous_was_hyphen = false;

    for character in subject.chars() {
        if character.is_ascii_alphanumeric() {
            alias.extend(character.to_lowercase());
            previous_was_hyphen = false;
        } else if !previous_was_hyphen {
            alias.push('-');
            previous_was_hyphen = true;
        }
    }

    let alias = alias.trim_matches('-').to_string();
    if alias.is_empty() {
        FALLBACK_ALIAS.to_string()
    } else {
        alias
    }
}
