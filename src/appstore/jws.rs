//! JWS verification for App Store signed payloads.
//!
//! Every payload Apple sends (notification envelopes, transaction info,
//! renewal info, client-submitted receipts) is a compact JWS whose header
//! embeds an x5c certificate chain. Trust is anchored at the Apple Root
//! CA - G3 certificate, pinned by SHA-256 fingerprint and embedded as a
//! constant so it is never fetched at runtime.

use std::sync::OnceLock;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

/// SHA-256 fingerprint of the Apple Root CA - G3 DER encoding.
pub const APPLE_ROOT_CA_G3_FINGERPRINT: &str =
    "63343abfb89a6a03ebb57e9b3f5fa7be7c4f5c756f3017b3a8c488c3653e9179";

/// Apple Root CA - G3 certificate (base64-encoded DER). This is the root
/// that signs all App Store intermediates.
pub const APPLE_ROOT_CA_G3_B64: &str = "\
MIICQzCCAcmgAwIBAgIILcX8iNLFS5UwCgYIKoZIzj0EAwMwZzEbMBkGA1UEAwwS\
QXBwbGUgUm9vdCBDQSAtIEczMSYwJAYDVQQLDB1BcHBsZSBDZXJ0aWZpY2F0aW9u\
IEF1dGhvcml0eTETMBEGA1UECgwKQXBwbGUgSW5jLjELMAkGA1UEBhMCVVMwHhcN\
MTQwNDMwMTgxOTA2WhcNMzkwNDMwMTgxOTA2WjBnMRswGQYDVQQDDBJBcHBsZSBS\
b290IENBIC0gRzMxJjAkBgNVBAsMHUFwcGxlIENlcnRpZmljYXRpb24gQXV0aG9y\
aXR5MRMwEQYDVQQKDApBcHBsZSBJbmMuMQswCQYDVQQGEwJVUzB2MBAGByqGSM49\
AgEGBSuBBAAiA2IABJjpLz1AcqTtkyJygRMc3RCV8cWjTnHcFBbZDuWmBSp3ZHtf\
TjjTuxxEtX/1H7YyYl3J6YRbTzBPEVoA/VhYDKX1DyxNB0cTddqXl5dvMVztK517\
IDvYuVTZXpmkOlEKMaNCMEAwHQYDVR0OBBYEFLuw3qFYM4iapIqZ3r6966/ayySr\
MA8GA1UdEwEB/wQFMAMBAf8wDgYDVR0PAQH/BAQDAgEGMAoGCCqGSM49BAMDA2gA\
MGUCMQCD6cHEFl4aXTQY2e3v9GwOAEZLuN+yRhHFD/3meoyhpmvOwgPUnPWTxnS4\
at+qIxUCMG1mihDK1A3UT82NQz60imOlM27jbdoXt2QfyFMm+YhidDkLF1vLUagM\
6BgD56KyKA==";

/// Typed verification failure. Any failure at any step rejects the whole
/// payload; partial trust is never granted.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("malformed signed payload: {0}")]
    MalformedPayload(String),

    #[error("header missing x5c certificate chain")]
    MissingCertificateChain,

    #[error("disallowed signature algorithm: {0}")]
    DisallowedAlgorithm(String),

    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    #[error("certificate chain not anchored at pinned root: {0}")]
    UntrustedChain(String),

    #[error("leaf certificate expired or not yet valid")]
    CertificateExpired,

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("claims decode error: {0}")]
    Claims(String),
}

#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    x5c: Option<Vec<String>>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Verifier holding the pinned trust root.
///
/// Constructed once per process (see [`TrustVerifier::apple`]) and shared
/// freely: it is immutable and every verification is read-only.
pub struct TrustVerifier {
    root_der: Vec<u8>,
    root_fingerprint: String,
}

impl TrustVerifier {
    /// Build a verifier anchored at the given root certificate (DER).
    pub fn new(root_der: Vec<u8>) -> Result<Self, VerificationError> {
        // Fail fast on an unparseable root rather than at first verify.
        X509Certificate::from_der(&root_der)
            .map_err(|e| VerificationError::CertificateParse(format!("trust root: {e}")))?;
        let root_fingerprint = sha256_hex(&root_der);
        Ok(Self {
            root_der,
            root_fingerprint,
        })
    }

    /// The process-wide verifier pinned to Apple Root CA - G3.
    pub fn apple() -> &'static TrustVerifier {
        static APPLE: OnceLock<TrustVerifier> = OnceLock::new();
        APPLE.get_or_init(|| {
            let der = BASE64
                .decode(APPLE_ROOT_CA_G3_B64)
                .expect("embedded root certificate is valid base64");
            let verifier =
                TrustVerifier::new(der).expect("embedded root certificate is valid DER");
            debug_assert_eq!(verifier.root_fingerprint, APPLE_ROOT_CA_G3_FINGERPRINT);
            verifier
        })
    }

    /// Verify a compact JWS and decode its claims.
    ///
    /// Walks the embedded x5c chain leaf -> root, requires the chain to
    /// terminate at (or chain up to) the pinned root, checks the leaf
    /// validity window, then verifies the ES256 signature over
    /// `header.payload` with the leaf public key.
    pub fn verify<T: DeserializeOwned>(&self, signed_payload: &str) -> Result<T, VerificationError> {
        let parts: Vec<&str> = signed_payload.split('.').collect();
        if parts.len() != 3 {
            return Err(VerificationError::MalformedPayload(format!(
                "expected 3 segments, got {}",
                parts.len()
            )));
        }

        let header_bytes = BASE64_URL
            .decode(parts[0])
            .map_err(|e| VerificationError::MalformedPayload(format!("header: {e}")))?;
        let header: JwsHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| VerificationError::MalformedPayload(format!("header: {e}")))?;

        // Never trust an attacker-chosen algorithm ("none", HS256, ...).
        if header.alg != "ES256" {
            return Err(VerificationError::DisallowedAlgorithm(header.alg));
        }

        let x5c = match header.x5c {
            Some(chain) if !chain.is_empty() => chain,
            _ => return Err(VerificationError::MissingCertificateChain),
        };

        let chain_der: Vec<Vec<u8>> = x5c
            .iter()
            .map(|entry| {
                BASE64
                    .decode(entry)
                    .map_err(|e| VerificationError::CertificateParse(format!("x5c entry: {e}")))
            })
            .collect::<Result<_, _>>()?;

        let certs: Vec<X509Certificate> = chain_der
            .iter()
            .enumerate()
            .map(|(i, der)| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert)
                    .map_err(|e| {
                        VerificationError::CertificateParse(format!("x5c[{i}]: {e}"))
                    })
            })
            .collect::<Result<_, _>>()?;

        self.check_chain_anchor(&chain_der, &certs)?;

        // Each non-root certificate must be signed by its successor.
        for i in 0..certs.len() - 1 {
            certs[i]
                .verify_signature(Some(certs[i + 1].public_key()))
                .map_err(|_| {
                    VerificationError::UntrustedChain(format!(
                        "certificate {i} is not signed by certificate {}",
                        i + 1
                    ))
                })?;
        }

        let leaf = &certs[0];
        if !leaf.validity().is_valid_at(ASN1Time::now()) {
            return Err(VerificationError::CertificateExpired);
        }

        let leaf_key = VerifyingKey::from_sec1_bytes(leaf.public_key().subject_public_key.data.as_ref())
            .map_err(|_| VerificationError::BadSignature("unsupported leaf public key".into()))?;

        let signature_bytes = BASE64_URL
            .decode(parts[2])
            .map_err(|e| VerificationError::MalformedPayload(format!("signature: {e}")))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| VerificationError::BadSignature("invalid signature encoding".into()))?;

        let signing_input = format!("{}.{}", parts[0], parts[1]);
        leaf_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| VerificationError::BadSignature("signature mismatch".into()))?;

        let payload = BASE64_URL
            .decode(parts[1])
            .map_err(|e| VerificationError::MalformedPayload(format!("payload: {e}")))?;
        serde_json::from_slice(&payload).map_err(|e| VerificationError::Claims(e.to_string()))
    }

    /// The chain must terminate at the pinned root (by fingerprint), or its
    /// last certificate must be signed by the pinned root's key.
    fn check_chain_anchor(
        &self,
        chain_der: &[Vec<u8>],
        certs: &[X509Certificate],
    ) -> Result<(), VerificationError> {
        let last_fingerprint = sha256_hex(chain_der.last().expect("chain is non-empty"));
        if last_fingerprint == self.root_fingerprint {
            return Ok(());
        }

        let (_, root) = X509Certificate::from_der(&self.root_der)
            .map_err(|e| VerificationError::CertificateParse(format!("trust root: {e}")))?;
        certs
            .last()
            .expect("chain is non-empty")
            .verify_signature(Some(root.public_key()))
            .map_err(|_| {
                VerificationError::UntrustedChain(format!(
                    "chain root fingerprint {last_fingerprint} does not match pinned root and \
                     is not signed by it"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn fake_jws(header: &Value) -> String {
        let header = BASE64_URL.encode(serde_json::to_vec(header).unwrap());
        let payload = BASE64_URL.encode(b"{}");
        let signature = BASE64_URL.encode([0u8; 64]);
        format!("{header}.{payload}.{signature}")
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let err = TrustVerifier::apple()
            .verify::<Value>("only.two")
            .unwrap_err();
        assert!(matches!(err, VerificationError::MalformedPayload(_)));
    }

    #[test]
    fn rejects_disallowed_algorithm() {
        let jws = fake_jws(&serde_json::json!({ "alg": "none", "x5c": [APPLE_ROOT_CA_G3_B64] }));
        let err = TrustVerifier::apple().verify::<Value>(&jws).unwrap_err();
        assert!(matches!(err, VerificationError::DisallowedAlgorithm(alg) if alg == "none"));
    }

    #[test]
    fn rejects_missing_certificate_chain() {
        let jws = fake_jws(&serde_json::json!({ "alg": "ES256" }));
        let err = TrustVerifier::apple().verify::<Value>(&jws).unwrap_err();
        assert!(matches!(err, VerificationError::MissingCertificateChain));

        let jws = fake_jws(&serde_json::json!({ "alg": "ES256", "x5c": [] }));
        let err = TrustVerifier::apple().verify::<Value>(&jws).unwrap_err();
        assert!(matches!(err, VerificationError::MissingCertificateChain));
    }

    #[test]
    fn rejects_chain_with_wrong_root_fingerprint() {
        // Flip the last byte of the root's DER: the trailing signature bits
        // are opaque to the parser, so the certificate still parses, but its
        // fingerprint no longer matches the pin and the pinned root did not
        // sign it.
        let mut tampered = BASE64.decode(APPLE_ROOT_CA_G3_B64).unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;

        let jws = fake_jws(&serde_json::json!({
            "alg": "ES256",
            "x5c": [BASE64.encode(&tampered)],
        }));
        let err = TrustVerifier::apple().verify::<Value>(&jws).unwrap_err();
        assert!(matches!(err, VerificationError::UntrustedChain(_)));
    }

    #[test]
    fn pinned_root_passes_chain_check_but_not_signature() {
        // A chain consisting of the pinned root itself is anchored, so the
        // failure must come from the payload signature stage, never from
        // chain validation.
        let jws = fake_jws(&serde_json::json!({
            "alg": "ES256",
            "x5c": [APPLE_ROOT_CA_G3_B64],
        }));
        let err = TrustVerifier::apple().verify::<Value>(&jws).unwrap_err();
        assert!(matches!(err, VerificationError::BadSignature(_)));
    }

    #[test]
    fn embedded_root_matches_pinned_fingerprint() {
        let der = BASE64.decode(APPLE_ROOT_CA_G3_B64).unwrap();
        assert_eq!(sha256_hex(&der), APPLE_ROOT_CA_G3_FINGERPRINT);
    }
}
