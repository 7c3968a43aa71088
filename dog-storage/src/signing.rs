//! Signed URL policy and request signing.
//!
//! Everything here is pure: the only input that changes between calls is the
//! injected [`Clock`], so signatures and expiries can be asserted exactly in
//! tests.
//!
//! Request signatures follow the canonical form used by the media backend:
//! empty parameters are dropped, the rest are rendered as `name=value`, sorted,
//! joined with `&`, and the API secret is appended before hashing. The digest
//! is hex encoded.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{BlobError, BlobKey, BlobResult, Clock, Disposition, UrlOptions};

/// Fallback when a content type cannot be classified
pub const DEFAULT_RESOURCE_TYPE: &str = "auto";

/// Hash used for request signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

/// Resource type for a content type: the part before the first `/`.
///
/// `image/png` is `image`; a value without a `/` is returned unchanged and an
/// empty value falls back to [`DEFAULT_RESOURCE_TYPE`].
pub fn resource_type_for(content_type: &str) -> &str {
    let head = match content_type.find('/') {
        Some(idx) => &content_type[..idx],
        None => content_type,
    };
    if head.trim().is_empty() {
        DEFAULT_RESOURCE_TYPE
    } else {
        head
    }
}

/// Canonical string that gets hashed, without the secret
pub fn string_to_sign(params: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Sign `params` with `secret`.
///
/// Fails with `BlobError::Signing` when the secret is missing; a signature is
/// never produced from an empty secret.
pub fn api_sign_request(
    params: &BTreeMap<String, String>,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> BlobResult<String> {
    if secret.is_empty() {
        return Err(BlobError::signing("API secret is not configured"));
    }

    let payload = format!("{}{}", string_to_sign(params), secret);
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => hex::encode(Sha1::digest(payload.as_bytes())),
        SignatureAlgorithm::Sha256 => hex::encode(Sha256::digest(payload.as_bytes())),
    };
    Ok(digest)
}

/// Drop empty params, then add `signature` and `api_key`.
pub fn sign_params(
    params: BTreeMap<String, String>,
    api_key: &str,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> BlobResult<BTreeMap<String, String>> {
    if api_key.is_empty() {
        return Err(BlobError::signing("API key is not configured"));
    }

    let mut signed: BTreeMap<String, String> =
        params.into_iter().filter(|(_, v)| !v.is_empty()).collect();
    let signature = api_sign_request(&signed, secret, algorithm)?;
    signed.insert("signature".to_string(), signature);
    signed.insert("api_key".to_string(), api_key.to_string());
    Ok(signed)
}

/// Check a signature produced by [`api_sign_request`].
///
/// `signature` and `api_key` entries in `params` are ignored.
pub fn verify_signature(
    params: &BTreeMap<String, String>,
    signature: &str,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> BlobResult<bool> {
    let unsigned: BTreeMap<String, String> = params
        .iter()
        .filter(|(name, _)| name.as_str() != "signature" && name.as_str() != "api_key")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let expected = api_sign_request(&unsigned, secret, algorithm)?;

    // Compare every byte so timing does not depend on the mismatch position
    let matches = expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
    Ok(matches)
}

/// Everything a backend needs to sign a download URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlParams {
    pub key: BlobKey,
    pub timestamp: i64,
    pub expires_at: i64,
    pub resource_type: String,
    pub disposition: Disposition,
    pub filename: String,
    pub content_type: String,
}

impl SignedUrlParams {
    pub fn attachment(&self) -> bool {
        self.disposition.is_attachment()
    }

    /// Parameter set covered by the download signature
    pub fn to_params(&self, delivery_type: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("public_id".to_string(), self.key.to_string());
        params.insert("timestamp".to_string(), self.timestamp.to_string());
        params.insert("expires_at".to_string(), self.expires_at.to_string());
        params.insert("type".to_string(), delivery_type.to_string());
        params.insert("attachment".to_string(), self.attachment().to_string());
        params
    }
}

/// Computes expiry and resource type for signed download URLs
#[derive(Clone)]
pub struct SignedUrlPolicy {
    clock: Arc<dyn Clock>,
}

impl SignedUrlPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn resolve(&self, key: &BlobKey, options: &UrlOptions) -> BlobResult<SignedUrlParams> {
        let expires_in = i64::try_from(options.expires_in.as_secs())
            .map_err(|_| BlobError::invalid("expires_in is out of range"))?;
        let now = self.clock.timestamp();
        let expires_at = now
            .checked_add(expires_in)
            .ok_or_else(|| BlobError::invalid("expires_in is out of range"))?;

        let resource_type = match options.resource_type.as_deref() {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => resource_type_for(&options.content_type).to_string(),
        };

        Ok(SignedUrlParams {
            key: key.clone(),
            timestamp: now,
            expires_at,
            resource_type,
            disposition: options.disposition,
            filename: options.filename.clone(),
            content_type: options.content_type.clone(),
        })
    }
}

impl std::fmt::Debug for SignedUrlPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use std::time::Duration;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resource_type_is_segment_before_slash() {
        assert_eq!(resource_type_for("image/png"), "image");
        assert_eq!(resource_type_for("video/mp4; codecs=avc1"), "video");
        assert_eq!(resource_type_for("raw"), "raw");
        assert_eq!(resource_type_for(""), "auto");
    }

    #[test]
    fn canonical_string_drops_empty_and_sorts() {
        let p = params(&[("timestamp", "1315060510"), ("public_id", "sample"), ("eager", "")]);
        assert_eq!(string_to_sign(&p), "public_id=sample&timestamp=1315060510");
    }

    #[test]
    fn signature_matches_published_example() {
        // Reference vector from the backend's signing documentation
        let p = params(&[
            ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop"),
            ("public_id", "sample_image"),
            ("timestamp", "1315060510"),
        ]);
        let signature =
            api_sign_request(&p, "abcd", SignatureAlgorithm::Sha1).unwrap();
        assert_eq!(signature, "bfd09f95f331f558cbd1320e67aa8d488770583e");
    }

    #[test]
    fn sha256_signatures_are_longer() {
        let p = params(&[("public_id", "a"), ("timestamp", "1")]);
        let sha1 = api_sign_request(&p, "s", SignatureAlgorithm::Sha1).unwrap();
        let sha256 = api_sign_request(&p, "s", SignatureAlgorithm::Sha256).unwrap();
        assert_eq!(sha1.len(), 40);
        assert_eq!(sha256.len(), 64);
    }

    #[test]
    fn missing_secret_is_a_signing_error() {
        let p = params(&[("public_id", "a")]);
        let err = api_sign_request(&p, "", SignatureAlgorithm::Sha1).unwrap_err();
        assert!(matches!(err, BlobError::Signing { .. }));

        let err = sign_params(p, "", "secret", SignatureAlgorithm::Sha1).unwrap_err();
        assert!(matches!(err, BlobError::Signing { .. }));
    }

    #[test]
    fn signed_params_verify_and_hide_secret() {
        let p = params(&[("public_id", "a"), ("timestamp", "100")]);
        let signed = sign_params(p, "key-1", "top-secret", SignatureAlgorithm::Sha1).unwrap();

        assert_eq!(signed.get("api_key").map(String::as_str), Some("key-1"));
        assert!(signed.values().all(|v| !v.contains("top-secret")));

        let signature = signed["signature"].clone();
        assert!(verify_signature(&signed, &signature, "top-secret", SignatureAlgorithm::Sha1).unwrap());
        assert!(!verify_signature(&signed, &signature, "other", SignatureAlgorithm::Sha1).unwrap());
    }

    #[test]
    fn policy_expiry_is_now_plus_expires_in() {
        let clock = Arc::new(FixedClock::at(1_700_000_000));
        let policy = SignedUrlPolicy::new(clock);
        let options = UrlOptions::new(
            Duration::from_secs(60),
            Disposition::Attachment,
            "a.png",
            "image/png",
        );

        let resolved = policy.resolve(&BlobKey::from("k"), &options).unwrap();
        assert_eq!(resolved.expires_at, 1_700_000_060);
        assert_eq!(resolved.resource_type, "image");
        assert!(resolved.attachment());

        let p = resolved.to_params("upload");
        assert_eq!(p["attachment"], "true");
        assert_eq!(p["expires_at"], "1700000060");
    }

    #[test]
    fn explicit_resource_type_wins() {
        let policy = SignedUrlPolicy::new(Arc::new(FixedClock::at(0)));
        let options = UrlOptions::new(
            Duration::from_secs(1),
            Disposition::Inline,
            "clip.mov",
            "application/octet-stream",
        )
        .with_resource_type("video");

        let resolved = policy.resolve(&BlobKey::from("k"), &options).unwrap();
        assert_eq!(resolved.resource_type, "video");
        assert!(!resolved.attachment());
    }
}
