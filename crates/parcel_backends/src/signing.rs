use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

const KEY_CONTEXT: &str = "parcel-drop 2026-10 presigned object url v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("download link has expired")]
    Expired,
    #[error("download link signature is invalid")]
    Mismatch,
}

/// Mints and checks time-limited download URLs of the form
/// `{base}/objects/{locator}?expires={unix}&signature={mac}`.
///
/// The MAC is a BLAKE3 keyed hash over `"{locator}\n{expires}"`.
#[derive(Clone)]
pub struct UrlSigner {
    key: [u8; 32],
    base_url: Url,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: &str, base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn presign(&self, locator: &str, ttl: Duration, now: DateTime<Utc>) -> String {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = now.timestamp().saturating_add(ttl_secs);
        let signature = self.sign(locator, expires);

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("objects")
                .extend(locator.split('/'));
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        url.into()
    }

    pub fn verify(
        &self,
        locator: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .ok()
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
            .map(blake3::Hash::from)
            .ok_or(SignatureError::Mismatch)?;

        // blake3::Hash equality is constant time.
        if provided != self.mac(locator, expires) {
            return Err(SignatureError::Mismatch);
        }
        if now.timestamp() > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }

    fn sign(&self, locator: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(locator, expires).as_bytes())
    }

    fn mac(&self, locator: &str, expires: i64) -> blake3::Hash {
        let message = format!("{locator}\n{expires}");
        blake3::keyed_hash(&self.key, message.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret", "http://127.0.0.1:8080").unwrap()
    }

    fn query_value(url: &Url, key: &str) -> String {
        url.query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[test]
    fn presigned_url_round_trips() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let signer = signer();
        let raw = signer.presign("file-trans/files/1_a b.txt", Duration::from_secs(900), now);
        let url = Url::parse(&raw).unwrap();

        assert_eq!(url.path(), "/objects/file-trans/files/1_a%20b.txt");
        let expires: i64 = query_value(&url, "expires").parse().unwrap();
        assert_eq!(expires, now.timestamp() + 900);

        let signature = query_value(&url, "signature");
        assert_eq!(
            signer.verify("file-trans/files/1_a b.txt", expires, &signature, now),
            Ok(())
        );
    }

    #[test]
    fn rejects_expired_and_tampered_links() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let signer = signer();
        let expires = now.timestamp() + 60;
        let signature = signer.sign("bucket/key", expires);

        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            signer.verify("bucket/key", expires, &signature, later),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            signer.verify("bucket/other", expires, &signature, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("bucket/key", expires + 1, &signature, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("bucket/key", expires, "not-base64!", now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn different_secrets_do_not_verify() {
        let now = Utc::now();
        let expires = now.timestamp() + 60;
        let signature = signer().sign("bucket/key", expires);
        let other = UrlSigner::new("other-secret", "http://127.0.0.1:8080").unwrap();
        assert_eq!(
            other.verify("bucket/key", expires, &signature, now),
            Err(SignatureError::Mismatch)
        );
    }
}
