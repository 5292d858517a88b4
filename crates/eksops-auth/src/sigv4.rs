//! AWS Signature Version 4 query-string presigning
//!
//! Only the subset needed for bearer tokens is implemented: a `GET` with an
//! empty body, signed entirely in the query string. Nothing here touches the
//! network; the signature is computed locally from the credentials.

use aws_lc_rs::{digest, hmac};
use chrono::{DateTime, Utc};

/// Signing algorithm identifier
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Terminator of every credential scope
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// Derive the SigV4 signing key for a date/region/service scope
pub fn signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_access_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

/// Credentials and scope for presigning
#[derive(Debug, Clone, Copy)]
pub struct Presigner<'a> {
    /// Access key id
    pub access_key_id: &'a str,
    /// Secret access key
    pub secret_access_key: &'a str,
    /// Session token for temporary credentials
    pub session_token: Option<&'a str>,
    /// Signing region
    pub region: &'a str,
    /// Signing service name (e.g. `sts`)
    pub service: &'a str,
}

impl Presigner<'_> {
    /// Presign an HTTPS `GET https://{host}/?{params}`
    ///
    /// `headers` are added to the signed headers alongside `host`; the caller
    /// must send them with the request. Returns the full URL including
    /// `X-Amz-Signature`.
    pub fn presign_get(
        &self,
        host: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        expires_in_secs: u64,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/{}", date, self.region, self.service, SCOPE_TERMINATOR);

        let mut canonical_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        canonical_headers.push(("host".to_string(), host.to_string()));
        canonical_headers.sort();
        let signed_headers = canonical_headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let credential = format!("{}/{}", self.access_key_id, scope);
        let expires = expires_in_secs.to_string();
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        query.push(("X-Amz-Algorithm".into(), ALGORITHM.into()));
        query.push(("X-Amz-Credential".into(), credential));
        query.push(("X-Amz-Date".into(), amz_date.clone()));
        query.push(("X-Amz-Expires".into(), expires));
        query.push(("X-Amz-SignedHeaders".into(), signed_headers.clone()));
        if let Some(token) = self.session_token {
            query.push(("X-Amz-Security-Token".into(), token.to_string()));
        }
        let canonical_query = canonical_query_string(&query);

        let header_block: String = canonical_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n/\n{}\n{}\n{}\n{}",
            canonical_query,
            header_block,
            signed_headers,
            sha256_hex(b"")
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let key = signing_key(self.secret_access_key, &date, self.region, self.service);
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        format!(
            "https://{}/?{}&X-Amz-Signature={}",
            host, canonical_query, signature
        )
    }
}

/// RFC 3986-encode and sort query parameters by key, then value
fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
