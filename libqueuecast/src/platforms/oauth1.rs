//! OAuth 1.0a request signing (HMAC-SHA1) for the X API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::{distributions::Alphanumeric, Rng};
use secrecy::ExposeSecret;
use sha1::Sha1;

use crate::credentials::XCredentials;
use crate::error::{PlatformError, Result};
use crate::transport::{Body, HttpRequest, Method};

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved characters stay literal; everything else is escaped
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE).to_string()
}

/// Signs requests with user-context OAuth 1.0a credentials
#[derive(Debug)]
pub struct OAuth1Signer {
    credentials: XCredentials,
}

impl OAuth1Signer {
    pub fn new(credentials: XCredentials) -> Self {
        Self { credentials }
    }

    /// Attach an `Authorization` header with a fresh nonce and timestamp.
    ///
    /// Query parameters and form-encoded fields are covered by the
    /// signature; JSON and multipart bodies are not.
    pub fn sign(&self, request: HttpRequest) -> Result<HttpRequest> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.sign_with(request, &nonce, &timestamp)
    }

    pub fn sign_with(&self, request: HttpRequest, nonce: &str, timestamp: &str) -> Result<HttpRequest> {
        let mut params: Vec<(String, String)> = request.query.clone();
        if let Body::Form(fields) = &request.body {
            params.extend(fields.iter().cloned());
        }
        let header = self.authorization(request.method, &request.url, &params, nonce, timestamp)?;
        Ok(request.header("Authorization", header))
    }

    /// `Authorization` header value for a request to `url` (without query
    /// string) carrying `params`
    pub fn authorization(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String> {
        let creds = &self.credentials;
        let oauth_params = [
            ("oauth_consumer_key", creds.consumer_key.expose_secret()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", creds.access_token.expose_secret()),
            ("oauth_version", "1.0"),
        ];

        let mut encoded: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (encode(k), encode(v)))
            .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
            .collect();
        encoded.sort();

        let parameter_string = encoded
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method,
            encode(url),
            encode(&parameter_string)
        );
        let signing_key = format!(
            "{}&{}",
            encode(creds.consumer_secret.expose_secret()),
            encode(creds.access_token_secret.expose_secret())
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes()).map_err(|e| {
            PlatformError::Authentication(format!("Cannot build OAuth signing key: {}", e))
        })?;
        mac.update(base_string.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let mut header_params: Vec<(&str, String)> = oauth_params
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        header_params.push(("oauth_signature", signature));
        header_params.sort_by(|a, b| a.0.cmp(b.0));

        let fields = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn signer() -> OAuth1Signer {
        let s = |v: &str| SecretString::from(v.to_string());
        OAuth1Signer::new(XCredentials {
            consumer_key: s("xvz1evFS4wEEPTGEFPHBog"),
            consumer_secret: s("kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw"),
            access_token: s("370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb"),
            access_token_secret: s("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE"),
        })
    }

    #[test]
    fn test_encode_reserved_characters() {
        assert_eq!(encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
        assert_eq!(encode("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(encode("!"), "%21");
    }

    #[test]
    fn test_signature_matches_published_example() {
        let header = signer().authorization(
            Method::Post,
            "https://api.twitter.com/1.1/statuses/update.json",
            &[
                ("include_entities".to_string(), "true".to_string()),
                (
                    "status".to_string(),
                    "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
                ),
            ],
            "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
            "1318622958",
        )
        .unwrap();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains(r#"oauth_signature="tnnArxj06cWHq44gCs1OSKk%2FjLY%3D""#));
        assert!(header.contains(r#"oauth_consumer_key="xvz1evFS4wEEPTGEFPHBog""#));
        assert!(header.contains(r#"oauth_signature_method="HMAC-SHA1""#));
        assert!(!header.contains("status="));
    }

    #[test]
    fn test_sign_covers_form_fields_but_not_json() {
        let signer = signer();
        let form = signer.sign_with(
            HttpRequest::post("https://upload.example.com/media/upload.json")
                .form(vec![("command".to_string(), "INIT".to_string())]),
            "n",
            "1",
        )
        .unwrap();
        let bare = signer.sign_with(
            HttpRequest::post("https://upload.example.com/media/upload.json"),
            "n",
            "1",
        )
        .unwrap();
        let json = signer.sign_with(
            HttpRequest::post("https://upload.example.com/media/upload.json")
                .json(serde_json::json!({"command": "INIT"})),
            "n",
            "1",
        )
        .unwrap();

        let auth = |r: &HttpRequest| {
            r.headers
                .iter()
                .find(|(k, _)| k == "Authorization")
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_ne!(auth(&form), auth(&bare));
        assert_eq!(auth(&json), auth(&bare));
    }

    #[test]
    fn test_fresh_nonce_per_request() {
        let signer = signer();
        let a = signer.sign(HttpRequest::get("https://api.example.com/2/tweets")).unwrap();
        let b = signer.sign(HttpRequest::get("https://api.example.com/2/tweets")).unwrap();
        assert_ne!(a.headers, b.headers);
    }

    #[test]
    fn test_empty_secrets_still_produce_signature() {
        let s = |v: &str| SecretString::from(v.to_string());
        let signer = OAuth1Signer::new(XCredentials {
            consumer_key: s("ck"),
            consumer_secret: s(""),
            access_token: s("at"),
            access_token_secret: s(""),
        });
        let header = signer
            .authorization(Method::Get, "https://api.example.com/2/tweets", &[], "n", "1")
            .unwrap();

        let signature = header
            .split(", ")
            .find_map(|field| field.strip_prefix("oauth_signature=\""))
            .map(|v| v.trim_end_matches('"'))
            .unwrap();
        assert!(!signature.is_empty());
    }
}
