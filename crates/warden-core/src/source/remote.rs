use super::LoadOptions;
use crate::error::{Error, Result};
use crate::model::AllowListUser;
use futures::StreamExt;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use std::time::Duration;
use tokio::time::sleep;

/// Fetches the remote rule body over HTTP GET with timeout, bounded
/// body size, and fixed-delay retry (spec.md §4.1). TLS verification is
/// skipped only when explicitly configured via `options.tls_verify`.
/// When an RSA private key is configured, the body is decrypted before
/// being parsed as JSON.
pub async fn load_remote(
    url: &str,
    auth: Option<&str>,
    options: &LoadOptions,
) -> Result<Vec<AllowListUser>> {
    let client = reqwest::Client::builder()
        .timeout(options.http_timeout)
        .danger_accept_invalid_certs(!options.tls_verify)
        .build()
        .map_err(|e| Error::Load(format!("building http client: {e}")))?;

    let mut attempt = 0u32;
    let body = loop {
        match fetch_once(&client, url, auth, options.max_file_size).await {
            Ok(body) => break body,
            Err(err) => {
                attempt += 1;
                if attempt > options.retry_count {
                    return Err(err);
                }
                tracing::warn!(url, attempt, error = %err, "remote fetch failed, retrying");
                sleep(options.retry_delay).await;
            }
        }
    };

    let plaintext = match &options.rsa_private_key_pem {
        Some(pem) => decrypt_rsa_oaep(pem, &body)?,
        None => body,
    };

    serde_json::from_slice(&plaintext).map_err(|e| Error::Load(format!("parse remote body: {e}")))
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    auth: Option<&str>,
    max_body_bytes: u64,
) -> Result<Vec<u8>> {
    let mut request = client.get(url);
    if let Some(auth) = auth {
        request = request.header("Authorization", auth);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Load(format!("fetching {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Load(format!(
            "remote {url} returned status {}",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_body_bytes {
            return Err(Error::Load(format!(
                "remote {url} declared body size {len} exceeds max ({max_body_bytes})"
            )));
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Load(format!("reading remote body: {e}")))?;
        body.extend_from_slice(&chunk);
        if body.len() as u64 > max_body_bytes {
            return Err(Error::Load(format!(
                "remote {url} body exceeds max size ({max_body_bytes})"
            )));
        }
    }

    Ok(body)
}

/// Decrypts an RSA-OAEP(SHA-256) ciphertext loaded from a PEM private
/// key (inline or file-sourced by the caller), grounded in the
/// `Oaep::new::<Sha256>()` + PKCS#8 pattern used for asymmetric crypto
/// elsewhere in the retrieval pack.
fn decrypt_rsa_oaep(private_key_pem: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| Error::Load(format!("invalid RSA private key: {e}")))?;
    let padding = Oaep::new::<Sha256>();
    private_key
        .decrypt(padding, ciphertext)
        .map_err(|e| Error::Load(format!("RSA decryption failed: {e}")))
}
