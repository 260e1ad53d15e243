//! Remote signing service adapter. Key material never enters this process;
//! every operation ships the payload to the service named by the key handle
//! and returns the signature it produced.

use crate::{directory::KeyHandle, params::TypedDataPayload};
use alloy::{primitives::Bytes, rpc::types::TransactionRequest};
use eyre::{Context as _, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub trait KmsClient: Send + Sync {
    /// EIP-191 personal-message signature, `0x`-prefixed hex.
    fn sign_message(
        &self,
        key: &KeyHandle,
        message: &[u8],
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// EIP-712 typed-data signature, `0x`-prefixed hex.
    fn sign_typed_data(
        &self,
        key: &KeyHandle,
        payload: &TypedDataPayload,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Fully signed RLP-encoded transaction, ready for broadcast.
    fn sign_transaction(
        &self,
        key: &KeyHandle,
        tx: &TransactionRequest,
    ) -> impl std::future::Future<Output = Result<Bytes>> + Send;
}

#[derive(Debug, Deserialize)]
struct SignatureResp {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct RawTxResp {
    raw_transaction: String,
}

/// HTTP client for the signing service.
#[derive(Debug, Clone)]
pub struct HttpKmsClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKmsClient {
    pub fn new(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .context("build kms http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    fn endpoint(&self, key: &KeyHandle, op: &str) -> String {
        format!("{}/keys/{}/{op}", self.base_url, key.key_id)
    }

    async fn post_for<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("signing service rejected {url}"))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("decode response from {url}"))
    }
}

impl KmsClient for HttpKmsClient {
    async fn sign_message(&self, key: &KeyHandle, message: &[u8]) -> Result<String> {
        let url = self.endpoint(key, "sign-message");
        let body = json!({
            "service": key.service,
            "message": format!("0x{}", hex::encode(message)),
        });
        let resp: SignatureResp = self.post_for(&url, &body).await?;
        Ok(resp.signature)
    }

    async fn sign_typed_data(&self, key: &KeyHandle, payload: &TypedDataPayload) -> Result<String> {
        let url = self.endpoint(key, "sign-typed-data");
        let body = json!({
            "service": key.service,
            "domain": payload.domain,
            "types": payload.types,
            "data": payload.data,
        });
        let resp: SignatureResp = self.post_for(&url, &body).await?;
        Ok(resp.signature)
    }

    async fn sign_transaction(&self, key: &KeyHandle, tx: &TransactionRequest) -> Result<Bytes> {
        let url = self.endpoint(key, "sign-transaction");
        let body = json!({
            "service": key.service,
            "transaction": tx,
        });
        let resp: RawTxResp = self.post_for(&url, &body).await?;
        let h = resp.raw_transaction.trim_start_matches("0x");
        let bytes = hex::decode(h).context("decode raw transaction hex")?;
        Ok(Bytes::from(bytes))
    }
}
