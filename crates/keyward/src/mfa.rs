use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Second-factor gate. Both calls hit a remote verification service and must
/// be treated as fallible and slow.
pub trait MfaGate: Send + Sync {
    fn is_enrolled(
        &self,
        identity: &str,
    ) -> impl std::future::Future<Output = eyre::Result<bool>> + Send;

    fn verify(
        &self,
        code: &str,
        identity: &str,
    ) -> impl std::future::Future<Output = eyre::Result<bool>> + Send;
}

/// HTTP client for the MFA verification service.
#[derive(Debug, Clone)]
pub struct HttpMfaGate {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EnrolledResp {
    enrolled: bool,
}

#[derive(Debug, Deserialize)]
struct VerifyResp {
    valid: bool,
}

impl HttpMfaGate {
    pub fn new(base_url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build mfa http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }
}

impl MfaGate for HttpMfaGate {
    async fn is_enrolled(&self, identity: &str) -> eyre::Result<bool> {
        let url = format!("{}/mfa/enrolled", self.base_url);
        let v: EnrolledResp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "identity": identity }))
            .send()
            .await
            .context("mfa enrollment request")?
            .error_for_status()
            .context("mfa enrollment status")?
            .json()
            .await
            .context("mfa enrollment json")?;
        Ok(v.enrolled)
    }

    async fn verify(&self, code: &str, identity: &str) -> eyre::Result<bool> {
        let url = format!("{}/mfa/verify", self.base_url);
        let v: VerifyResp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "identity": identity, "code": code }))
            .send()
            .await
            .context("mfa verify request")?
            .error_for_status()
            .context("mfa verify status")?
            .json()
            .await
            .context("mfa verify json")?;
        Ok(v.valid)
    }
}
