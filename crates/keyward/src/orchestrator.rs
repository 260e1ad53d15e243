//! Request orchestration: one approved session request in, one response
//! envelope out.
//!
//! Checks run in a fixed order so peers see deterministic errors: method
//! classification, address resolution, second factor, chain lookup, key
//! resolution, then signer construction and dispatch. The first failing
//! check wins and nothing past it runs.

use crate::{
    directory::{KeyResolver, UserDirectory},
    envelope::{self, ResponseEnvelope},
    errors::GatewayError,
    kms::KmsClient,
    mfa::MfaGate,
    params::{self, SigningMethod},
    registry::ChainRegistry,
    signer::SignerFactory,
};
use serde_json::Value;
use tracing::{info, warn};

/// One approved request, as handed over by the session manager together with
/// the approving operator's second-factor code (if any).
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub id: u64,
    pub topic: String,
    pub chain: String,
    pub method: String,
    pub params: Value,
    /// Session-permitted accounts, possibly CAIP-10 namespaced.
    pub accounts: Vec<String>,
    pub mfa_code: Option<String>,
}

pub struct Orchestrator<D, M, K> {
    username: String,
    resolver: KeyResolver<D>,
    mfa: M,
    kms: K,
    factory: SignerFactory,
    registry: ChainRegistry,
}

impl<D: UserDirectory, M: MfaGate, K: KmsClient> Orchestrator<D, M, K> {
    pub const fn new(
        username: String,
        resolver: KeyResolver<D>,
        mfa: M,
        kms: K,
        factory: SignerFactory,
        registry: ChainRegistry,
    ) -> Self {
        Self {
            username,
            resolver,
            mfa,
            kms,
            factory,
            registry,
        }
    }

    /// Run an approved request to completion. Always produces an envelope
    /// carrying the request's own id; failures become error envelopes and the
    /// underlying cause stays in the logs.
    pub async fn approve(&self, req: &SignRequest) -> ResponseEnvelope {
        match self.process(req).await {
            Ok(result) => {
                info!(
                    target: "keyward::sign",
                    topic = %req.topic,
                    request_id = req.id,
                    method = %req.method,
                    chain = %req.chain,
                    "request signed"
                );
                envelope::ok(req.id, result)
            }
            Err(e) => {
                warn!(
                    target: "keyward::sign",
                    topic = %req.topic,
                    request_id = req.id,
                    method = %req.method,
                    chain = %req.chain,
                    error = %e,
                    error_tag = e.tag(),
                    code = e.code(),
                    "request failed"
                );
                if let GatewayError::SigningFailed(cause) = &e {
                    warn!(target: "keyward::sign", request_id = req.id, cause = ?cause, "signing failure cause");
                }
                envelope::from_error(req.id, &e)
            }
        }
    }

    /// Envelope for an operator rejection.
    pub fn reject(&self, req: &SignRequest) -> ResponseEnvelope {
        info!(
            target: "keyward::sign",
            topic = %req.topic,
            request_id = req.id,
            method = %req.method,
            "request rejected by operator"
        );
        envelope::from_error(req.id, &GatewayError::UserRejected)
    }

    async fn process(&self, req: &SignRequest) -> Result<Value, GatewayError> {
        let method = SigningMethod::from_wire(&req.method)
            .ok_or_else(|| GatewayError::UnsupportedMethod(req.method.clone()))?;

        let address = params::address_from_params(&req.accounts, &req.params)?;

        self.enforce_second_factor(req.mfa_code.as_deref()).await?;

        // Chain lookup precedes key resolution and any network traffic, so an
        // unregistered chain is reported as exactly that.
        let endpoint = self.registry.rpc_for(&req.chain)?;
        let key = self.resolver.resolve(&self.username, &address)?;
        let signer = self.factory.create(endpoint, &address, key, &self.kms).await?;

        let result = match method {
            SigningMethod::PersonalSign | SigningMethod::EthSign => {
                let message = params::sign_message_bytes(&req.params)?;
                signer.sign_message(&message).await?
            }
            SigningMethod::SignTypedData
            | SigningMethod::SignTypedDataV3
            | SigningMethod::SignTypedDataV4 => {
                let payload = params::typed_data(&req.params)?;
                signer.sign_typed_data(&payload).await?
            }
            SigningMethod::SendTransaction => {
                let tx = params::transaction(&req.params)?.into_request()?;
                signer.send_transaction(tx).await?
            }
            SigningMethod::SignTransaction => {
                let tx = params::transaction(&req.params)?.into_request()?;
                signer.sign_transaction(tx).await?
            }
        };
        Ok(Value::String(result))
    }

    /// Enrolled identities must present a valid code with the approval.
    /// Unenrolled identities pass through.
    async fn enforce_second_factor(&self, code: Option<&str>) -> Result<(), GatewayError> {
        let enrolled = self
            .mfa
            .is_enrolled(&self.username)
            .await
            .map_err(GatewayError::SigningFailed)?;
        if !enrolled {
            return Ok(());
        }
        let code = code.unwrap_or("");
        let valid = self
            .mfa
            .verify(code, &self.username)
            .await
            .map_err(GatewayError::SigningFailed)?;
        if valid {
            Ok(())
        } else {
            Err(GatewayError::InvalidMfaCode)
        }
    }
}
