//! Chain-bound signer construction and transaction handling.
//!
//! A signer is built per request: it owns an RPC provider for the resolved
//! chain and a key handle for the resolved address. Construction probes the
//! endpoint once; an unreachable chain fails fast instead of surfacing later
//! as a confusing mid-signing error.

use crate::{
    config::HttpConfig,
    directory::KeyHandle,
    errors::GatewayError,
    kms::KmsClient,
    registry::Endpoint,
};
use alloy::{
    primitives::Address,
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
};
use eyre::Context as _;
use reqwest::Client;
use std::{str::FromStr as _, time::Duration};
use tracing::{debug, warn};

type EvmProvider = RootProvider;

pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    // Conservative fee policy:
    // - priority: max(1.5 gwei, gas_price / 10)
    // - max_fee: base_fee * 2 + priority
    let min_priority: u128 = 1_500_000_000; // 1.5 gwei
    let priority = std::cmp::max(min_priority, gas_price / 10);

    let mut max_fee = base_fee.saturating_mul(2).saturating_add(priority);
    let min_fee = base_fee.saturating_add(priority);
    if max_fee < min_fee {
        max_fee = min_fee;
    }
    (max_fee, priority)
}

/// Apply the "prefer EIP-1559 when supported" fee policy to a transaction.
///
/// Pure helper so fee selection is unit-testable without provider variance.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
) -> TransactionRequest {
    // Explicit caller-set fees always win.
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }

    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

fn provider_for_url(url: &str, http: &HttpConfig) -> eyre::Result<EvmProvider> {
    let u: reqwest::Url = url
        .parse()
        .with_context(|| format!("invalid rpc url: {url}"))?;
    let client = Client::builder()
        .timeout(Duration::from_secs(http.rpc_timeout_seconds))
        .connect_timeout(Duration::from_secs(http.rpc_connect_timeout_seconds))
        .build()
        .context("build rpc http client")?;
    let http = alloy::transports::http::Http::with_client(client, u);
    let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
    Ok(RootProvider::new(rpc_client))
}

/// Signer bound to one chain and one key.
pub struct EvmSigner<'a, K: KmsClient> {
    provider: EvmProvider,
    chain_id: u64,
    address: Address,
    key: KeyHandle,
    kms: &'a K,
}

/// Builds chain-bound signers, probing endpoint liveness on construction.
pub struct SignerFactory {
    http: HttpConfig,
}

impl SignerFactory {
    pub const fn new(http: HttpConfig) -> Self {
        Self { http }
    }

    /// Connect to the endpoint and verify it answers before handing out a
    /// signer. A dead endpoint is dropped immediately, not retried.
    pub async fn create<'a, K: KmsClient>(
        &self,
        endpoint: &Endpoint,
        address: &str,
        key: KeyHandle,
        kms: &'a K,
    ) -> Result<EvmSigner<'a, K>, GatewayError> {
        let address = Address::from_str(address)
            .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("bad address: {e}")))?;
        let provider = provider_for_url(&endpoint.rpc_url, &self.http)
            .map_err(GatewayError::SigningFailed)?;

        if let Err(e) = provider.get_block_number().await {
            warn!(
                chain_id = endpoint.chain_id,
                rpc_url = %endpoint.rpc_url,
                error = %e,
                "rpc liveness probe failed"
            );
            drop(provider);
            return Err(GatewayError::NetworkUnavailable(endpoint.name.clone()));
        }

        debug!(chain_id = endpoint.chain_id, %address, "signer ready");
        Ok(EvmSigner {
            provider,
            chain_id: endpoint.chain_id,
            address,
            key,
            kms,
        })
    }
}

impl<K: KmsClient> EvmSigner<'_, K> {
    pub async fn sign_message(&self, message: &[u8]) -> Result<String, GatewayError> {
        self.kms
            .sign_message(&self.key, message)
            .await
            .map_err(GatewayError::SigningFailed)
    }

    pub async fn sign_typed_data(
        &self,
        payload: &crate::params::TypedDataPayload,
    ) -> Result<String, GatewayError> {
        self.kms
            .sign_typed_data(&self.key, payload)
            .await
            .map_err(GatewayError::SigningFailed)
    }

    /// Fill nonce, fees, and gas from the chain for anything the caller left
    /// unset, then hand the complete request to the signing service.
    async fn populate(&self, mut tx: TransactionRequest) -> eyre::Result<TransactionRequest> {
        tx.chain_id = Some(self.chain_id);
        if tx.from.is_none() {
            tx.from = Some(self.address);
        }

        // Prefer EIP-1559 fees when the chain supports base fees.
        if tx.gas_price.is_none() && tx.max_fee_per_gas.is_none() {
            let base_fee = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Pending)
                .await
                .ok()
                .flatten()
                .and_then(|b| b.header.base_fee_per_gas.map(u128::from));

            let gp = self
                .provider
                .get_gas_price()
                .await
                .context("get gas price")?;
            tx = apply_fee_policy(tx, base_fee, gp);
        }

        if tx.nonce.is_none() {
            let n = self
                .provider
                .get_transaction_count(self.address)
                .pending()
                .await
                .context("get nonce")?;
            tx.nonce = Some(n);
        }

        if tx.gas.is_none() {
            let gas = self
                .provider
                .estimate_gas(tx.clone())
                .await
                .context("estimate gas")?;
            // Small buffer for flaky estimators.
            let gas = gas.saturating_mul(120) / 100;
            tx.gas = Some(gas);
        }

        Ok(tx)
    }

    /// Sign only; returns the raw signed transaction hex without broadcasting.
    pub async fn sign_transaction(&self, tx: TransactionRequest) -> Result<String, GatewayError> {
        let tx = self.populate(tx).await.map_err(GatewayError::SigningFailed)?;
        let raw = self
            .kms
            .sign_transaction(&self.key, &tx)
            .await
            .map_err(GatewayError::SigningFailed)?;
        Ok(format!("0x{}", hex::encode(&raw)))
    }

    /// Sign and broadcast; returns the transaction hash.
    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<String, GatewayError> {
        let tx = self.populate(tx).await.map_err(GatewayError::SigningFailed)?;
        let raw = self
            .kms
            .sign_transaction(&self.key, &tx)
            .await
            .map_err(GatewayError::SigningFailed)?;
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("broadcast: {e}")))?;
        let hash = *pending.tx_hash();
        debug!(chain_id = self.chain_id, tx_hash = %hash, "transaction broadcast");
        Ok(hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_policy_prefers_1559_when_base_fee_present() {
        let base_fee: u128 = 10_000_000_000; // 10 gwei
        let gas_price: u128 = 20_000_000_000; // 20 gwei
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        assert_eq!(priority, 2_000_000_000, "priority = gas_price / 10");
        assert_eq!(max_fee, 22_000_000_000, "max_fee = base_fee*2 + priority");
        assert!(max_fee >= base_fee + priority, "max fee covers inclusion");
    }

    #[test]
    fn fee_policy_floors_priority_at_1_5_gwei() {
        let (_max_fee, priority) = compute_eip1559_fees(1_000_000_000, 2_000_000_000);
        assert_eq!(priority, 1_500_000_000, "priority floor");
    }

    #[test]
    fn apply_fee_policy_sets_eip1559_when_base_fee_present() {
        let tx = TransactionRequest::default();
        let out = apply_fee_policy(tx, Some(10_000_000_000), 20_000_000_000);
        assert!(out.max_fee_per_gas.is_some(), "1559 max fee set");
        assert!(out.max_priority_fee_per_gas.is_some(), "priority set");
        assert!(out.gas_price.is_none(), "no legacy gas price");
    }

    #[test]
    fn apply_fee_policy_sets_legacy_gas_price_when_base_fee_missing() {
        let tx = TransactionRequest::default();
        let out = apply_fee_policy(tx, None, 20_000_000_000);
        assert_eq!(out.gas_price, Some(20_000_000_000), "legacy gas price");
        assert!(out.max_fee_per_gas.is_none(), "no 1559 fields");
    }

    #[test]
    fn apply_fee_policy_keeps_explicit_fees() {
        let mut tx = TransactionRequest::default();
        tx.gas_price = Some(7);
        let out = apply_fee_policy(tx, Some(10_000_000_000), 20_000_000_000);
        assert_eq!(out.gas_price, Some(7), "caller fee untouched");
    }
}
