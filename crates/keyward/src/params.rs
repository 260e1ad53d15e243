//! Typed views over the pairing protocol's loosely-shaped request parameters.
//!
//! Every extraction happens at the classification boundary so shape problems
//! surface as early, specific errors instead of failing deep inside signing.

use crate::errors::GatewayError;
use alloy::{
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr as _;

/// Signing methods handled by the gateway, with their stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMethod {
    PersonalSign,
    EthSign,
    SignTypedData,
    SignTypedDataV3,
    SignTypedDataV4,
    SendTransaction,
    SignTransaction,
}

impl SigningMethod {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "personal_sign" => Some(Self::PersonalSign),
            "eth_sign" => Some(Self::EthSign),
            "eth_signTypedData" => Some(Self::SignTypedData),
            "eth_signTypedData_v3" => Some(Self::SignTypedDataV3),
            "eth_signTypedData_v4" => Some(Self::SignTypedDataV4),
            "eth_sendTransaction" => Some(Self::SendTransaction),
            "eth_signTransaction" => Some(Self::SignTransaction),
            _ => None,
        }
    }

}

/// `0x` + 40 hex chars.
pub fn is_evm_address(s: &str) -> bool {
    let Some(h) = s.strip_prefix("0x") else {
        return false;
    };
    h.len() == 40 && h.bytes().all(|b| b.is_ascii_hexdigit())
}

fn strip_account_prefix(account: &str) -> &str {
    // Accounts may arrive namespaced: "eip155:1:0xabc...".
    account.rsplit(':').next().unwrap_or(account)
}

/// Derive the signing address: the first session account that appears
/// anywhere in the request parameters (case-insensitive).
pub fn address_from_params(accounts: &[String], params: &Value) -> Result<String, GatewayError> {
    let haystack = params.to_string().to_lowercase();
    accounts
        .iter()
        .map(|a| strip_account_prefix(a))
        .find(|addr| haystack.contains(&addr.to_lowercase()))
        .map(str::to_owned)
        .ok_or(GatewayError::AddressNotFound)
}

/// Extract the message to sign for `personal_sign`/`eth_sign`.
///
/// The two methods order `[message, address]` differently, so we take the
/// first array element that is not an address. Hex payloads are decoded;
/// anything else is signed as raw UTF-8.
pub fn sign_message_bytes(params: &Value) -> Result<Vec<u8>, GatewayError> {
    let arr = params.as_array().ok_or(GatewayError::AddressNotFound)?;
    let msg = arr
        .iter()
        .filter_map(Value::as_str)
        .find(|s| !is_evm_address(s))
        .ok_or(GatewayError::AddressNotFound)?;

    if let Some(h) = msg.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(h) {
            return Ok(bytes);
        }
    }
    Ok(msg.as_bytes().to_vec())
}

/// EIP-712 payload as forwarded to the remote signer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypedDataPayload {
    pub domain: Value,
    pub types: serde_json::Map<String, Value>,
    #[serde(rename = "data", alias = "message")]
    pub data: Value,
}

/// Extract `{domain, types, message}` for the typed-data methods.
///
/// The `EIP712Domain` entry is stripped from `types`: remote signers derive it
/// from `domain` and reject the duplicate.
pub fn typed_data(params: &Value) -> Result<TypedDataPayload, GatewayError> {
    let arr = params.as_array().ok_or(GatewayError::AddressNotFound)?;
    let raw = arr
        .iter()
        .find(|v| !v.as_str().is_some_and(is_evm_address))
        .ok_or(GatewayError::AddressNotFound)?;

    // Typed data arrives either as a JSON object or as a JSON-encoded string.
    let obj: Value = match raw {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("typed data parse: {e}")))?,
        other => other.clone(),
    };

    let mut payload: TypedDataPayload = serde_json::from_value(obj)
        .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("typed data shape: {e}")))?;
    payload.types.remove("EIP712Domain");
    Ok(payload)
}

/// Transaction object as sent by dApps: quantities are 0x-hex strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    #[serde(alias = "input")]
    pub data: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: Option<String>,
    pub chain_id: Option<String>,
}

fn quantity_u256(s: &str) -> Result<U256, GatewayError> {
    let t = s.trim();
    let parsed = t.strip_prefix("0x").map_or_else(
        || U256::from_str(t),
        |h| U256::from_str_radix(h, 16),
    );
    parsed.map_err(|e| GatewayError::SigningFailed(eyre::eyre!("bad quantity {t:?}: {e}")))
}

fn quantity_u64(s: &str) -> Result<u64, GatewayError> {
    let v = quantity_u256(s)?;
    u64::try_from(v).map_err(|_| GatewayError::SigningFailed(eyre::eyre!("quantity overflows u64")))
}

fn quantity_u128(s: &str) -> Result<u128, GatewayError> {
    let v = quantity_u256(s)?;
    u128::try_from(v)
        .map_err(|_| GatewayError::SigningFailed(eyre::eyre!("quantity overflows u128")))
}

fn parse_address(s: &str) -> Result<Address, GatewayError> {
    Address::from_str(s.trim())
        .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("bad address {s:?}: {e}")))
}

/// First element of the params array, parsed as a transaction object.
pub fn transaction(params: &Value) -> Result<TransactionParams, GatewayError> {
    let first = params
        .as_array()
        .and_then(|a| a.first())
        .ok_or(GatewayError::AddressNotFound)?;
    serde_json::from_value(first.clone())
        .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("transaction shape: {e}")))
}

impl TransactionParams {
    /// Build an alloy request from the wire shape. Missing fields stay unset;
    /// the signer populates nonce/fees/gas from the provider.
    pub fn into_request(self) -> Result<TransactionRequest, GatewayError> {
        let mut tx = TransactionRequest::default();
        if let Some(from) = self.from.as_deref() {
            tx = tx.with_from(parse_address(from)?);
        }
        if let Some(to) = self.to.as_deref() {
            tx = tx.with_to(parse_address(to)?);
        }
        if let Some(value) = self.value.as_deref() {
            tx = tx.with_value(quantity_u256(value)?);
        }
        if let Some(data) = self.data.as_deref() {
            let h = data.strip_prefix("0x").unwrap_or(data);
            let bytes = hex::decode(h)
                .map_err(|e| GatewayError::SigningFailed(eyre::eyre!("bad calldata: {e}")))?;
            tx = tx.with_input(Bytes::from(bytes));
        }
        if let Some(gas) = self.gas.as_deref() {
            tx = tx.with_gas_limit(quantity_u64(gas)?);
        }
        if let Some(gp) = self.gas_price.as_deref() {
            tx = tx.with_gas_price(quantity_u128(gp)?);
        }
        if let Some(mf) = self.max_fee_per_gas.as_deref() {
            tx = tx.with_max_fee_per_gas(quantity_u128(mf)?);
        }
        if let Some(mp) = self.max_priority_fee_per_gas.as_deref() {
            tx = tx.with_max_priority_fee_per_gas(quantity_u128(mp)?);
        }
        if let Some(nonce) = self.nonce.as_deref() {
            tx = tx.with_nonce(quantity_u64(nonce)?);
        }
        if let Some(chain) = self.chain_id.as_deref() {
            tx = tx.with_chain_id(quantity_u64(chain)?);
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR: &str = "0xdead00000000000000000000000000000000beef";

    #[test]
    fn personal_sign_message_precedes_address() -> eyre::Result<()> {
        // personal_sign orders [message, address]; eth_sign the reverse.
        let hex_hello = format!("0x{}", hex::encode("hello"));
        let personal = json!([hex_hello, ADDR]);
        let eth_sign = json!([ADDR, hex_hello]);
        for p in [personal, eth_sign] {
            let bytes = sign_message_bytes(&p).map_err(|e| eyre::eyre!("{e}"))?;
            assert_eq!(bytes, b"hello", "decoded message");
        }
        Ok(())
    }

    #[test]
    fn non_hex_message_is_signed_raw() -> eyre::Result<()> {
        let p = json!(["plain text", ADDR]);
        let bytes = sign_message_bytes(&p).map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(bytes, b"plain text", "raw bytes");
        Ok(())
    }

    #[test]
    fn address_lookup_is_case_insensitive() -> eyre::Result<()> {
        let accounts = vec![format!("eip155:1:{}", ADDR.to_uppercase().replace("0X", "0x"))];
        let p = json!(["0x68656c6c6f", ADDR]);
        let got = address_from_params(&accounts, &p).map_err(|e| eyre::eyre!("{e}"))?;
        assert!(got.eq_ignore_ascii_case(ADDR), "matched account address");
        Ok(())
    }

    #[test]
    fn unrelated_params_yield_address_not_found() {
        let accounts = vec![ADDR.to_owned()];
        let p = json!(["0x68656c6c6f", "0x1111000000000000000000000000000000001111"]);
        assert!(
            matches!(
                address_from_params(&accounts, &p),
                Err(GatewayError::AddressNotFound)
            ),
            "no permitted address in params"
        );
    }

    #[test]
    fn typed_data_strips_eip712_domain_entry() -> eyre::Result<()> {
        let p = json!([
            ADDR,
            {
                "domain": { "name": "App", "chainId": 1 },
                "types": {
                    "EIP712Domain": [{ "name": "name", "type": "string" }],
                    "Mail": [{ "name": "contents", "type": "string" }]
                },
                "message": { "contents": "hi" }
            }
        ]);
        let td = typed_data(&p).map_err(|e| eyre::eyre!("{e}"))?;
        assert!(
            !td.types.contains_key("EIP712Domain"),
            "EIP712Domain must be stripped before signing"
        );
        assert!(td.types.contains_key("Mail"), "other types kept");
        Ok(())
    }

    #[test]
    fn typed_data_accepts_json_encoded_string() -> eyre::Result<()> {
        let inner = json!({
            "domain": {},
            "types": { "EIP712Domain": [], "T": [] },
            "message": {}
        })
        .to_string();
        let p = json!([ADDR, inner]);
        let td = typed_data(&p).map_err(|e| eyre::eyre!("{e}"))?;
        assert!(!td.types.contains_key("EIP712Domain"), "stripped");
        Ok(())
    }

    #[test]
    fn transaction_quantities_parse_hex_and_decimal() -> eyre::Result<()> {
        let p = json!([{
            "from": ADDR,
            "to": "0x1111000000000000000000000000000000001111",
            "value": "0xde0b6b3a7640000",
            "gas": "21000",
            "nonce": "0x5",
            "data": "0xdeadbeef"
        }]);
        let tp = transaction(&p).map_err(|e| eyre::eyre!("{e}"))?;
        let tx = tp.into_request().map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(
            tx.value,
            Some(U256::from(1_000_000_000_000_000_000_u128)),
            "value"
        );
        assert_eq!(tx.gas, Some(21_000), "gas limit");
        assert_eq!(tx.nonce, Some(5), "nonce");
        Ok(())
    }

    #[test]
    fn unknown_methods_do_not_classify() {
        assert!(SigningMethod::from_wire("foo_bar").is_none(), "foo_bar");
        assert_eq!(
            SigningMethod::from_wire("eth_signTypedData_v4"),
            Some(SigningMethod::SignTypedDataV4),
            "v4 wire value"
        );
    }
}
