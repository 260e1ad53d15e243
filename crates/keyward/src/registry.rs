use crate::{config::ChainEntry, errors::GatewayError};
use std::collections::BTreeMap;

/// Resolved network endpoint for one chain. Pure data; the provider itself is
/// constructed per request by the signer factory.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
}

/// Pure lookup table from chain identifier to RPC endpoint. No side effects.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, Endpoint>,
}

/// Parse a chain identifier: CAIP-2 (`eip155:1`), hex (`0x1`) or decimal (`1`).
pub fn parse_chain_id(s: &str) -> Option<u64> {
    let t = s.trim();
    let t = t.strip_prefix("eip155:").unwrap_or(t);
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(h, 16).ok();
    }
    t.parse::<u64>().ok()
}

impl ChainRegistry {
    pub fn from_entries(entries: &[ChainEntry]) -> Self {
        let chains = entries
            .iter()
            .map(|e| {
                (
                    e.chain_id,
                    Endpoint {
                        name: e.name.clone(),
                        chain_id: e.chain_id,
                        rpc_url: e.rpc_url.clone(),
                    },
                )
            })
            .collect();
        Self { chains }
    }

    pub fn rpc_for(&self, chain: &str) -> Result<&Endpoint, GatewayError> {
        let id =
            parse_chain_id(chain).ok_or_else(|| GatewayError::UnknownChain(chain.to_owned()))?;
        self.chains
            .get(&id)
            .ok_or_else(|| GatewayError::UnknownChain(chain.to_owned()))
    }
}
