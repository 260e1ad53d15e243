use serde::{Deserialize, Serialize};

/// One registry entry: a chain the gateway is willing to sign and broadcast
/// for. Anything not listed here is rejected as an unknown chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Human-readable network name ("ethereum", "sepolia", ...).
    pub name: String,
    /// Numeric EIP155 chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout for chain RPC and collaborator calls (seconds).
    pub rpc_timeout_seconds: u64,
    /// Connect timeout for chain RPC providers (seconds).
    pub rpc_connect_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_seconds: 20,
            rpc_connect_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Base URL of the remote key-management service. Keys never leave it;
    /// the gateway only submits digests/payloads for signing.
    ///
    /// Must be `https`, except `http://localhost` / `http://127.0.0.1` for
    /// local testing.
    pub base_url: String,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://kms.invalid".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MfaConfig {
    /// Base URL of the MFA verification service.
    pub base_url: String,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mfa.invalid".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Identity of the custodial user this gateway instance signs for.
    /// Key handles and MFA enrollment are resolved against this identity.
    pub username: String,
    pub chains: Vec<ChainEntry>,
    pub http: HttpConfig,
    pub kms: KmsConfig,
    pub mfa: MfaConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            username: "default".into(),
            chains: vec![
                ChainEntry {
                    name: "ethereum".into(),
                    chain_id: 1,
                    rpc_url: "https://cloudflare-eth.com".into(),
                },
                ChainEntry {
                    name: "sepolia".into(),
                    chain_id: 11_155_111,
                    rpc_url: "https://rpc.sepolia.org".into(),
                },
            ],
            http: HttpConfig::default(),
            kms: KmsConfig::default(),
            mfa: MfaConfig::default(),
        }
    }
}
