use thiserror::Error;

/// Stable envelope code for an unsupported signing method (pairing-protocol
/// `INVALID_METHOD` rejection).
pub const CODE_INVALID_METHOD: i64 = 1001;
/// Stable envelope code for an explicit user rejection (pairing-protocol
/// `USER_REJECTED`).
pub const CODE_USER_REJECTED: i64 = 5000;
/// Stable envelope code for a request against a disconnected/stale session
/// (pairing-protocol `USER_DISCONNECTED`).
pub const CODE_SESSION_GONE: i64 = 6000;

/// Terminal failure for a single signing request.
///
/// Every variant maps to exactly one error envelope. None of these are retried
/// by the gateway; the caller decides whether to re-prompt the user.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Address not found")]
    AddressNotFound,

    #[error("Invalid MFA code")]
    InvalidMfaCode,

    #[error("Invalid method: {0}")]
    UnsupportedMethod(String),

    #[error("User rejected.")]
    UserRejected,

    #[error("No key registered for address {0}")]
    KeyNotFound(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Catch-all for resolver/KMS/provider failures mid-signing. The cause is
    /// preserved for logs; the remote peer only ever sees a generic message.
    #[error("Signing failed")]
    SigningFailed(eyre::Report),
}

impl GatewayError {
    /// Numeric envelope code.
    ///
    /// `INVALID_METHOD` and `USER_REJECTED` use the pairing protocol's
    /// standard rejection codes; network/chain failures reuse the EIP-1193
    /// (4900, disconnected) and EIP-3085 (4902, unrecognized chain) values;
    /// auth/lookup failures sit in a private 41xx range.
    pub const fn code(&self) -> i64 {
        match self {
            Self::UnsupportedMethod(_) => CODE_INVALID_METHOD,
            Self::UserRejected => CODE_USER_REJECTED,
            Self::InvalidMfaCode => 4100,
            Self::AddressNotFound => 4101,
            Self::KeyNotFound(_) => 4102,
            Self::NetworkUnavailable(_) => 4900,
            Self::UnknownChain(_) => 4902,
            Self::SigningFailed(_) => 5500,
        }
    }

    /// Short machine-readable tag, used in audit entries.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::AddressNotFound => "address_not_found",
            Self::InvalidMfaCode => "invalid_mfa_code",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::UserRejected => "user_rejected",
            Self::KeyNotFound(_) => "key_not_found",
            Self::UnknownChain(_) => "unknown_chain",
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::SigningFailed(_) => "signing_failed",
        }
    }

    /// Message safe to return to the remote peer. Internal causes stay in logs.
    pub fn peer_message(&self) -> String {
        match self {
            Self::SigningFailed(_) => "Signing failed".to_owned(),
            Self::AddressNotFound
            | Self::InvalidMfaCode
            | Self::UnsupportedMethod(_)
            | Self::UserRejected
            | Self::KeyNotFound(_)
            | Self::UnknownChain(_)
            | Self::NetworkUnavailable(_) => self.to_string(),
        }
    }
}
