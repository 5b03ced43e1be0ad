use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_COMMITMENT: &str = "finalized";

/// A 32-byte Solana account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    /// Parses a base58 string; it must decode to exactly 32 bytes.
    pub fn from_base58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Upstream(String),
}

/// Capability seam over the upstream balance source.
#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    /// Returns the balance in lamports and the observed upstream latency.
    async fn get_balance(
        &self,
        pubkey: &Pubkey,
    ) -> std::result::Result<(u64, Duration), RpcError>;
}

/// The only component that talks the upstream wire protocol.
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    commitment: String,
}

impl RpcClient {
    pub fn new(url: String, commitment: String) -> Self {
        let commitment = if commitment.is_empty() {
            DEFAULT_COMMITMENT.to_string()
        } else {
            commitment
        };
        Self {
            http: reqwest::Client::new(),
            url,
            commitment,
        }
    }
}

#[derive(Deserialize)]
struct GetBalanceEnvelope {
    result: Option<BalanceResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct BalanceResult {
    value: u64,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[async_trait]
impl BalanceFetcher for RpcClient {
    async fn get_balance(
        &self,
        pubkey: &Pubkey,
    ) -> std::result::Result<(u64, Duration), RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [pubkey.to_string(), { "commitment": self.commitment }],
        });

        let start = Instant::now();
        let outcome = async {
            let response = self.http.post(&self.url).json(&request).send().await?;
            let envelope: GetBalanceEnvelope = response.json().await?;
            Ok::<_, RpcError>(envelope)
        }
        .await;
        let latency = start.elapsed();

        let envelope = match outcome {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(
                    latency_ms = latency.as_millis() as u64,
                    error = %err,
                    "balance rpc transport error"
                );
                return Err(err);
            }
        };

        if let Some(err) = envelope.error {
            return Err(RpcError::Upstream(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }
        match envelope.result {
            Some(result) => Ok((result.value, latency)),
            None => Err(RpcError::Upstream(
                "missing result in getBalance response".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_program_address_parses() {
        let pk = Pubkey::from_base58("11111111111111111111111111111111").unwrap();
        assert_eq!(pk.to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn known_addresses_round_trip() {
        for addr in [
            "So11111111111111111111111111111111111111112",
            "Vote111111111111111111111111111111111111111",
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
        ] {
            let pk = Pubkey::from_base58(addr).unwrap();
            assert_eq!(pk.to_string(), addr);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Pubkey::from_base58("not-a-key").is_none());
        assert!(Pubkey::from_base58("").is_none());
        // valid base58, wrong length
        assert!(Pubkey::from_base58("abc").is_none());
    }

    #[test]
    fn empty_commitment_defaults_to_finalized() {
        let client = RpcClient::new("http://localhost:8899".to_string(), String::new());
        assert_eq!(client.commitment, "finalized");

        let client = RpcClient::new("http://localhost:8899".to_string(), "confirmed".to_string());
        assert_eq!(client.commitment, "confirmed");
    }
}
