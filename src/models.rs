use serde::{Deserialize, Serialize};

use crate::cache::Source;

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Incoming payload for batch balance lookups.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceRequest {
    #[serde(default)]
    pub wallets: Vec<String>,
}

/// A single wallet balance in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub wallet: String,
    pub lamports: u64,
    pub sol: f64,
    pub source: Source,
    /// RFC3339
    pub fetched_at: String,
}

/// A per-wallet failure that did not fail the request as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub wallet: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balances: Vec<BalanceRecord>,
    pub errors: Vec<ErrorRecord>,
}

/// Converts lamports to SOL, rounded to 9 decimal digits.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    let sol = lamports as f64 / LAMPORTS_PER_SOL;
    (sol * 1e9).round() / 1e9
}
