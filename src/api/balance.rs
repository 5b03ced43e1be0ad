use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::AppState;
use crate::cache::{CachedBalance, FetchError, Source};
use crate::error::{AppError, Result};
use crate::models::{lamports_to_sol, BalanceRecord, BalanceRequest, BalanceResponse, ErrorRecord};
use crate::solana::{BalanceFetcher, Pubkey};

const MAX_WALLETS: usize = 100;

fn dedupe(wallets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(wallets.len());
    wallets
        .into_iter()
        .filter(|wallet| seen.insert(wallet.clone()))
        .collect()
}

struct TaskOutcome {
    wallet: String,
    result: std::result::Result<(CachedBalance, Source), FetchError>,
}

async fn fetch_balance(
    fetcher: Arc<dyn BalanceFetcher>,
    pubkey: Pubkey,
    timeout: Duration,
    wallet: String,
) -> std::result::Result<CachedBalance, FetchError> {
    match tokio::time::timeout(timeout, fetcher.get_balance(&pubkey)).await {
        Ok(Ok((lamports, latency))) => {
            // latency logged on actual fetches only, cache hits never get here
            tracing::info!(
                wallet = %wallet,
                latency_ms = latency.as_millis() as u64,
                "rpc fetch"
            );
            Ok(CachedBalance {
                lamports,
                fetched_at: Utc::now(),
            })
        }
        Ok(Err(err)) => Err(FetchError(err.to_string())),
        Err(_) => Err(FetchError("balance fetch timed out".to_string())),
    }
}

/// POST /api/get-balance. Per-wallet failures never fail the request as a
/// whole; the response is 200 even if every wallet errored.
pub async fn get_balance(
    State(state): State<AppState>,
    body: std::result::Result<Json<BalanceRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>> {
    let Json(request) = body.map_err(|_| AppError::BadRequest("bad request".to_string()))?;
    if request.wallets.is_empty() {
        return Err(AppError::BadRequest("wallets required".to_string()));
    }
    if request.wallets.len() > MAX_WALLETS {
        return Err(AppError::BadRequest("too many wallets".to_string()));
    }

    let wallets = dedupe(request.wallets);
    let mut response = BalanceResponse::default();

    let mut valid = Vec::with_capacity(wallets.len());
    for wallet in wallets {
        match Pubkey::from_base58(&wallet) {
            Some(pubkey) => valid.push((wallet, pubkey)),
            None => response.errors.push(ErrorRecord {
                wallet,
                error: "invalid public key".to_string(),
            }),
        }
    }

    let semaphore = Arc::new(Semaphore::new(state.config.max_concurrency));
    let mut tasks = JoinSet::new();
    for (wallet, pubkey) in valid {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("fan-out semaphore closed".to_string()))?;

        let cache = state.cache.clone();
        let fetcher = Arc::clone(&state.fetcher);
        let timeout = state.config.balance_timeout;
        tasks.spawn(async move {
            let _permit = permit;
            let fetch = fetch_balance(fetcher, pubkey, timeout, wallet.clone());
            let result = cache.get_or_fetch(&wallet, fetch).await;
            TaskOutcome { wallet, result }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "balance task failed to join");
                continue;
            }
        };
        match outcome.result {
            Ok((value, source)) => {
                tracing::debug!(wallet = %outcome.wallet, source = ?source, "balance served");
                response.balances.push(BalanceRecord {
                    wallet: outcome.wallet,
                    lamports: value.lamports,
                    sol: lamports_to_sol(value.lamports),
                    source,
                    fetched_at: value.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                });
            }
            Err(err) => response.errors.push(ErrorRecord {
                wallet: outcome.wallet,
                error: err.to_string(),
            }),
        }
    }

    // deterministic output for clients and tests
    response.balances.sort_by(|a, b| a.wallet.cmp(&b.wallet));
    Ok(Json(response))
}
