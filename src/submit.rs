/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{sync::Arc, time::Duration};

use ethers::{
    abi::{Abi, Token},
    providers::{Middleware, MiddlewareError},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, TransactionReceipt,
        TransactionRequest, H256, U256,
    },
};
use log::{debug, info, warn};
use tokio::time::{sleep, timeout};

use crate::{
    tx::{build_call, NonceTracker, SignedTransaction, TxParams},
    Error, Result,
};

/// Upper bound for the delay between two send attempts
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Knobs for transaction submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitConfig {
    /// How long to wait for inclusion (and confirmations) before giving up
    pub timeout: Duration,
    /// Receipt and block polling interval
    pub poll_interval: Duration,
    /// Number of confirmations reported by [`Submitter::submit_observed`]
    pub confirmations: u64,
    /// Retries of the raw send on transport failures
    pub retries: u32,
    /// Delay before the first retry, doubled on every further one
    pub backoff: Duration,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            confirmations: 1,
            retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Delay before retry number `attempt` (zero-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// The network's record of an included transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    /// Present if and only if the transaction created a contract
    pub contract_address: Option<Address>,
    pub status: bool,
    pub gas_used: Option<U256>,
}

impl Receipt {
    pub(crate) fn from_ethers(receipt: &TransactionReceipt, creation: bool) -> Result<Self> {
        let block_number = receipt
            .block_number
            .ok_or_else(|| Error::Submission("receipt without block number".to_string()))?
            .as_u64();

        let contract_address = match (creation, receipt.contract_address) {
            (true, Some(address)) => Some(address),
            (true, None) => {
                return Err(Error::Submission(format!(
                    "creation receipt {:?} carries no contract address",
                    receipt.transaction_hash
                )))
            }
            (false, _) => None,
        };

        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            block_number,
            contract_address,
            status: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            gas_used: receipt.gas_used,
        })
    }
}

/// Progress of a single submission, as seen by an observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionEvent {
    /// The node accepted the transaction
    TransactionHash(H256),
    /// The transaction was included
    Receipt(Receipt),
    /// The including block is `n` blocks deep
    Confirmation(u64, Receipt),
    /// The submission failed; no further events follow
    Error(String),
}

/// Sends signed transactions and waits for their receipts.
pub struct Submitter<M> {
    client: Arc<M>,
    config: SubmitConfig,
}

impl<M: Middleware + 'static> Submitter<M> {
    pub fn new(client: Arc<M>, config: SubmitConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<M> {
        &self.client
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Pending transaction count of `address`, used to seed a [`NonceTracker`].
    pub async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let count = self
            .client
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        Ok(count.as_u64())
    }

    /// Current chain id and gas price, with the next nonce from `nonces`.
    pub async fn tx_params(&self, nonces: &NonceTracker) -> Result<TxParams> {
        let chain_id = self.client.get_chainid().await.map_err(|e| Error::Provider(e.to_string()))?;
        let gas_price =
            self.client.get_gas_price().await.map_err(|e| Error::Provider(e.to_string()))?;

        Ok(TxParams { nonce: nonces.next(), chain_id: chain_id.as_u64(), gas_price })
    }

    /// Submit and wait for inclusion.
    pub async fn submit(&self, signed: &SignedTransaction) -> Result<Receipt> {
        self.submit_observed(signed, |_| {}).await
    }

    /// Submit and wait for inclusion, reporting every step to `observer`.
    ///
    /// After the receipt, confirmations are reported up to
    /// [`SubmitConfig::confirmations`]. A failure is reported as
    /// [`SubmissionEvent::Error`] and then returned.
    pub async fn submit_observed<F>(&self, signed: &SignedTransaction, mut observer: F) -> Result<Receipt>
    where
        F: FnMut(&SubmissionEvent),
    {
        let res = self.submit_inner(signed, &mut observer).await;
        if let Err(e) = &res {
            observer(&SubmissionEvent::Error(e.to_string()));
        }
        res
    }

    async fn submit_inner<F>(&self, signed: &SignedTransaction, observer: &mut F) -> Result<Receipt>
    where
        F: FnMut(&SubmissionEvent),
    {
        let mut attempt = 0;
        let pending = loop {
            match self.client.send_raw_transaction(signed.raw.clone()).await {
                Ok(pending) => break pending,
                // A JSON-RPC error response means the node saw and rejected it.
                Err(e) if e.as_error_response().is_some() => {
                    return Err(Error::Submission(e.to_string()))
                }
                Err(e) if attempt < self.config.retries => {
                    let delay = backoff_delay(self.config.backoff, attempt);
                    warn!(
                        target: "solflow::submit",
                        "Sending {:?} failed ({}), retrying in {:?}", signed.hash, e, delay,
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::Submission(e.to_string())),
            }
        };

        let tx_hash = pending.tx_hash();
        debug!(target: "solflow::submit", "Transaction sent: {:?}", tx_hash);
        observer(&SubmissionEvent::TransactionHash(tx_hash));

        let pending = pending.interval(self.config.poll_interval);
        let receipt = match timeout(self.config.timeout, pending).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                return Err(Error::Submission(format!("transaction {tx_hash:?} was dropped")))
            }
            Ok(Err(e)) => return Err(Error::Provider(e.to_string())),
            Err(_) => return Err(Error::Timeout(tx_hash)),
        };

        let receipt = Receipt::from_ethers(&receipt, signed.is_creation())?;
        observer(&SubmissionEvent::Receipt(receipt.clone()));

        if !receipt.status {
            return Err(Error::Revert { tx_hash, block_number: receipt.block_number })
        }

        info!(
            target: "solflow::submit",
            "Transaction {:?} included in block {}", tx_hash, receipt.block_number,
        );

        match timeout(self.config.timeout, self.confirm(&receipt, observer)).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::Timeout(tx_hash)),
        }

        Ok(receipt)
    }

    async fn confirm<F>(&self, receipt: &Receipt, observer: &mut F) -> Result<()>
    where
        F: FnMut(&SubmissionEvent),
    {
        let mut seen = 0;
        while seen < self.config.confirmations {
            let head = self.client.get_block_number().await.map_err(|e| Error::Provider(e.to_string()))?;
            let depth = head.as_u64().saturating_sub(receipt.block_number) + 1;

            while seen < depth.min(self.config.confirmations) {
                seen += 1;
                observer(&SubmissionEvent::Confirmation(seen, receipt.clone()));
            }

            if seen < self.config.confirmations {
                sleep(self.config.poll_interval).await;
            }
        }

        Ok(())
    }

    /// Read-only method call through `eth_call`, with decoded outputs.
    pub async fn call(
        &self,
        contract: Address,
        method: &str,
        args: &[Token],
        abi: &Abi,
    ) -> Result<Vec<Token>> {
        let function = abi.function(method)?;
        let unsigned = build_call(contract, method, args, abi)?;

        let request: TypedTransaction =
            TransactionRequest::new().to(contract).data(unsigned.data).into();
        let output =
            self.client.call(&request, None).await.map_err(|e| Error::Provider(e.to_string()))?;

        Ok(function.decode_output(&output)?)
    }

    /// Shorthand for calls returning a single `uint256`.
    pub async fn call_uint(
        &self,
        contract: Address,
        method: &str,
        args: &[Token],
        abi: &Abi,
    ) -> Result<U256> {
        let mut tokens = self.call(contract, method, args, abi).await?;
        match (tokens.pop(), tokens.is_empty()) {
            (Some(Token::Uint(value)), true) => Ok(value),
            (other, _) => Err(Error::Abi(format!("{method} did not return a single uint: {other:?}"))),
        }
    }
}
