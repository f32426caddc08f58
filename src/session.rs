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

use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use ethers::{
    abi::{Abi, Token},
    providers::Middleware,
    types::{Address, BlockNumber, Bytes, U256},
};
use log::{info, warn};
use tokio::{sync::mpsc, time::timeout};
use url::Url;

use crate::{
    account::Account,
    compiler::SolidityCompiler,
    submit::{Receipt, SubmissionEvent, SubmitConfig, Submitter},
    tx::{build_call, build_deployment, sign, NonceTracker, UnsignedTransaction},
    watcher::{Connection, EventRecord},
    Error, Result,
};

/// Everything a walkthrough needs, resolved up front.
///
/// Nothing is read from the process environment once a session exists.
#[derive(Clone)]
pub struct Session {
    /// Hex-encoded secret key of the deploying account
    pub secret_key: String,
    /// Request/response JSON-RPC endpoint
    pub rpc_endpoint: Url,
    /// Websocket endpoint used for event subscriptions
    pub ws_endpoint: Url,
    /// Solidity source file
    pub source: PathBuf,
    /// Contract to deploy from `source`
    pub contract: String,
    pub gas_limit: u64,
    /// Constructor argument of the counter
    pub initial_number: u64,
    /// Value passed to `increment` in steps 5 and 7
    pub increment_by: u64,
    /// Number of increments submitted while listening in step 7
    pub event_triggers: usize,
    /// Value passed to the observed `increment` of step 9
    pub final_increment: u64,
    pub submit: SubmitConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("rpc_endpoint", &self.rpc_endpoint.host_str())
            .field("ws_endpoint", &self.ws_endpoint.host_str())
            .field("source", &self.source)
            .field("contract", &self.contract)
            .field("gas_limit", &self.gas_limit)
            .field("initial_number", &self.initial_number)
            .field("increment_by", &self.increment_by)
            .field("event_triggers", &self.event_triggers)
            .field("final_increment", &self.final_increment)
            .field("submit", &self.submit)
            .finish_non_exhaustive()
    }
}

/// Append an access token to a base endpoint URL.
///
/// `https://sepolia.infura.io/v3/` + `abc` gives `https://sepolia.infura.io/v3/abc`.
pub fn endpoint_with_token(base: &Url, token: &str) -> Result<Url> {
    if token.is_empty() || token.contains('/') {
        return Err(Error::Config("endpoint token must be a single non-empty path segment".into()))
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    Ok(base.join(token)?)
}

/// Values observed over a full walkthrough.
#[derive(Clone, Debug)]
pub struct WalkthroughReport {
    pub account: Address,
    pub contract_address: Address,
    pub deploy_block: u64,
    pub initial_value: U256,
    pub after_increment: U256,
    pub after_reset: U256,
    /// Times the one-shot listener fired
    pub once_deliveries: usize,
    /// Events seen by the continuous listener, in delivery order
    pub continuous_events: Vec<EventRecord>,
    /// `Increment` events from the deployment block to the latest one
    pub past_events: Vec<EventRecord>,
    /// Progress reported while submitting the last transaction
    pub final_progress: Vec<SubmissionEvent>,
    pub final_receipt: Receipt,
}

/// Compiled, deployed contract.
#[derive(Clone, Debug)]
pub struct Deployment {
    pub address: Address,
    pub block_number: u64,
    pub abi: Abi,
}

const INCREMENT_EVENT: &str = "Increment";

/// Drives the compile → deploy → call → listen → verify sequence
/// against a counter contract.
pub struct Walkthrough<M, C> {
    session: Session,
    submitter: Submitter<M>,
    compiler: C,
}

impl<M: Middleware + 'static, C: SolidityCompiler> Walkthrough<M, C> {
    pub fn new(session: Session, client: Arc<M>, compiler: C) -> Self {
        let submitter = Submitter::new(client, session.submit.clone());
        Self { session, submitter, compiler }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Compile the configured source and return the contract's artifacts.
    pub fn compile(&self) -> Result<(Bytes, Abi)> {
        let (file_name, output) = self.compiler.compile_file(&self.session.source)?;
        output.artifact(&file_name, &self.session.contract)
    }

    /// Sign `unsigned` with the next nonce and submit it.
    async fn send(
        &self,
        unsigned: &UnsignedTransaction,
        account: &Account,
        nonces: &NonceTracker,
    ) -> Result<Receipt> {
        let params = self.submitter.tx_params(nonces).await?;
        let signed = sign(unsigned, account, self.session.gas_limit, &params)?;
        self.submitter.submit(&signed).await
    }

    async fn deploy(
        &self,
        bytecode: &Bytes,
        abi: &Abi,
        account: &Account,
        nonces: &NonceTracker,
    ) -> Result<Deployment> {
        let args = [Token::Uint(self.session.initial_number.into())];
        let unsigned = build_deployment(bytecode, &args, abi)?;
        let receipt = self.send(&unsigned, account, nonces).await?;

        let address = receipt
            .contract_address
            .ok_or_else(|| Error::Submission("deployment receipt without address".to_string()))?;

        Ok(Deployment { address, block_number: receipt.block_number, abi: abi.clone() })
    }

    async fn get_number(&self, deployment: &Deployment) -> Result<U256> {
        self.submitter.call_uint(deployment.address, "getNumber", &[], &deployment.abi).await
    }

    async fn invoke(
        &self,
        deployment: &Deployment,
        method: &str,
        args: &[Token],
        account: &Account,
        nonces: &NonceTracker,
    ) -> Result<Receipt> {
        let unsigned = build_call(deployment.address, method, args, &deployment.abi)?;
        self.send(&unsigned, account, nonces).await
    }

    /// Compile and deploy only, returning the deployment.
    pub async fn deploy_only(&self) -> Result<Deployment> {
        let (bytecode, abi) = self.compile().map_err(|e| e.at_step(1, "compile"))?;
        let account =
            Account::resolve(&self.session.secret_key).map_err(|e| e.at_step(2, "resolve account"))?;

        let deployment = async {
            let nonces = NonceTracker::new(self.submitter.pending_nonce(account.address()).await?);
            self.deploy(&bytecode, &abi, &account, &nonces).await
        }
        .await
        .map_err(|e| e.at_step(3, "deploy"))?;

        info!(target: "solflow::session", "Contract deployed at address: {:?}", deployment.address);
        Ok(deployment)
    }

    /// Run every step in order. The first failure aborts the sequence.
    pub async fn run(&self) -> Result<WalkthroughReport> {
        let increment_by = [Token::Uint(self.session.increment_by.into())];

        info!(target: "solflow::session", "============ 1. Compile contract");
        let (bytecode, abi) = self.compile().map_err(|e| e.at_step(1, "compile"))?;

        info!(target: "solflow::session", "============ 2. Resolve account");
        let account =
            Account::resolve(&self.session.secret_key).map_err(|e| e.at_step(2, "resolve account"))?;
        let nonces = NonceTracker::new(
            self.submitter
                .pending_nonce(account.address())
                .await
                .map_err(|e| e.at_step(2, "resolve account"))?,
        );
        info!(target: "solflow::session", "Deploying from account {:?}", account.address());

        info!(target: "solflow::session", "============ 3. Deploy contract");
        let deployment = self
            .deploy(&bytecode, &abi, &account, &nonces)
            .await
            .map_err(|e| e.at_step(3, "deploy"))?;
        info!(
            target: "solflow::session",
            "Contract deployed at address {:?} in block {}", deployment.address, deployment.block_number,
        );

        info!(target: "solflow::session", "============ 4. Call getNumber");
        let initial_value =
            self.get_number(&deployment).await.map_err(|e| e.at_step(4, "read number"))?;
        info!(target: "solflow::session", "The current number stored is: {}", initial_value);

        info!(target: "solflow::session", "============ 5. Call increment");
        let after_increment = async {
            let receipt = self.invoke(&deployment, "increment", &increment_by, &account, &nonces).await?;
            info!(target: "solflow::session", "Tx successful with hash: {:?}", receipt.transaction_hash);
            self.get_number(&deployment).await
        }
        .await
        .map_err(|e| e.at_step(5, "increment"))?;
        info!(target: "solflow::session", "After increment, the number stored is: {}", after_increment);

        info!(target: "solflow::session", "============ 6. Call reset");
        let after_reset = async {
            let receipt = self.invoke(&deployment, "reset", &[], &account, &nonces).await?;
            info!(target: "solflow::session", "Tx successful with hash: {:?}", receipt.transaction_hash);
            self.get_number(&deployment).await
        }
        .await
        .map_err(|e| e.at_step(6, "reset"))?;
        info!(target: "solflow::session", "After reset, the number stored is: {}", after_reset);

        info!(target: "solflow::session", "============ 7. Listen to events");
        let (once_deliveries, continuous_events, mut connection) = self
            .listen(&deployment, &increment_by, &account, &nonces)
            .await
            .map_err(|e| e.at_step(7, "listen to events"))?;

        info!(target: "solflow::session", "============ 8. Get past events");
        let past_events = connection
            .query_past_events(INCREMENT_EVENT, deployment.block_number, BlockNumber::Latest)
            .await
            .map_err(|e| e.at_step(8, "past events"))?;
        for event in &past_events {
            info!(
                target: "solflow::session",
                "{} in block {:?}: {:?}", event.name, event.block_number, event.args,
            );
        }
        connection.close().await;

        info!(target: "solflow::session", "============ 9. Check the transaction status");
        let mut final_progress = vec![];
        let final_receipt = async {
            let args = [Token::Uint(self.session.final_increment.into())];
            let unsigned = build_call(deployment.address, "increment", &args, &deployment.abi)?;
            let params = self.submitter.tx_params(&nonces).await?;
            let signed = sign(&unsigned, &account, self.session.gas_limit, &params)?;

            self.submitter
                .submit_observed(&signed, |event| {
                    match event {
                        SubmissionEvent::TransactionHash(hash) => {
                            info!(target: "solflow::session", "Transaction hash: {:?}", hash)
                        }
                        SubmissionEvent::Receipt(receipt) => {
                            info!(target: "solflow::session", "Receipt: {:?}", receipt)
                        }
                        SubmissionEvent::Confirmation(n, receipt) => info!(
                            target: "solflow::session",
                            "Confirmation {} for block {}", n, receipt.block_number,
                        ),
                        SubmissionEvent::Error(e) => {
                            warn!(target: "solflow::session", "Transaction error: {}", e)
                        }
                    }
                    final_progress.push(event.clone());
                })
                .await
        }
        .await
        .map_err(|e| e.at_step(9, "observed submission"))?;

        Ok(WalkthroughReport {
            account: account.address(),
            contract_address: deployment.address,
            deploy_block: deployment.block_number,
            initial_value,
            after_increment,
            after_reset,
            once_deliveries,
            continuous_events,
            past_events,
            final_progress,
            final_receipt,
        })
    }

    /// Step 7: attach a one-shot and a continuous `Increment` listener,
    /// trigger `event_triggers` increments, then tear the listeners down.
    ///
    /// The connection is handed back with no active subscriptions so the
    /// past event query of step 8 can reuse it.
    async fn listen(
        &self,
        deployment: &Deployment,
        increment_by: &[Token],
        account: &Account,
        nonces: &NonceTracker,
    ) -> Result<(usize, Vec<EventRecord>, Connection)> {
        let mut connection = Connection::connect(
            &self.session.ws_endpoint,
            deployment.address,
            deployment.abi.clone(),
        )
        .await?;

        let once_count = Arc::new(AtomicUsize::new(0));
        let once_count_ = once_count.clone();
        connection
            .subscribe_once(INCREMENT_EVENT, move |_| {
                info!(target: "solflow::session", "One-time listener fired, going away now");
                once_count_.fetch_add(1, Ordering::SeqCst);
            })
            .await?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        connection
            .subscribe_continuous(INCREMENT_EVENT, move |event| {
                info!(target: "solflow::session", "Long-lived listener got {:?}", event.args);
                let _ = event_tx.send(event.clone());
            })
            .await?;

        for step in 0..self.session.event_triggers {
            let receipt = self.invoke(deployment, "increment", increment_by, account, nonces).await?;
            info!(
                target: "solflow::session",
                "Trigger {}/{} in block {}", step + 1, self.session.event_triggers, receipt.block_number,
            );
        }

        // Receipts can arrive before the websocket delivers the matching logs.
        let mut events = Vec::with_capacity(self.session.event_triggers);
        while events.len() < self.session.event_triggers {
            match timeout(self.session.submit.timeout, event_rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return Err(Error::Connection("event channel closed".to_string())),
                Err(_) => {
                    return Err(Error::Connection(format!(
                        "received {} of {} events before timing out",
                        events.len(),
                        self.session.event_triggers
                    )))
                }
            }
        }

        connection.unsubscribe_all().await;
        info!(target: "solflow::session", "Cleared all the event listeners");

        Ok((once_count.load(Ordering::SeqCst), events, connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_to_endpoint() {
        let base = Url::parse("https://sepolia.infura.io/v3/").unwrap();
        assert_eq!(
            endpoint_with_token(&base, "abc123").unwrap().as_str(),
            "https://sepolia.infura.io/v3/abc123"
        );

        let no_slash = Url::parse("wss://sepolia.infura.io/ws/v3").unwrap();
        assert_eq!(
            endpoint_with_token(&no_slash, "abc123").unwrap().as_str(),
            "wss://sepolia.infura.io/ws/v3/abc123"
        );
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let base = Url::parse("https://sepolia.infura.io/v3/").unwrap();
        assert!(matches!(endpoint_with_token(&base, ""), Err(Error::Config(_))));
        assert!(matches!(endpoint_with_token(&base, "a/b"), Err(Error::Config(_))));
    }

    #[test]
    fn debug_hides_secret() {
        let session = Session {
            secret_key: "deadbeef".repeat(8),
            rpc_endpoint: Url::parse("http://127.0.0.1:8545").unwrap(),
            ws_endpoint: Url::parse("ws://127.0.0.1:8545").unwrap(),
            source: PathBuf::from("contract/Incrementer.sol"),
            contract: "Incrementer".to_string(),
            gas_limit: 8_000_000,
            initial_number: 0,
            increment_by: 3,
            event_triggers: 5,
            final_increment: 1,
            submit: SubmitConfig::default(),
        };

        assert!(!format!("{session:?}").contains("deadbeef"));
    }

    #[test]
    fn step_errors_carry_their_step() {
        let err = Error::Timeout(Default::default()).at_step(5, "increment");
        assert!(matches!(err, Error::Step { step: 5, .. }));
        assert!(err.to_string().starts_with("Step 5 (increment) failed"));
    }
}
