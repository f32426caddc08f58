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

use std::{path::PathBuf, sync::Arc, time::Duration};

use ethers::{
    abi::{encode, Token},
    providers::{Http, Provider},
    types::{BlockNumber, Bytes, U256},
    utils::{hex, Anvil, AnvilInstance},
};
use url::Url;

use solflow::{
    account::Account,
    compiler::{CompilationOutput, CompilerInput, SolcCompiler, SolidityCompiler},
    session::{Session, Walkthrough},
    submit::{SubmissionEvent, SubmitConfig, Submitter},
    watcher::Connection,
    Error,
};

const FIXTURE: &str = include_str!("fixtures/compiler_output.json");

/// Serves a recorded solc output instead of invoking the compiler.
struct Recorded;

impl SolidityCompiler for Recorded {
    fn compile_input(&self, _input: &CompilerInput) -> solflow::Result<CompilationOutput> {
        serde_json::from_str(FIXTURE).map_err(|e| Error::Compile(e.to_string()))
    }
}

fn source_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("contract/Incrementer.sol")
}

fn session(secret_key: String, rpc: &str, ws: &str) -> Session {
    Session {
        secret_key,
        rpc_endpoint: Url::parse(rpc).unwrap(),
        ws_endpoint: Url::parse(ws).unwrap(),
        source: source_path(),
        contract: "Incrementer".to_string(),
        gas_limit: 8_000_000,
        initial_number: 0,
        increment_by: 3,
        event_triggers: 5,
        final_increment: 1,
        submit: SubmitConfig {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        },
    }
}

fn offline_session(secret_key: &str) -> Session {
    session(secret_key.to_string(), "http://127.0.0.1:8545", "ws://127.0.0.1:8545")
}

#[tokio::test]
async fn compile_step_uses_source_file_name() {
    let (provider, _mock) = Provider::mocked();
    let walkthrough = Walkthrough::new(offline_session(""), Arc::new(provider), Recorded);

    let (bytecode, abi) = walkthrough.compile().unwrap();
    assert!(!bytecode.is_empty());
    assert!(abi.function("reset").is_ok());
}

#[tokio::test]
async fn unknown_contract_fails_first_step() {
    let (provider, _mock) = Provider::mocked();
    let mut session = offline_session("");
    session.contract = "Decrementer".to_string();
    let walkthrough = Walkthrough::new(session, Arc::new(provider), Recorded);

    match walkthrough.run().await {
        Err(Error::Step { step: 1, source, .. }) => {
            assert!(matches!(*source, Error::ContractNotFound(_, _)))
        }
        other => panic!("expected step 1 failure, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_secret_key_fails_before_touching_the_network() {
    let (provider, _mock) = Provider::mocked();
    let walkthrough = Walkthrough::new(offline_session("not a key"), Arc::new(provider), Recorded);

    match walkthrough.run().await {
        Err(Error::Step { step: 2, source, .. }) => {
            assert!(matches!(*source, Error::InvalidKey(_)))
        }
        other => panic!("expected step 2 failure, got {other:?}"),
    }
}

#[tokio::test]
async fn read_only_call_decodes_uint() {
    let (provider, mock) = Provider::mocked();
    let output = Recorded.compile("Incrementer.sol", "").unwrap();
    let (_, abi) = output.artifact("Incrementer.sol", "Incrementer").unwrap();

    mock.push::<Bytes, _>(Bytes::from(encode(&[Token::Uint(U256::from(7))]))).unwrap();

    let submitter = Submitter::new(Arc::new(provider), SubmitConfig::default());
    let value = submitter.call_uint(Default::default(), "getNumber", &[], &abi).await.unwrap();
    assert_eq!(value, U256::from(7));
}

#[tokio::test]
async fn pending_nonce_comes_from_the_node() {
    let (provider, mock) = Provider::mocked();
    mock.push::<U256, _>(U256::from(4)).unwrap();

    let submitter = Submitter::new(Arc::new(provider), SubmitConfig::default());
    assert_eq!(submitter.pending_nonce(Default::default()).await.unwrap(), 4);
}

fn anvil_walkthrough(
    anvil: &AnvilInstance,
    final_increment: u64,
) -> Walkthrough<Provider<Http>, SolcCompiler> {
    let secret_key = hex::encode(anvil.keys()[0].to_bytes());
    let mut session = session(secret_key, &anvil.endpoint(), &anvil.ws_endpoint());
    session.final_increment = final_increment;
    let provider =
        Provider::<Http>::try_from(anvil.endpoint()).unwrap().interval(Duration::from_millis(50));

    Walkthrough::new(session, Arc::new(provider), SolcCompiler::default())
}

#[test]
#[ignore = "requires solc"]
fn compilation_is_deterministic() {
    let compiler = SolcCompiler::default();
    let (_, first) = compiler.compile_file(&source_path()).unwrap();
    let (_, second) = compiler.compile_file(&source_path()).unwrap();

    let (first_code, first_abi) = first.artifact("Incrementer.sol", "Incrementer").unwrap();
    let (second_code, second_abi) = second.artifact("Incrementer.sol", "Incrementer").unwrap();
    assert_eq!(first_code, second_code);
    assert_eq!(first_abi, second_abi);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires solc and anvil"]
async fn full_walkthrough_on_anvil() {
    let anvil = Anvil::new().spawn();
    let walkthrough = anvil_walkthrough(&anvil, 1);

    let report = walkthrough.run().await.unwrap();

    let expected = Account::resolve(&walkthrough.session().secret_key).unwrap().address();
    assert_eq!(report.account, expected);
    assert_eq!(report.initial_value, U256::zero());
    assert_eq!(report.after_increment, U256::from(3));
    assert_eq!(report.after_reset, U256::zero());

    assert_eq!(report.once_deliveries, 1);
    assert_eq!(report.continuous_events.len(), 5);
    let blocks: Vec<u64> =
        report.continuous_events.iter().map(|e| e.block_number.unwrap()).collect();
    assert!(blocks.windows(2).all(|w| w[0] < w[1]));
    for event in &report.continuous_events {
        assert_eq!(event.arg("value"), Some(&Token::Uint(U256::from(3))));
    }

    // One increment in step 5 and five while listening.
    assert_eq!(report.past_events.len(), 6);
    assert!(report.past_events.iter().all(|e| e.block_number.unwrap() >= report.deploy_block));

    assert!(report.final_receipt.status);
    assert!(matches!(report.final_progress[0], SubmissionEvent::TransactionHash(_)));
    assert!(matches!(report.final_progress[1], SubmissionEvent::Receipt(_)));
    assert!(matches!(report.final_progress[2], SubmissionEvent::Confirmation(1, _)));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires solc and anvil"]
async fn zero_increment_reverts() {
    let anvil = Anvil::new().spawn();
    let walkthrough = anvil_walkthrough(&anvil, 0);

    match walkthrough.run().await {
        Err(Error::Step { step: 9, source, .. }) => {
            assert!(matches!(*source, Error::Revert { .. }))
        }
        other => panic!("expected a revert in step 9, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires solc and anvil"]
async fn fresh_contract_has_no_past_events() {
    let anvil = Anvil::new().spawn();
    let walkthrough = anvil_walkthrough(&anvil, 1);
    let deployment = walkthrough.deploy_only().await.unwrap();

    let mut connection = Connection::connect(
        &Url::parse(&anvil.ws_endpoint()).unwrap(),
        deployment.address,
        deployment.abi.clone(),
    )
    .await
    .unwrap();

    let events = connection
        .query_past_events("Increment", deployment.block_number, BlockNumber::Latest)
        .await
        .unwrap();
    assert!(events.is_empty());

    assert!(matches!(
        connection.query_past_events("Decrement", 0u64, BlockNumber::Latest).await,
        Err(Error::EventNotFound(_))
    ));

    connection.close().await;
    connection.close().await;
}
