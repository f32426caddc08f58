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

use std::{env, fs, path::Path, process::exit, sync::Arc, time::Duration};

use ethers::providers::{Http, Provider};
use log::{info, warn};
use serde::Deserialize;
use structopt::StructOpt;
use structopt_toml::StructOptToml;
use url::Url;

use solflow::{
    cli_desc,
    compiler::{SolcCompiler, SolidityCompiler},
    session::{endpoint_with_token, Session, Walkthrough, WalkthroughReport},
    submit::SubmitConfig,
    util::{
        cli::{init_logger, spawn_config},
        path::{expand_path, get_config_path},
    },
    Error, Result,
};

const CONFIG_FILE: &str = "solflow_config.toml";
const CONFIG_FILE_CONTENTS: &str = include_str!("../solflow_config.toml");

#[derive(Clone, Debug, Deserialize, StructOpt, StructOptToml)]
#[serde(default)]
#[structopt(name = "solflow", about = cli_desc!())]
struct Args {
    #[structopt(short, parse(from_occurrences))]
    /// Increase verbosity (-vvv supported)
    verbose: u8,

    #[structopt(short, long)]
    /// Configuration file to use
    config: Option<String>,

    #[structopt(long)]
    /// Set log file output
    log: Option<String>,

    #[structopt(long, default_value = "contract/Incrementer.sol")]
    /// Solidity source file to compile
    source: String,

    #[structopt(long, default_value = "Incrementer")]
    /// Contract to deploy from the source file
    contract: String,

    #[structopt(long)]
    /// Path to the solc binary
    solc: Option<String>,

    #[structopt(long, default_value = "https://sepolia.infura.io/v3/")]
    /// JSON-RPC endpoint, INFURA_ID is appended to it
    rpc_endpoint: Url,

    #[structopt(long, default_value = "wss://sepolia.infura.io/ws/v3/")]
    /// Websocket endpoint, INFURA_ID is appended to it
    ws_endpoint: Url,

    #[structopt(long, default_value = "8000000")]
    /// Gas limit of every transaction
    gas_limit: u64,

    #[structopt(long, default_value = "0")]
    /// Constructor argument of the counter
    initial_number: u64,

    #[structopt(long, default_value = "3")]
    /// Value added by each increment call
    increment_by: u64,

    #[structopt(long, default_value = "5")]
    /// Number of increments submitted while listening for events
    event_triggers: usize,

    #[structopt(long, default_value = "1")]
    /// Value added by the last, observed increment call
    final_increment: u64,

    #[structopt(long, default_value = "1")]
    /// Confirmations to wait for on the observed increment call
    confirmations: u64,

    #[structopt(long, default_value = "120")]
    /// Seconds to wait for a transaction to be included
    submit_timeout: u64,

    #[structopt(long, default_value = "1000")]
    /// Receipt polling interval in milliseconds
    poll_interval: u64,

    #[structopt(long, default_value = "0")]
    /// Retries of a transaction send on transport failures
    retries: u32,

    #[structopt(long)]
    /// Only compile the source and print its contracts
    compile_only: bool,

    #[structopt(long)]
    /// Compile and deploy, skipping the interaction steps
    deploy_only: bool,
}

/// Read a mandatory variable from the process environment.
fn required_env(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::MissingEnv(name)),
    }
}

fn build_session(args: &Args) -> Result<Session> {
    let secret_key = required_env("PRIVATE_KEY")?;
    let token = required_env("INFURA_ID")?;

    Ok(Session {
        secret_key,
        rpc_endpoint: endpoint_with_token(&args.rpc_endpoint, &token)?,
        ws_endpoint: endpoint_with_token(&args.ws_endpoint, &token)?,
        source: expand_path(&args.source)?,
        contract: args.contract.clone(),
        gas_limit: args.gas_limit,
        initial_number: args.initial_number,
        increment_by: args.increment_by,
        event_triggers: args.event_triggers,
        final_increment: args.final_increment,
        submit: SubmitConfig {
            timeout: Duration::from_secs(args.submit_timeout),
            poll_interval: Duration::from_millis(args.poll_interval),
            confirmations: args.confirmations,
            retries: args.retries,
            ..Default::default()
        },
    })
}

fn print_contracts(compiler: &SolcCompiler, source: &Path) -> Result<()> {
    let (file_name, output) = compiler.compile_file(source)?;

    for (name, contract) in output.contracts.get(&file_name).into_iter().flatten() {
        let size = contract.bytecode(name).map(|b| b.len()).unwrap_or(0);
        println!("{name} ({size} bytes of bytecode)");

        if let Some(constructor) = &contract.abi.constructor {
            let inputs: Vec<String> = constructor.inputs.iter().map(|p| p.kind.to_string()).collect();
            println!("  constructor({})", inputs.join(","));
        }
        for function in contract.abi.functions() {
            println!("  function {}", function.signature());
        }
        for event in contract.abi.events() {
            let inputs: Vec<String> = event.inputs.iter().map(|p| p.kind.to_string()).collect();
            println!("  event {}({})", event.name, inputs.join(","));
        }
    }

    Ok(())
}

fn print_report(report: &WalkthroughReport) {
    println!("Account:           {:?}", report.account);
    println!("Contract:          {:?}", report.contract_address);
    println!("Deployed in block: {}", report.deploy_block);
    println!("Initial value:     {}", report.initial_value);
    println!("After increment:   {}", report.after_increment);
    println!("After reset:       {}", report.after_reset);
    println!("One-time deliveries: {}", report.once_deliveries);
    println!("Listened events:     {}", report.continuous_events.len());
    println!("Past events:         {}", report.past_events.len());
    println!(
        "Final transaction {:?} in block {} (status: {})",
        report.final_receipt.transaction_hash,
        report.final_receipt.block_number,
        if report.final_receipt.status { "success" } else { "failed" },
    );
}

async fn realmain(args: Args) -> Result<()> {
    let compiler = SolcCompiler::new(args.solc.as_deref());

    if args.compile_only {
        return print_contracts(&compiler, &expand_path(&args.source)?)
    }

    let session = build_session(&args)?;
    info!(target: "solflow", "Starting walkthrough with {:?}", session);

    let provider = Provider::<Http>::try_from(session.rpc_endpoint.as_str())
        .map_err(|e| Error::UrlParse(e.to_string()))?
        .interval(session.submit.poll_interval);

    let walkthrough = Walkthrough::new(session, Arc::new(provider), compiler);

    if args.deploy_only {
        let deployment = walkthrough.deploy_only().await?;
        println!("Contract deployed at address: {:?}", deployment.address);
        return Ok(())
    }

    let report = walkthrough.run().await?;
    if report.once_deliveries != 1 {
        warn!(target: "solflow", "One-time listener fired {} times", report.once_deliveries);
    }
    print_report(&report);

    Ok(())
}

fn load_args() -> Result<Args> {
    let args = Args::from_args_with_toml("").map_err(|e| Error::Config(e.to_string()))?;
    let cfg_path = get_config_path(args.config.clone(), CONFIG_FILE)?;
    spawn_config(&cfg_path, CONFIG_FILE_CONTENTS.as_bytes())?;

    let contents = fs::read_to_string(&cfg_path)?;
    Args::from_args_with_toml(&contents).map_err(|e| Error::Config(e.to_string()))
}

#[tokio::main]
async fn main() {
    let args = match load_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            exit(1);
        }
    };

    if let Err(e) = init_logger(args.verbose, args.log.as_deref()) {
        eprintln!("Error: {e}");
        exit(1);
    }

    if let Err(e) = realmain(args).await {
        eprintln!("Error: {e}");
        exit(1);
    }
}
