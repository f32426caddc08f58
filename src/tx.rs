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

use std::sync::atomic::{AtomicU64, Ordering};

use ethers::{
    abi::{Abi, Token},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Signature, TransactionRequest,
        H256, U256,
    },
};
use log::debug;

use crate::{account::Account, Error, Result};

/// A transaction that has not been signed yet.
/// `to == None` means contract creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub to: Option<Address>,
    pub data: Bytes,
}

impl UnsignedTransaction {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// Chain-dependent values needed to sign a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxParams {
    pub nonce: U256,
    pub chain_id: u64,
    pub gas_price: U256,
}

/// A signed, network-ready transaction.
#[derive(Clone, Debug)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub gas_limit: u64,
    pub nonce: U256,
    pub signature: Signature,
    /// RLP encoding handed to `eth_sendRawTransaction`
    pub raw: Bytes,
    pub hash: H256,
}

impl SignedTransaction {
    pub fn is_creation(&self) -> bool {
        self.unsigned.is_creation()
    }
}

/// Encode constructor arguments and append them to the creation bytecode.
pub fn build_deployment(
    bytecode: &Bytes,
    constructor_args: &[Token],
    abi: &Abi,
) -> Result<UnsignedTransaction> {
    let data = match abi.constructor() {
        Some(constructor) => constructor.encode_input(bytecode.to_vec(), constructor_args)?,
        None if constructor_args.is_empty() => bytecode.to_vec(),
        None => {
            return Err(Error::Abi(format!(
                "contract has no constructor but {} argument(s) were given",
                constructor_args.len()
            )))
        }
    };

    Ok(UnsignedTransaction { to: None, data: data.into() })
}

/// Encode a method call: 4-byte selector followed by the encoded arguments.
pub fn build_call(
    contract: Address,
    method: &str,
    args: &[Token],
    abi: &Abi,
) -> Result<UnsignedTransaction> {
    let function = abi.function(method)?;
    let data = function.encode_input(args)?;
    Ok(UnsignedTransaction { to: Some(contract), data: data.into() })
}

/// Sign a transaction locally. No network access happens here.
///
/// Produces a legacy EIP-155 transaction; identical inputs give
/// byte-identical output since signatures follow RFC 6979.
pub fn sign(
    unsigned: &UnsignedTransaction,
    account: &Account,
    gas_limit: u64,
    params: &TxParams,
) -> Result<SignedTransaction> {
    if gas_limit == 0 {
        return Err(Error::Signing("gas limit must be positive".to_string()))
    }

    let mut request = TransactionRequest::new()
        .from(account.address())
        .data(unsigned.data.clone())
        .gas(gas_limit)
        .gas_price(params.gas_price)
        .nonce(params.nonce)
        .chain_id(params.chain_id);

    if let Some(to) = unsigned.to {
        request = request.to(to);
    }

    let typed: TypedTransaction = request.into();
    let signature =
        account.wallet().sign_transaction_sync(&typed).map_err(|e| Error::Signing(e.to_string()))?;

    let raw = typed.rlp_signed(&signature);
    let hash = typed.hash(&signature);

    debug!(
        target: "solflow::tx",
        "Signed tx {:?} (nonce={}, to={:?}, {} bytes)",
        hash,
        params.nonce,
        unsigned.to,
        raw.len(),
    );

    Ok(SignedTransaction {
        unsigned: unsigned.clone(),
        gas_limit,
        nonce: params.nonce,
        signature,
        raw,
        hash,
    })
}

/// Hands out monotonically increasing nonces for one account.
///
/// Seeded once from the chain's pending transaction count, then tracked
/// locally for the rest of the session.
#[derive(Debug)]
pub struct NonceTracker {
    next: AtomicU64,
}

impl NonceTracker {
    pub fn new(start: u64) -> Self {
        Self { next: AtomicU64::new(start) }
    }

    /// Reserve the next nonce.
    pub fn next(&self) -> U256 {
        U256::from(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Nonce that the next call to [`NonceTracker::next`] will return.
    pub fn peek(&self) -> U256 {
        U256::from(self.next.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::utils::{hex, id};

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn abi() -> Abi {
        let output: serde_json::Value =
            serde_json::from_str(include_str!("../tests/fixtures/compiler_output.json")).unwrap();
        serde_json::from_value(output["contracts"]["Incrementer.sol"]["Incrementer"]["abi"].clone())
            .unwrap()
    }

    fn params(nonce: u64) -> TxParams {
        TxParams { nonce: nonce.into(), chain_id: 31337, gas_price: 1_000_000_000u64.into() }
    }

    #[test]
    fn deployment_appends_constructor_args() {
        let bytecode = Bytes::from(vec![0x60, 0x80, 0x60, 0x40]);
        let tx = build_deployment(&bytecode, &[Token::Uint(5.into())], &abi()).unwrap();

        assert!(tx.is_creation());
        assert_eq!(tx.data.len(), 4 + 32);
        assert_eq!(&tx.data[..4], &bytecode[..]);
        assert_eq!(tx.data[35], 5);
    }

    #[test]
    fn deployment_rejects_wrong_constructor_args() {
        let bytecode = Bytes::from(vec![0x60, 0x80]);
        assert!(build_deployment(&bytecode, &[], &abi()).is_err());
        assert!(build_deployment(&bytecode, &[Token::Bool(true)], &abi()).is_err());

        // No constructor at all
        let no_ctor = Abi::default();
        assert!(build_deployment(&bytecode, &[], &no_ctor).is_ok());
        assert!(matches!(
            build_deployment(&bytecode, &[Token::Uint(1.into())], &no_ctor),
            Err(Error::Abi(_))
        ));
    }

    #[test]
    fn call_starts_with_selector() {
        let contract = Address::repeat_byte(0x11);
        let tx = build_call(contract, "increment", &[Token::Uint(3.into())], &abi()).unwrap();

        assert_eq!(tx.to, Some(contract));
        assert_eq!(&tx.data[..4], &id("increment(uint256)")[..]);
        assert_eq!(tx.data.len(), 4 + 32);

        let reset = build_call(contract, "reset", &[], &abi()).unwrap();
        assert_eq!(hex::encode(&reset.data), hex::encode(id("reset()")));
    }

    #[test]
    fn call_unknown_method() {
        let contract = Address::repeat_byte(0x11);
        assert!(matches!(build_call(contract, "decrement", &[], &abi()), Err(Error::Abi(_))));
    }

    #[test]
    fn zero_gas_limit_fails() {
        let account = Account::resolve(KEY).unwrap();
        let tx = build_call(Address::zero(), "reset", &[], &abi()).unwrap();
        assert!(matches!(sign(&tx, &account, 0, &params(0)), Err(Error::Signing(_))));
    }

    #[test]
    fn signing_is_deterministic() {
        let account = Account::resolve(KEY).unwrap();
        let tx = build_call(Address::zero(), "increment", &[Token::Uint(3.into())], &abi()).unwrap();

        let a = sign(&tx, &account, 8_000_000, &params(7)).unwrap();
        let b = sign(&tx, &account, 8_000_000, &params(7)).unwrap();
        assert_eq!(a.raw, b.raw);
        assert_eq!(a.hash, b.hash);

        let c = sign(&tx, &account, 8_000_000, &params(8)).unwrap();
        assert_ne!(a.raw, c.raw);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn signature_recovers_signer() {
        let account = Account::resolve(KEY).unwrap();
        let tx = build_deployment(&Bytes::from(vec![0x60]), &[Token::Uint(0.into())], &abi()).unwrap();
        let signed = sign(&tx, &account, 3_000_000, &params(0)).unwrap();

        assert!(signed.is_creation());
        let request = TransactionRequest::new()
            .from(account.address())
            .data(tx.data.clone())
            .gas(3_000_000u64)
            .gas_price(params(0).gas_price)
            .nonce(0u64)
            .chain_id(31337u64);
        let typed: TypedTransaction = request.into();
        assert_eq!(signed.signature.recover(typed.sighash()).unwrap(), account.address());
    }

    #[test]
    fn nonces_increase() {
        let nonces = NonceTracker::new(4);
        assert_eq!(nonces.peek(), 4.into());
        assert_eq!(nonces.next(), 4.into());
        assert_eq!(nonces.next(), 5.into());
        assert_eq!(nonces.peek(), 6.into());
    }
}
