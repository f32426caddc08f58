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

use std::fmt;

use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
    utils::hex,
};

use crate::{Error, Result};

/// A signing account derived from a secp256k1 secret key.
///
/// The key only ever lives inside the wallet; `Debug` prints the address.
#[derive(Clone)]
pub struct Account {
    wallet: LocalWallet,
}

impl Account {
    /// Derive an account from a hex-encoded 32-byte secret key.
    /// A leading `0x` is accepted.
    pub fn resolve(secret_key: &str) -> Result<Self> {
        let stripped = secret_key.trim();
        let stripped = stripped.strip_prefix("0x").unwrap_or(stripped);

        if stripped.len() != 64 {
            return Err(Error::InvalidKey("expected 32 bytes of hex"))
        }

        let bytes = hex::decode(stripped).map_err(|_| Error::InvalidKey("not valid hex"))?;

        let wallet = LocalWallet::from_bytes(&bytes)
            .map_err(|_| Error::InvalidKey("not a valid secp256k1 scalar"))?;

        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub(crate) fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account").field("address", &self.address()).finish_non_exhaustive()
    }
}
