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

//! Compile, deploy and drive a Solidity contract.
//!
//! The pipeline is strictly sequential: [`compiler`] produces bytecode and
//! ABI, [`tx`] turns them into signed transactions, [`submit`] puts those
//! on chain and [`watcher`] observes the events they emit. [`session`]
//! glues everything together into the counter walkthrough.

pub mod error;
pub use error::{Error, Result};

/// Solidity compiler adapter
pub mod compiler;

/// Secret key to signing account resolution
pub mod account;

/// Transaction building and local signing
pub mod tx;

/// Raw transaction submission, receipts and read-only calls
pub mod submit;

/// Websocket event subscriptions and past event queries
pub mod watcher;

/// Session configuration and the deploy/interact walkthrough
pub mod session;

#[cfg(feature = "util")]
pub mod util;
