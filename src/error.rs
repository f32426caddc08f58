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

use ethers::types::H256;

// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ===============
    // Compiler errors
    // ===============
    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("Contract {1} not found in {0}")]
    ContractNotFound(String, String),

    #[error("Contract {0} has no deployable bytecode")]
    MissingBytecode(String),

    // ===================
    // Key/signing errors
    // ===================
    #[error("Invalid secret key: {0}")]
    InvalidKey(&'static str),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Event {0} not found in contract interface")]
    EventNotFound(String),

    // ======================
    // Network-related errors
    // ======================
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Timed out waiting for transaction {0:?}")]
    Timeout(H256),

    #[error("Transaction {tx_hash:?} reverted in block {block_number}")]
    Revert { tx_hash: H256, block_number: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    // ====================
    // Orchestration errors
    // ====================
    #[error("Step {step} ({name}) failed: {source}")]
    Step { step: u8, name: &'static str, source: Box<Error> },

    // =============
    // Config errors
    // =============
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    UrlParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an error with the walkthrough step it originated from.
    pub fn at_step(self, step: u8, name: &'static str) -> Self {
        Error::Step { step, name, source: Box::new(self) }
    }
}

impl From<ethers::abi::Error> for Error {
    fn from(err: ethers::abi::Error) -> Self {
        Self::Abi(err.to_string())
    }
}

impl From<ethers::providers::ProviderError> for Error {
    fn from(err: ethers::providers::ProviderError) -> Self {
        Self::Provider(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::UrlParse(err.to_string())
    }
}
