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

use std::{collections::BTreeMap, fs, path::Path};

use ethers::{abi::Abi, solc::Solc, types::Bytes, utils::hex};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Solidity standard JSON input.
///
/// The output selection is always `{"*": {"*": ["*"]}}` so every artifact
/// of every contract is available from a single compiler pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompilerInput {
    pub language: String,
    pub sources: BTreeMap<String, SourceFile>,
    pub settings: Settings,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceFile {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Settings {
    #[serde(rename = "outputSelection")]
    pub output_selection: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl CompilerInput {
    pub fn new(file_name: &str, source: &str) -> Self {
        let sources = BTreeMap::from([(
            file_name.to_string(),
            SourceFile { content: source.to_string() },
        )]);

        let everything = BTreeMap::from([("*".to_string(), vec!["*".to_string()])]);
        let output_selection = BTreeMap::from([("*".to_string(), everything)]);

        Self { language: "Solidity".to_string(), sources, settings: Settings { output_selection } }
    }
}

/// Solidity standard JSON output, reduced to what we consume.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CompilationOutput {
    /// file name -> contract name -> compiled contract
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, CompiledContract>>,
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompiledContract {
    #[serde(default)]
    pub abi: Abi,
    #[serde(default)]
    pub evm: Option<EvmOutput>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EvmOutput {
    pub bytecode: Option<BytecodeObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BytecodeObject {
    pub object: String,
}

/// A single compiler diagnostic (error, warning or info).
#[derive(Clone, Debug, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub message: String,
    #[serde(rename = "formattedMessage")]
    pub formatted_message: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == "error"
    }
}

impl CompilationOutput {
    /// Errors reported by the compiler, if any. Warnings don't count.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.formatted_message.clone().unwrap_or_else(|| d.message.clone()))
            .collect()
    }

    /// Look up one contract from one source file.
    pub fn contract(&self, file_name: &str, contract_name: &str) -> Result<&CompiledContract> {
        self.contracts
            .get(file_name)
            .and_then(|c| c.get(contract_name))
            .ok_or_else(|| Error::ContractNotFound(file_name.to_string(), contract_name.to_string()))
    }

    /// Bytecode and ABI of one contract, ready for deployment.
    pub fn artifact(&self, file_name: &str, contract_name: &str) -> Result<(Bytes, Abi)> {
        let contract = self.contract(file_name, contract_name)?;
        Ok((contract.bytecode(contract_name)?, contract.abi.clone()))
    }
}

impl CompiledContract {
    /// Decoded creation bytecode. Abstract contracts and interfaces have none.
    pub fn bytecode(&self, contract_name: &str) -> Result<Bytes> {
        let object = self
            .evm
            .as_ref()
            .and_then(|evm| evm.bytecode.as_ref())
            .map(|b| b.object.trim_start_matches("0x"))
            .unwrap_or_default();

        if object.is_empty() {
            return Err(Error::MissingBytecode(contract_name.to_string()))
        }

        match hex::decode(object) {
            Ok(code) => Ok(Bytes::from(code)),
            // Unlinked library placeholders (`__$...$__`) land here as well.
            Err(e) => Err(Error::Compile(format!("invalid bytecode for {contract_name}: {e}"))),
        }
    }
}

/// Something that turns a [`CompilerInput`] into a [`CompilationOutput`].
pub trait SolidityCompiler {
    fn compile_input(&self, input: &CompilerInput) -> Result<CompilationOutput>;

    /// Compile a single source file held in memory.
    fn compile(&self, file_name: &str, source: &str) -> Result<CompilationOutput> {
        let input = CompilerInput::new(file_name, source);
        let output = self.compile_input(&input)?;

        for diag in output.errors.iter().filter(|d| !d.is_error()) {
            warn!(target: "solflow::compiler", "[{}] {}", file_name, diag.message);
        }

        let errors = output.error_messages();
        if !errors.is_empty() {
            return Err(Error::Compile(errors.join("\n")))
        }

        debug!(
            target: "solflow::compiler",
            "Compiled {} contract(s) from {}",
            output.contracts.get(file_name).map(|c| c.len()).unwrap_or(0),
            file_name,
        );

        Ok(output)
    }

    /// Read a source file from disk and compile it under its file name.
    fn compile_file(&self, path: &Path) -> Result<(String, CompilationOutput)> {
        let source = fs::read_to_string(path)?;
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| Error::Config(format!("invalid source path {}", path.display())))?
            .to_string();

        let output = self.compile(&file_name, &source)?;
        Ok((file_name, output))
    }
}

/// The `solc` binary, driven through its standard JSON interface.
#[derive(Clone, Debug)]
pub struct SolcCompiler {
    solc: Solc,
}

impl SolcCompiler {
    /// Use the `solc` found at `path`, or the default one from `$PATH`.
    pub fn new(path: Option<&str>) -> Self {
        let solc = match path {
            Some(p) => Solc::new(p),
            None => Solc::default(),
        };

        Self { solc }
    }
}

impl Default for SolcCompiler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SolidityCompiler for SolcCompiler {
    fn compile_input(&self, input: &CompilerInput) -> Result<CompilationOutput> {
        debug!(target: "solflow::compiler", "Invoking {}", self.solc.solc.display());
        self.solc.compile_as(input).map_err(|e| Error::Compile(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = include_str!("../tests/fixtures/compiler_output.json");

    struct Canned(&'static str);

    impl SolidityCompiler for Canned {
        fn compile_input(&self, _input: &CompilerInput) -> Result<CompilationOutput> {
            serde_json::from_str(self.0).map_err(|e| Error::Compile(e.to_string()))
        }
    }

    #[test]
    fn input_selects_every_artifact() {
        let input = CompilerInput::new("Incrementer.sol", "contract A {}");
        let json = serde_json::to_value(&input).unwrap();

        assert_eq!(json["language"], "Solidity");
        assert_eq!(json["sources"]["Incrementer.sol"]["content"], "contract A {}");
        assert_eq!(json["settings"]["outputSelection"]["*"]["*"][0], "*");
    }

    #[test]
    fn extracts_bytecode_and_abi() {
        let output = Canned(OUTPUT).compile("Incrementer.sol", "").unwrap();
        let (bytecode, abi) = output.artifact("Incrementer.sol", "Incrementer").unwrap();

        assert!(!bytecode.is_empty());
        assert!(abi.constructor().is_some());
        assert!(abi.function("getNumber").is_ok());
        assert!(abi.function("increment").is_ok());
        assert!(abi.event("Increment").is_ok());
    }

    #[test]
    fn unknown_contract() {
        let output = Canned(OUTPUT).compile("Incrementer.sol", "").unwrap();
        assert!(matches!(
            output.artifact("Incrementer.sol", "Decrementer"),
            Err(Error::ContractNotFound(_, _))
        ));
        assert!(matches!(
            output.artifact("Other.sol", "Incrementer"),
            Err(Error::ContractNotFound(_, _))
        ));
    }

    #[test]
    fn interface_has_no_bytecode() {
        let output = Canned(OUTPUT).compile("Incrementer.sol", "").unwrap();
        assert!(matches!(
            output.artifact("Incrementer.sol", "IIncrementer"),
            Err(Error::MissingBytecode(_))
        ));
    }

    #[test]
    fn compiler_errors_fail_compilation() {
        let broken = r#"{
            "errors": [
                {"severity": "warning", "message": "unused variable"},
                {"severity": "error", "message": "Expected ';' but got '}'",
                 "formattedMessage": "ParserError: Expected ';' but got '}'"}
            ]
        }"#;

        match Canned(broken).compile("Broken.sol", "") {
            Err(Error::Compile(msg)) => {
                assert!(msg.contains("ParserError"));
                assert!(!msg.contains("unused variable"));
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn warnings_do_not_fail_compilation() {
        let warned = r#"{"errors": [{"severity": "warning", "message": "SPDX license"}]}"#;
        let output = Canned(warned).compile("Warned.sol", "").unwrap();
        assert!(output.error_messages().is_empty());
    }
}
