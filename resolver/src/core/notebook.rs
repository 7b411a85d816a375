//! Notebook documents and output reconciliation.
//!
//! Outputs are expensive to recompute, so when the oracle regenerates a
//! notebook the outputs of the previous version are carried over wherever the
//! code is provably unchanged. "Unchanged" is strict: the i-th code cell of the
//! new document must have exactly the source of the i-th code cell of the
//! original. Any miss fails the whole reconciliation and the caller re-executes
//! the entire document; there is no partial restore.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{NotebookFormatError, ReconciliationFailure};

const NOTEBOOK_SCHEMA: &str = include_str!("../../schemas/notebook.schema.json");

static NOTEBOOK_VALIDATOR: LazyLock<Result<jsonschema::Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(NOTEBOOK_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::validator_for(&schema).map_err(|err| err.to_string())
});

/// nbformat v4 document. Unknown top-level keys are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub nbformat: u32,
    pub nbformat_minor: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Code(CodeCell),
    Markdown(TextCell),
    Raw(TextCell),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    pub source: Source,
    pub execution_count: Option<u64>,
    /// Output records (`stream`, `display_data`, `execute_result`, `error`),
    /// copied verbatim and never interpreted.
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    pub source: Source,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cell source: nbformat allows a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Lines(Vec<String>),
}

impl Source {
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }
}

impl Notebook {
    /// Parse and schema-check notebook JSON.
    pub fn parse(content: &str) -> Result<Self, NotebookFormatError> {
        let value: Value = serde_json::from_str(content.trim())
            .map_err(|err| NotebookFormatError(format!("invalid JSON: {err}")))?;
        let validator = NOTEBOOK_VALIDATOR
            .as_ref()
            .map_err(|err| NotebookFormatError(format!("notebook schema unusable: {err}")))?;
        let messages: Vec<String> = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(NotebookFormatError(messages.join("; ")));
        }
        serde_json::from_value(value).map_err(|err| NotebookFormatError(err.to_string()))
    }

    pub fn render(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn code_cells(&self) -> impl Iterator<Item = &CodeCell> {
        self.cells.iter().filter_map(|cell| match cell {
            Cell::Code(code) => Some(code),
            _ => None,
        })
    }

    fn code_cells_mut(&mut self) -> impl Iterator<Item = &mut CodeCell> {
        self.cells.iter_mut().filter_map(|cell| match cell {
            Cell::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Remove every output record and execution counter.
    pub fn strip_outputs(&mut self) {
        for cell in self.code_cells_mut() {
            cell.outputs.clear();
            cell.execution_count = None;
        }
    }

    pub fn has_outputs(&self) -> bool {
        self.code_cells()
            .any(|cell| !cell.outputs.is_empty() || cell.execution_count.is_some())
    }

    /// Copy outputs and execution counters from `original` onto matching code
    /// cells. On failure `self` is left untouched.
    ///
    /// Returns the number of code cells restored.
    pub fn restore_outputs_from(&mut self, original: &Notebook) -> Result<usize, ReconciliationFailure> {
        let prior: Vec<&CodeCell> = original.code_cells().collect();
        let new_count = self.code_cells().count();
        if prior.len() != new_count {
            return Err(ReconciliationFailure::CellCountChanged {
                original: prior.len(),
                new: new_count,
            });
        }
        if let Some(index) = self
            .code_cells()
            .zip(&prior)
            .position(|(new, old)| new.source.text() != old.source.text())
        {
            return Err(ReconciliationFailure::SourceMismatch { index });
        }
        for (cell, old) in self.code_cells_mut().zip(prior) {
            cell.outputs = old.outputs.clone();
            cell.execution_count = old.execution_count;
        }
        Ok(new_count)
    }
}

/// Render `content` with all outputs removed, for inclusion in a prompt.
pub fn erase_outputs(content: &str) -> Result<String, NotebookFormatError> {
    let mut notebook = Notebook::parse(content)?;
    notebook.strip_outputs();
    notebook
        .render()
        .map_err(|err| NotebookFormatError(err.to_string()))
}
