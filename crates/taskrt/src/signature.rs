//! Task metadata as stored in `meta.json`.
//!
//! A task signature names the dynamic dimensions of a compiled task, describes each input
//! and output tensor as a dtype followed by per-dimension sizes or symbol names, and
//! records how many candidate implementations were compiled for it.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{TaskError, TaskResult};

pub const META_FILE: &str = "meta.json";

/// Element types understood by compiled tasks, named as the compiler names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }
}

impl FromStr for DType {
    type Err = TaskError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let dtype = match value {
            "bool" => DType::Bool,
            "int8" => DType::I8,
            "int16" => DType::I16,
            "int32" => DType::I32,
            "int64" => DType::I64,
            "uint8" => DType::U8,
            "uint16" => DType::U16,
            "uint32" => DType::U32,
            "uint64" => DType::U64,
            "float16" => DType::F16,
            "bfloat16" => DType::BF16,
            "float32" => DType::F32,
            "float64" => DType::F64,
            other => {
                return Err(TaskError::configuration(format!(
                    "unknown dtype '{other}'"
                )))
            }
        };
        Ok(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dimension of a tensor signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Symbol(String),
}

impl Dimension {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Dimension::Symbol(name) => Some(name.as_str()),
            Dimension::Static(_) => None,
        }
    }
}

/// Raw element of a signature array: `["float32", "n", 8]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignatureItem {
    Size(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<SignatureItem>")]
pub struct TensorSignature {
    pub dtype: DType,
    pub dims: Vec<Dimension>,
}

impl TensorSignature {
    pub fn new(dtype: DType, dims: Vec<Dimension>) -> Self {
        Self { dtype, dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|dim| matches!(dim, Dimension::Static(_)))
    }
}

impl TryFrom<Vec<SignatureItem>> for TensorSignature {
    type Error = String;

    fn try_from(items: Vec<SignatureItem>) -> Result<Self, Self::Error> {
        let mut iter = items.into_iter();
        let dtype = match iter.next() {
            Some(SignatureItem::Name(name)) => name
                .parse::<DType>()
                .map_err(|_| format!("unknown dtype '{name}'"))?,
            Some(SignatureItem::Size(value)) => {
                return Err(format!("tensor signature must start with a dtype, found {value}"))
            }
            None => return Err("tensor signature is empty".to_string()),
        };
        let dims = iter
            .map(|item| match item {
                SignatureItem::Size(value) => usize::try_from(value)
                    .map(Dimension::Static)
                    .map_err(|_| format!("negative dimension {value} in tensor signature")),
                SignatureItem::Name(name) => Ok(Dimension::Symbol(name)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dtype, dims })
    }
}

impl Serialize for TensorSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.dims.len() + 1))?;
        seq.serialize_element(self.dtype.as_str())?;
        for dim in &self.dims {
            match dim {
                Dimension::Static(size) => seq.serialize_element(size)?,
                Dimension::Symbol(name) => seq.serialize_element(name)?,
            }
        }
        seq.end()
    }
}

/// Immutable descriptor of a compiled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSignature {
    pub symbols: Vec<String>,
    pub inputs: Vec<TensorSignature>,
    pub outputs: Vec<TensorSignature>,
    pub device: String,
    pub num_candidates: usize,
    /// Compatibility tag written by the compiler; carried through but never interpreted.
    #[serde(rename = "hidet_version")]
    pub compiler_version: String,
}

impl TaskSignature {
    /// Reads and validates `meta.json` from a task directory.
    pub fn load(task_dir: impl AsRef<Path>) -> TaskResult<Self> {
        let path = task_dir.as_ref().join(META_FILE);
        let contents = fs::read_to_string(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                TaskError::configuration(format!("missing task metadata {}", path.display()))
            }
            _ => TaskError::configuration(format!(
                "failed to read task metadata {}: {err}",
                path.display()
            )),
        })?;
        Self::from_json_str(&contents).map_err(|err| match err {
            TaskError::Configuration { message } => {
                TaskError::configuration(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_json_str(src: &str) -> TaskResult<Self> {
        let signature: TaskSignature = serde_json::from_str(src)
            .map_err(|err| TaskError::configuration(format!("malformed task metadata: {err}")))?;
        signature.validate()?;
        Ok(signature)
    }

    pub fn to_json_string(&self) -> TaskResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| TaskError::execution(format!("failed to encode task metadata: {err}")))
    }

    /// Writes `meta.json` into `task_dir`.
    pub fn save(&self, task_dir: impl AsRef<Path>) -> TaskResult<()> {
        let path = task_dir.as_ref().join(META_FILE);
        fs::write(&path, self.to_json_string()?).map_err(|err| TaskError::io(path, err))
    }

    pub fn validate(&self) -> TaskResult<()> {
        let mut declared = HashSet::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            if !declared.insert(symbol.as_str()) {
                return Err(TaskError::configuration(format!(
                    "symbol '{symbol}' is declared more than once"
                )));
            }
        }

        let mut bound = HashSet::new();
        for (tensor_index, input) in self.inputs.iter().enumerate() {
            for name in input.dims.iter().filter_map(Dimension::as_symbol) {
                if !declared.contains(name) {
                    return Err(TaskError::configuration(format!(
                        "input {tensor_index} uses undeclared symbol '{name}'"
                    )));
                }
                bound.insert(name);
            }
        }
        if let Some(unbound) = self.symbols.iter().find(|s| !bound.contains(s.as_str())) {
            return Err(TaskError::configuration(format!(
                "symbol '{unbound}' does not appear in any input"
            )));
        }

        if self.num_candidates == 0 {
            return Err(TaskError::configuration("task has no compiled candidates"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(symbols: serde_json::Value, inputs: serde_json::Value) -> String {
        json!({
            "symbols": symbols,
            "inputs": inputs,
            "outputs": [["float32", "n", 8]],
            "device": "cpu",
            "num_candidates": 2,
            "hidet_version": "0.3.0",
        })
        .to_string()
    }

    #[test]
    fn parses_mixed_dimensions() {
        let signature =
            TaskSignature::from_json_str(&meta(json!(["n"]), json!([["float32", "n", 8]])))
                .unwrap();
        assert_eq!(signature.symbols, vec!["n".to_string()]);
        assert_eq!(
            signature.inputs[0],
            TensorSignature::new(
                DType::F32,
                vec![Dimension::Symbol("n".into()), Dimension::Static(8)]
            )
        );
        assert_eq!(signature.compiler_version, "0.3.0");
        assert!(!signature.outputs[0].is_static());
    }

    #[test]
    fn encodes_back_to_the_same_layout() {
        let src = meta(json!(["n"]), json!([["int64", 3, "n"]]));
        let signature = TaskSignature::from_json_str(&src).unwrap();
        let encoded: serde_json::Value =
            serde_json::from_str(&signature.to_json_string().unwrap()).unwrap();
        assert_eq!(encoded["inputs"], json!([["int64", 3, "n"]]));
        assert_eq!(encoded["hidet_version"], json!("0.3.0"));
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let err = TaskSignature::from_json_str(&meta(
            json!(["n", "n"]),
            json!([["float32", "n"]]),
        ))
        .unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
    }

    #[test]
    fn rejects_undeclared_input_symbol() {
        let err =
            TaskSignature::from_json_str(&meta(json!(["n"]), json!([["float32", "n", "m"]])))
                .unwrap_err();
        assert!(err.to_string().contains("undeclared symbol 'm'"));
    }

    #[test]
    fn rejects_symbol_without_input_binding() {
        let err = TaskSignature::from_json_str(&meta(json!(["n", "m"]), json!([["float32", "n"]])))
            .unwrap_err();
        assert!(err.to_string().contains("'m'"));
    }

    #[test]
    fn rejects_unknown_dtype_and_negative_dims() {
        assert!(
            TaskSignature::from_json_str(&meta(json!([]), json!([["complex99", 4]]))).is_err()
        );
        assert!(TaskSignature::from_json_str(&meta(json!([]), json!([["float32", -1]]))).is_err());
    }
}
