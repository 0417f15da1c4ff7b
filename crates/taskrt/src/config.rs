//! Runtime options: the benchmarking protocol and dispatch-table recovery policy.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{TaskError, TaskResult};

/// Parameters of the candidate timing protocol.
///
/// Each candidate runs `warmup` untimed times, then `repeat` timed rounds of `number`
/// back-to-back launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub warmup: usize,
    pub number: usize,
    pub repeat: usize,
}

impl BenchConfig {
    pub fn new(warmup: usize, number: usize, repeat: usize) -> TaskResult<Self> {
        let config = Self {
            warmup,
            number,
            repeat,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TaskResult<()> {
        if self.number == 0 {
            return Err(TaskError::configuration(
                "benchmark `number` must be at least 1",
            ));
        }
        if self.repeat == 0 {
            return Err(TaskError::configuration(
                "benchmark `repeat` must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            warmup: 1,
            number: 1,
            repeat: 1,
        }
    }
}

/// Parses `warmup,number,repeat`.
impl FromStr for BenchConfig {
    type Err = TaskError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts = raw
            .split(',')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                TaskError::configuration(format!("invalid benchmark config '{raw}': {err}"))
            })?;
        match parts.as_slice() {
            [warmup, number, repeat] => BenchConfig::new(*warmup, *number, *repeat),
            _ => Err(TaskError::configuration(format!(
                "benchmark config '{raw}' must be `warmup,number,repeat`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub bench: BenchConfig,
    /// Start from an empty table when the persisted one is corrupt, instead of failing the
    /// load. The corrupt file is deleted either way.
    pub recover_corrupt_table: bool,
}

impl RuntimeOptions {
    /// Defaults overlaid with `TASKRT_BENCH_CONFIG` and `TASKRT_RECOVER_DISPATCH_TABLE`.
    pub fn from_env() -> TaskResult<Self> {
        RuntimeOptions::default().apply_overrides(
            env::bench_config_override().as_deref(),
            env::recover_dispatch_table_override(),
        )
    }

    /// Overlays a raw `warmup,number,repeat` triple and a recovery flag, when present.
    pub fn apply_overrides(
        mut self,
        bench: Option<&str>,
        recover: Option<bool>,
    ) -> TaskResult<Self> {
        if let Some(raw) = bench {
            self.bench = raw.parse()?;
        }
        if let Some(recover) = recover {
            self.recover_corrupt_table = recover;
        }
        Ok(self)
    }

    pub fn validate(&self) -> TaskResult<()> {
        self.bench.validate()
    }
}
