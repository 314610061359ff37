//! Exchange with the engine through ordinary scratch files.

use std::fs;

use tracing::debug;

use super::{prepare, read_table, ExecutionResult, Transport};
use crate::{
    error::{CambError, Result},
    params::{write_document, Params},
    plan::OutputPlan,
    process::ProcessRunner,
};

#[derive(Debug, Clone)]
pub struct DiskTransport {
    runner: ProcessRunner,
    plan: OutputPlan,
}

impl DiskTransport {
    pub fn new(runner: ProcessRunner, plan: OutputPlan) -> Self {
        Self { runner, plan }
    }
}

impl Transport for DiskTransport {
    async fn execute(&self, params: &Params) -> Result<ExecutionResult> {
        // `files` removes every scratch path when it goes out of scope.
        let (files, params) = prepare(&self.plan, params)?;

        fs::write(files.param_path(), write_document(&params)).map_err(|source| CambError::Scratch {
            path: files.param_path().to_path_buf(),
            source,
        })?;

        let run = self.runner.run(files.param_path()).await?;

        let mut result = ExecutionResult {
            log: run.log,
            exit_code: run.exit_code,
            ..Default::default()
        };
        for out in files.outputs() {
            let table = read_table(out.path());
            if let (Some(key), Some(table)) = (out.slot.result_key(), table) {
                debug!("read {} ({}x{})", key, table.nrows(), table.ncols());
                result.tables.insert(key.to_string(), table);
            }
        }
        Ok(result)
    }
}
