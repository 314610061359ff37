//! Caller-facing handle: one resolved engine, one defaults template, one transport.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    config::Settings,
    derivative::{derivative, DerivativeResult},
    error::{CambError, Result},
    execution::{disk::DiskTransport, Backend, ExecutionResult, Protocol, Transport},
    params::{DocumentSource, Overrides, ParamStore, Params},
    plan::OutputPlan,
    process::{resolve_executable, ProcessRunner},
};

#[derive(Debug, Clone, Default)]
pub struct CambOptions {
    /// Engine binary; `None` looks for `camb` next to the running executable.
    pub executable: Option<PathBuf>,
    /// Defaults template; `None` uses the bundled one.
    pub defaults: Option<DocumentSource>,
    pub protocol: Protocol,
    /// Where scratch files and pipes are created; `None` is the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Camb {
    store: ParamStore,
    backend: Backend,
    executable: PathBuf,
}

impl Camb {
    pub fn load(options: CambOptions) -> Result<Self> {
        let store = match options.defaults {
            Some(source) => ParamStore::new(source)?,
            None => ParamStore::load_defaults()?,
        };
        let executable = resolve_executable(options.executable.as_deref())?;

        let scratch = options.scratch_dir.unwrap_or_else(env::temp_dir);
        let scratch = if scratch.is_absolute() {
            scratch
        } else {
            env::current_dir()
                .map_err(|source| CambError::Scratch {
                    path: scratch.clone(),
                    source,
                })?
                .join(scratch)
        };

        let runner = ProcessRunner::new(executable.clone(), &scratch).with_timeout(options.timeout);
        let plan = OutputPlan::new(scratch);
        let backend = match options.protocol {
            Protocol::Disk => Backend::Disk(DiskTransport::new(runner, plan)),
            #[cfg(unix)]
            Protocol::Pipe => Backend::Pipe(crate::execution::pipe::PipeTransport::new(runner, plan)),
            #[cfg(not(unix))]
            Protocol::Pipe => return Err(CambError::UnsupportedProtocol(options.protocol.to_string())),
        };
        Ok(Self {
            store,
            backend,
            executable,
        })
    }

    /// Build from runner settings (`CAMB_*` keys).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::load(CambOptions {
            executable: settings.executable(),
            defaults: settings.defaults_path().map(DocumentSource::Path),
            protocol: settings.protocol()?,
            scratch_dir: settings.scratch_dir(),
            timeout: settings.timeout(),
        })
    }

    pub fn defaults(&self) -> &Params {
        self.store.defaults()
    }

    pub fn protocol(&self) -> Protocol {
        self.backend.protocol()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The document the engine would receive, before output paths are added.
    pub fn params(&self, overrides: &Overrides) -> Result<Params> {
        self.store.merge(overrides)
    }

    pub async fn call(&self, overrides: &Overrides) -> Result<ExecutionResult> {
        self.backend.execute(&self.store.merge(overrides)?).await
    }

    pub async fn derivative(&self, param: &str, overrides: &Overrides, epsilon: f64) -> Result<DerivativeResult> {
        derivative(&self.store, &self.backend, param, overrides, epsilon).await
    }
}
