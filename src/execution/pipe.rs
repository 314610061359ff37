//! Exchange with the engine through named pipes.
//!
//! Protocol for one call:
//! 1. every output path and the parameter path become FIFOs;
//! 2. a writer task feeds the parameter document into its FIFO;
//! 3. a reader task drains every output FIFO and parses it. It reports that
//!    it has started before any blocking open, and the engine is launched
//!    only after that report;
//! 4. once the engine exits, outputs it never opened are released so their
//!    drains see EOF, then the reader is joined;
//! 5. a writer still waiting for the engine to open the parameter FIFO is
//!    released the same way.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::{sync::oneshot, task};
use tracing::debug;

use super::{fifo, prepare, ExecutionResult, Table, Transport};
use crate::{
    error::{CambError, Result},
    params::{write_document, Params},
    plan::OutputPlan,
    process::ProcessRunner,
};

#[derive(Debug, Clone)]
pub struct PipeTransport {
    runner: ProcessRunner,
    plan: OutputPlan,
}

/// Progress of one pipe end owned by a background task.
#[derive(Debug, Default)]
struct PipeState {
    opened: AtomicBool,
    finished: AtomicBool,
}

#[derive(Debug, Clone)]
struct OutputPipe {
    key: Option<&'static str>,
    path: PathBuf,
    state: Arc<PipeState>,
}

impl PipeTransport {
    pub fn new(runner: ProcessRunner, plan: OutputPlan) -> Self {
        Self { runner, plan }
    }
}

impl Transport for PipeTransport {
    async fn execute(&self, params: &Params) -> Result<ExecutionResult> {
        // `files` unlinks every FIFO when it goes out of scope.
        let (files, params) = prepare(&self.plan, params)?;

        let mut pipes = Vec::with_capacity(files.outputs().len());
        for out in files.outputs() {
            fifo::create(out.path()).map_err(|source| CambError::Scratch {
                path: out.path().to_path_buf(),
                source,
            })?;
            pipes.push(OutputPipe {
                key: out.slot.result_key(),
                path: out.path().to_path_buf(),
                state: Arc::default(),
            });
        }
        let param_path = files.param_path().to_path_buf();
        fifo::create(&param_path).map_err(|source| CambError::Scratch {
            path: param_path.clone(),
            source,
        })?;

        let writer_state = Arc::new(PipeState::default());
        let writer = {
            let (path, state) = (param_path.clone(), writer_state.clone());
            let document = write_document(&params);
            task::spawn_blocking(move || {
                let res = fifo::open_writer(&path).and_then(|mut f| {
                    state.opened.store(true, Ordering::Release);
                    f.write_all(document.as_bytes())
                });
                state.finished.store(true, Ordering::Release);
                res
            })
        };

        let (started_tx, started_rx) = oneshot::channel();
        let reader = tokio::spawn(read_outputs(pipes.clone(), started_tx));
        // A dropped sender means the reader already ended; its join reports why.
        let _ = started_rx.await;

        let run = self.runner.run(&param_path).await;

        let consumed = pipes.iter().filter(|p| p.state.opened.load(Ordering::Acquire)).count();
        debug!("engine exited, {}/{} output pipes consumed", consumed, pipes.len());
        let pending: Vec<OutputPipe> = pipes
            .iter()
            .filter(|p| !p.state.finished.load(Ordering::Acquire))
            .cloned()
            .collect();
        if !pending.is_empty() {
            task::spawn_blocking(move || {
                for p in &pending {
                    fifo::release_reader(&p.path, &p.state.finished);
                }
            })
            .await?;
        }
        let tables = reader.await?;

        if !writer_state.finished.load(Ordering::Acquire) {
            debug!("engine never read its parameters, releasing writer");
            let state = writer_state.clone();
            task::spawn_blocking(move || fifo::release_writer(&param_path, &state.finished)).await?;
        }
        if let Err(e) = writer.await? {
            debug!("parameter pipe write failed: {}", e);
        }

        let run = run?;
        Ok(ExecutionResult {
            tables,
            log: run.log,
            exit_code: run.exit_code,
        })
    }
}

/// Drain every output pipe concurrently so the engine may open them in any
/// order. Signals `started` before the first blocking open.
async fn read_outputs(pipes: Vec<OutputPipe>, started: oneshot::Sender<()>) -> BTreeMap<String, Table> {
    let drains: Vec<_> = pipes
        .into_iter()
        .map(|pipe| task::spawn_blocking(move || drain(&pipe).map(|t| (pipe.key, t))))
        .collect();
    let _ = started.send(());

    let mut tables = BTreeMap::new();
    for d in drains {
        match d.await {
            Ok(Some((Some(key), table))) => {
                tables.insert(key.to_string(), table);
            }
            Ok(_) => {}
            Err(e) => debug!("output drain panicked: {}", e),
        }
    }
    tables
}

fn drain(pipe: &OutputPipe) -> Option<Table> {
    let res = fifo::open_reader(&pipe.path).and_then(|mut f| {
        pipe.state.opened.store(true, Ordering::Release);
        let mut text = String::new();
        f.read_to_string(&mut text).map(|_| text)
    });
    pipe.state.finished.store(true, Ordering::Release);

    let text = match res {
        Ok(t) => t,
        Err(e) => {
            debug!("reading {}: {}", pipe.path.display(), e);
            return None;
        }
    };
    match Table::parse(&text) {
        Ok(t) => {
            debug!("read {} ({}x{})", pipe.key.unwrap_or("-"), t.nrows(), t.ncols());
            Some(t)
        }
        Err(e) => {
            debug!("discarding {}: {}", pipe.path.display(), e);
            None
        }
    }
}
