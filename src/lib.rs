//! Run the CAMB cosmology code from Rust.
//!
//! Parameters are merged with a defaults template, written to a scratch file
//! or named pipe, and the tables the engine writes come back parsed:
//!
//! ```no_run
//! use camb4rs::{Camb, CambOptions, Overrides};
//!
//! # async fn demo() -> camb4rs::Result<()> {
//! let camb = Camb::load(CambOptions {
//!     executable: Some("/opt/camb/camb".into()),
//!     ..Default::default()
//! })?;
//! let mut params = Overrides::new();
//! params.insert("get_scalar_cls".into(), true.into());
//! let out = camb.call(&params).await?;
//! println!("{:?}", out.get("scalar").map(|t| t.shape()));
//! # Ok(())
//! # }
//! ```

pub mod camb;
pub mod config;
pub mod derivative;
pub mod error;
pub mod execution;
pub mod logging;
pub mod params;
pub mod plan;
pub mod process;

pub use camb::{Camb, CambOptions};
pub use derivative::DerivativeResult;
pub use error::{CambError, Result};
pub use execution::{ExecutionResult, Protocol, Table, Transport};
pub use params::{DocumentSource, Overrides, ParamValue, Params};
