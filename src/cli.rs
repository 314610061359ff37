use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "camb4rs", about = "Run CAMB with parameter overrides and collect its output tables", version)]
#[command(group(ArgGroup::new("output_mode").args(["json", "show_params"]).multiple(false)))]
pub struct Cli {
    /// Parameter overrides, e.g. `get_scalar_cls=T hubble=67.5`.
    #[arg(value_name = "KEY=VALUE", value_parser = parse_override)]
    pub params: Vec<(String, String)>,

    /// CAMB executable (default: CAMB_EXECUTABLE, then `camb` next to this binary).
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// How parameters and outputs are exchanged with CAMB: disk or pipe.
    #[arg(long)]
    pub protocol: Option<String>,

    /// Parameter file used as defaults instead of the bundled one.
    #[arg(long)]
    pub defaults: Option<PathBuf>,

    /// Directory for scratch files and pipes.
    #[arg(long = "scratch-dir")]
    pub scratch_dir: Option<PathBuf>,

    /// Kill CAMB after this many seconds (0 disables).
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub timeout: Option<u64>,

    /// Differentiate every output table with respect to this parameter.
    #[arg(long, requires = "epsilon")]
    pub derivative: Option<String>,

    /// Step used for --derivative.
    #[arg(long, requires = "derivative", value_parser = clap::value_parser!(f64))]
    pub epsilon: Option<f64>,

    /// Write each table to <DIR>/<name>.dat.
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Print the whole result as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print the merged parameter document and exit without running CAMB.
    #[arg(long = "show-params")]
    pub show_params: bool,

    /// Print CAMB's output after the summary.
    #[arg(long = "show-log")]
    pub show_log: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

fn parse_override(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((k.to_string(), v.trim().to_string()))
}
