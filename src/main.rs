mod cli;
mod printer;

use anyhow::{Context, Result};
use camb4rs::{
    config::Settings, logging::init_logging, params::write_document, Camb, Overrides, ParamValue,
};
use printer::{write_tables, SummaryPrinter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);

    // CLI flags override settings
    let mut settings = Settings::load();
    if let Some(p) = &args.executable {
        settings.set("CAMB_EXECUTABLE", p.to_string_lossy());
    }
    if let Some(p) = &args.protocol {
        settings.set("CAMB_PROTOCOL", p.as_str());
    }
    if let Some(p) = &args.defaults {
        settings.set("CAMB_DEFAULTS", p.to_string_lossy());
    }
    if let Some(p) = &args.scratch_dir {
        settings.set("CAMB_SCRATCH_DIR", p.to_string_lossy());
    }
    if let Some(t) = args.timeout {
        settings.set("CAMB_TIMEOUT", t.to_string());
    }

    let camb = Camb::from_settings(&settings).context("setting up CAMB")?;

    let overrides: Overrides = args
        .params
        .iter()
        .map(|(k, v)| (k.clone(), ParamValue::Text(v.clone())))
        .collect();

    if args.show_params {
        print!("{}", write_document(&camb.params(&overrides)?));
        return Ok(());
    }

    let printer = SummaryPrinter::default();
    match (args.derivative.as_deref(), args.epsilon) {
        (Some(param), Some(epsilon)) => {
            let result = camb
                .derivative(param, &overrides, epsilon)
                .await
                .with_context(|| format!("differentiating with respect to {param}"))?;
            if let Some(dir) = &args.output_dir {
                write_tables(dir, &result.tables)?;
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                printer.header(&format!("d/d{} via {} ({})", param, camb.protocol(), camb.executable().display()));
                printer.tables(&result.tables);
                if args.show_log {
                    printer.log("low run", &result.logs.0);
                    printer.log("high run", &result.logs.1);
                }
            }
        }
        _ => {
            let result = camb.call(&overrides).await.context("running CAMB")?;
            if let Some(dir) = &args.output_dir {
                write_tables(dir, &result.tables)?;
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                printer.header(&format!("CAMB via {} ({})", camb.protocol(), camb.executable().display()));
                printer.tables(&result.tables);
                match result.exit_code {
                    Some(0) => {}
                    Some(code) => printer.warn(&format!("CAMB exited with code {code}")),
                    None => printer.warn("CAMB did not exit normally"),
                }
                if args.show_log {
                    printer.log("log", &result.log);
                }
            }
        }
    }
    Ok(())
}
