use std::fs::{create_dir_all, read_to_string, write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Builder, Target};
use log::{info, LevelFilter};

use crate::frontend::parse;
use crate::ir::{cfg_to_dot, dominator_tree_to_dot};
use crate::ssa::CompileOptions;

mod diagnostics;
mod frontend;
mod ir;
mod ssa;
mod symbols;
mod utils;

#[derive(Parser)]
#[clap(about, version, author)]
struct Args {
    /// The file to compile
    #[clap(short, long)]
    target: PathBuf,

    /// Stop at the first error instead of collecting all of them
    #[clap(long)]
    strict: bool,

    /// Write a Graphviz file per function and dominator tree into this directory
    #[clap(long, value_name = "DIR")]
    graphs: Option<PathBuf>,

    /// Log every block, phi and loop rename as it is created
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(Target::Stderr)
        .format_timestamp(None)
        .init();

    let contents = read_to_string(&args.target).context("unable to open source file")?;
    let options = CompileOptions {
        exit_on_first_error: args.strict,
    };
    let (program, diagnostics) = parse(&contents, options)?;

    println!("{}", program);

    if let Some(dir) = &args.graphs {
        create_dir_all(dir)
            .with_context(|| format!("unable to create {}", dir.display()))?;
        let name = |id| program.identifier_name(id);
        for cfg in &program.cfgs {
            let path = dir.join(format!("{}.gv", cfg.name()));
            write(&path, cfg_to_dot(cfg, &name))
                .with_context(|| format!("unable to write {}", path.display()))?;
            let path = dir.join(format!("{}_dom.gv", cfg.name()));
            write(&path, dominator_tree_to_dot(cfg))
                .with_context(|| format!("unable to write {}", path.display()))?;
        }
        info!("wrote {} graphs to {}", program.cfgs.len() * 2, dir.display());
    }

    eprintln!(
        "{} errors, {} warnings",
        diagnostics.errors().len(),
        diagnostics.warnings().len()
    );
    if diagnostics.has_errors() {
        bail!("compilation failed");
    }
    Ok(())
}
