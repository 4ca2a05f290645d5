use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use cml::{CmlCompiler, DesignKitPackager};
use config::{Config, DrcPolicy, Product, ToolLocator};
use klayout::{DrcOutcome, DrcParams, run_drc};
use lumerical::simulation::Sweep;
use lumerical::{
    BatchSession, InterconnectPackager, LossTable, WaveguideDesign, WaveguideGeometry,
    WaveguideSimulation, YBranchSpec,
};
use techgen::{AssembleParams, Process, assemble};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load().with_context(|| "failed to load pdkgen configuration")?;
    if let Some(policy) = &cli.policy {
        config.drc.policy = policy
            .parse::<DrcPolicy>()
            .with_context(|| "invalid value for --policy")?;
    }

    match cli.command {
        Command::Techgen {
            process,
            out,
            tech_name,
        } => techgen(&process, &out, tech_name.as_deref()),
        Command::Drc {
            tech,
            gds,
            component,
            work_dir,
        } => drc(&config, &tech, &gds, &component, &work_dir),
        Command::Cml { verb, dir } => run_cml(&compiler(&config, &dir)?, &verb),
        Command::CmlGenerate { name, dir, version } => {
            let locator = config.locator();
            let session = BatchSession::from_locator(
                Product::Interconnect,
                &locator,
                dir.join("interconnect"),
            )?;
            let mut packager = InterconnectPackager::new(session);
            let cml = compiler(&config, &dir)?.generate_cml(
                &name,
                version.as_deref(),
                &mut packager as &mut dyn DesignKitPackager,
            )?;
            println!("{}", cml.display());
            Ok(())
        }
        Command::CmlTemplate { name, dir } => {
            let lib_dir = compiler(&config, &dir)?.generate_cml_template(&name)?;
            println!("{}", lib_dir.display());
            Ok(())
        }
        Command::Sweep(sweep) => run_sweep(&config.locator(), sweep),
        Command::Optimize { spec, out } => optimize(&config.locator(), &spec, &out),
    }
}

/// Silicon photonics PDK generation.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Increases log verbosity. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// How DRC continuation decisions are made: prompt, continue or abort.
    #[arg(long, global = true)]
    policy: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generates KLayout and Lumerical technology files from a process YAML.
    Techgen {
        process: PathBuf,
        /// The technology folder is created inside this directory.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Overrides the technology name given in the process.
        #[arg(long)]
        tech_name: Option<String>,
    },
    /// Runs a technology's DRC rule deck on a layout.
    Drc {
        tech: String,
        gds: PathBuf,
        component: String,
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },
    /// Runs a cml-compiler command.
    Cml {
        verb: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Compiles a compact model library into a versioned `.cml` file.
    CmlGenerate {
        name: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Defaults to today's date.
        #[arg(long)]
        version: Option<String>,
    },
    /// Creates a new compact model library compilation.
    CmlTemplate {
        name: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Sweeps a waveguide design parameter and simulates each layout.
    Sweep(SweepArgs),
    /// Optimizes a Y-branch splitter shape.
    Optimize {
        spec: PathBuf,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct SweepArgs {
    #[command(subcommand)]
    kind: SweepKind,
    /// The waveguide design YAML.
    #[arg(long, global = true)]
    design: Option<PathBuf>,
    /// The Lumerical process file (`.lbr`).
    #[arg(long, global = true)]
    process: Option<PathBuf>,
    #[arg(short, long, global = true, default_value = ".")]
    out: PathBuf,
    /// Writes compact models for the optimum found.
    #[arg(long, global = true)]
    compact_model: bool,
}

/// Sweep bounds are in microns, except for the Bezier parameter.
#[derive(Subcommand)]
enum SweepKind {
    /// Effective index against waveguide width.
    Width { start: f64, end: f64, step: f64 },
    /// Bend loss against bend radius.
    Radius {
        start: f64,
        end: f64,
        step: f64,
        /// Defaults to the design width.
        #[arg(long)]
        width: Option<f64>,
    },
    /// Bend loss against the Bezier parameter of an adiabatic bend.
    Bezier {
        start: f64,
        end: f64,
        step: f64,
        /// Defaults to the design radius.
        #[arg(long)]
        radius: Option<f64>,
        /// Defaults to the design width.
        #[arg(long)]
        width: Option<f64>,
    },
}

fn compiler(config: &Config, dir: &Path) -> anyhow::Result<CmlCompiler> {
    let mut compiler = CmlCompiler::from_locator(&config.locator(), dir)?;
    if let Some(key) = &config.cml.publisher_key {
        compiler = compiler.with_publisher_key(key);
    }
    Ok(compiler)
}

/// Runs one `cml-compiler` verb. An unsupported verb is only warned about.
fn run_cml(compiler: &CmlCompiler, verb: &str) -> anyhow::Result<()> {
    compiler.run_verb(verb)?;
    Ok(())
}

fn techgen(process: &Path, out: &Path, tech_name: Option<&str>) -> anyhow::Result<()> {
    let process = Process::from_file(process)
        .with_context(|| format!("failed to read process `{}`", process.display()))?;
    let files = assemble(AssembleParams {
        process: &process,
        out_dir: out,
        tech_name,
        mapping: None,
    })?;
    for path in files.paths() {
        println!("{}", path.display());
    }
    Ok(())
}

fn drc(config: &Config, tech: &str, gds: &Path, component: &str, work_dir: &Path) -> anyhow::Result<()> {
    let params = DrcParams {
        tech_name: tech,
        layout_path: gds,
        component_name: component,
        work_dir,
    };
    let mut decider = config.decider();
    match run_drc(&params, &config.locator(), decider.as_mut())? {
        DrcOutcome::Skipped(reason) => Err(anyhow!("DRC was not run: {reason:?}")),
        DrcOutcome::Completed {
            total_errors,
            results_path,
            proceed,
        } => {
            tracing::info!(total_errors, results = %results_path.display(), "DRC complete");
            if !proceed {
                bail!("stopped after DRC with {total_errors} violations");
            }
            Ok(())
        }
    }
}

fn required<'a>(value: &'a Option<PathBuf>, flag: &str) -> anyhow::Result<&'a Path> {
    value
        .as_deref()
        .ok_or_else(|| anyhow!("sweeps require --{flag}"))
}

fn best_loss(sweep: &Sweep<LossTable>) -> Option<f64> {
    sweep
        .table
        .rows
        .iter()
        .min_by(|a, b| a.fundamental.total_cmp(&b.fundamental))
        .map(|row| row.parameter)
}

fn run_sweep(locator: &ToolLocator, args: SweepArgs) -> anyhow::Result<()> {
    let design_path = required(&args.design, "design")?;
    let process = required(&args.process, "process")?;
    let design = WaveguideDesign::from_file(design_path)
        .with_context(|| format!("failed to read design `{}`", design_path.display()))?;
    let geometry = WaveguideGeometry::new(&design, args.out.join("gds"), locator);
    let mode = BatchSession::from_locator(Product::Mode, locator, args.out.join("mode"))?;
    let fdtd = BatchSession::from_locator(Product::Fdtd, locator, args.out.join("fdtd"))?;
    let mut sim = WaveguideSimulation::new(&design, process, &args.out, mode, fdtd)?;

    let defaults = design.design_params;
    let (mut width, mut radius, mut bezier) = (defaults.width, defaults.radius, defaults.bezier);
    match args.kind {
        SweepKind::Width { start, end, step } => {
            let mapping = geometry.sweep_width(start, end, step)?;
            let sweep = sim.neff_sweep_width(&mapping)?;
            println!("{}", sweep.csv.display());
            match sim.optimize_width(&sweep.table) {
                Some(w) => {
                    tracing::info!(width = w, "optimal width");
                    width = w;
                }
                None => tracing::warn!("no width guides only the intended mode"),
            }
        }
        SweepKind::Radius {
            start,
            end,
            step,
            width: w,
        } => {
            width = w.unwrap_or(width);
            let mapping = geometry.sweep_radius(width, start, end, step)?;
            let sweep = sim.loss_sweep_bend_radii(&mapping, width)?;
            println!("{}", sweep.csv.display());
            if let Some(r) = best_loss(&sweep) {
                tracing::info!(radius = r, "lowest loss radius");
            }
        }
        SweepKind::Bezier {
            start,
            end,
            step,
            radius: r,
            width: w,
        } => {
            width = w.unwrap_or(width);
            radius = r.unwrap_or(radius);
            let mapping = geometry.sweep_bezier(width, radius, start, end, step)?;
            match sim.loss_sweep_bezier(&mapping, radius, width)? {
                Some(sweep) => {
                    println!("{}", sweep.csv.display());
                    if let Some(b) = sim.optimize_bezier(&sweep.table) {
                        tracing::info!(bezier = b, "optimal bezier parameter");
                        bezier = b;
                    }
                }
                None => tracing::warn!(radius, "radius exceeds the simulation region; nothing simulated"),
            }
        }
    }

    if args.compact_model {
        let models = sim.generate_compact_model_files(&geometry, width, radius, bezier, true)?;
        for dir in models.keys() {
            println!("{}", dir.display());
        }
    }
    Ok(())
}

fn optimize(locator: &ToolLocator, spec: &Path, out: &Path) -> anyhow::Result<()> {
    let spec = YBranchSpec::from_file(spec)
        .with_context(|| format!("failed to read Y-branch design `{}`", spec.display()))?;
    let session = BatchSession::from_locator(Product::Fdtd, locator, out.join("fdtd"))?;
    let result = lumerical::ybranch::optimize_ybranch(&spec, session, out)?;
    tracing::info!(
        fom = result.optimization.fom,
        stop = ?result.optimization.stop,
        "Y-branch optimization finished"
    );
    for path in [&result.parameters_file, &result.report_file, &result.gds_file] {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unsupported_cml_verbs_are_not_errors() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["pdkgen", "cml", "bogus", "--dir", "lib"])?;
        let Command::Cml { verb, dir } = cli.command else {
            panic!("expected a cml command");
        };
        let build = Path::new(env!("CARGO_MANIFEST_DIR")).join("build");
        let compiler = CmlCompiler::new(build.join("missing-cml-compiler"), build.join(dir));
        run_cml(&compiler, &verb)?;
        assert!(run_cml(&compiler, "library").is_err());
        Ok(())
    }

    #[test]
    fn sweep_flags_follow_the_kind() {
        let cli = Cli::try_parse_from([
            "pdkgen", "-vv", "sweep", "radius", "1", "10", "1", "--width", "0.5", "--design",
            "wg.yaml", "--process", "EBeam.lbr",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Sweep(sweep) = cli.command else {
            panic!("expected a sweep");
        };
        assert_eq!(sweep.design.as_deref(), Some(Path::new("wg.yaml")));
        let SweepKind::Radius {
            start,
            end,
            step,
            width,
        } = sweep.kind
        else {
            panic!("expected a radius sweep");
        };
        assert_eq!((start, end, step, width), (1., 10., 1., Some(0.5)));
    }
}
