//! L-shape benchmark
//!
//! Solves the Laplace equation on `[-1, 1]^2 \ [-1, 0]^2` with essential boundary values taken from the exact
//! solution `r^(2/3) sin(2a/3 + pi/3)`, adapting the mesh until the estimated error drops below `--err-stop`
//! (percent) or the coarse space reaches `--ndof-stop` DOFs.
//!
//! Exit codes: 0 accuracy reached, 1 failure, 2 DOF budget exhausted, 3 stagnation.

use clap::Parser;
use hp_adapt::adapt::FAILURE_EXIT_CODE;
use hp_adapt::benchmarks::lshape;
use hp_adapt::view::{JsonFrameWriter, ThreadedView};
use hp_adapt::{AdaptConfig, AdaptController, CandList, PoissonSolver, Strategy};
use log::{error, info};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lshape", version, about = "hp-adaptive solution of the L-shape benchmark", long_about = None)]
struct Args {
    /// JSON configuration file (upper-case keys); command line values take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for convergence graphs and frames
    #[arg(short, long, default_value = "lshape_output")]
    output: PathBuf,

    /// Write a JSON frame of the coarse solution at every step
    #[arg(long)]
    frames: bool,

    /// Number of initial uniform refinements
    #[arg(long)]
    init_ref_num: Option<usize>,

    /// Initial polynomial degree
    #[arg(long)]
    p_init: Option<u8>,

    /// Marking threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Marking strategy (0, 1 or 2)
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Candidate list (P_ISO, H_ISO, H_ANISO, HP_ISO, HP_ANISO_H, HP_ANISO)
    #[arg(long)]
    cand_list: Option<CandList>,

    /// Maximum level of hanging nodes (-1 for unbounded)
    #[arg(long, allow_hyphen_values = true)]
    mesh_regularity: Option<i64>,

    /// Exponent of the candidate cost in the selection score
    #[arg(long)]
    conv_exp: Option<f64>,

    /// Stopping tolerance on the estimated relative error (percent)
    #[arg(long)]
    err_stop: Option<f64>,

    /// Stop once the coarse space has this many DOFs
    #[arg(long)]
    ndof_stop: Option<usize>,

    /// Solve on the coarse mesh instead of projecting the fine solution
    #[arg(long)]
    solve_on_coarse_mesh: Option<bool>,
}

impl Args {
    fn build_config(&self) -> Result<AdaptConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => AdaptConfig::from_json_file(path)?,
            None => AdaptConfig::default(),
        };

        if let Some(n) = self.init_ref_num {
            config.init_ref_num = n;
        }
        if let Some(p) = self.p_init {
            config.p_init = p;
        }
        if let Some(t) = self.threshold {
            config.threshold = t;
        }
        if let Some(s) = self.strategy {
            config.strategy = s;
        }
        if let Some(cl) = self.cand_list {
            config.cand_list = cl;
        }
        if let Some(r) = self.mesh_regularity {
            config.mesh_regularity = if r < 0 { None } else { Some(u8::try_from(r)?) };
        }
        if let Some(c) = self.conv_exp {
            config.conv_exp = c;
        }
        if let Some(e) = self.err_stop {
            config.err_stop = e;
        }
        if let Some(n) = self.ndof_stop {
            config.ndof_stop = n;
        }
        if let Some(s) = self.solve_on_coarse_mesh {
            config.solve_on_coarse_mesh = s;
        }

        config.validate()?;
        Ok(config)
    }
}

fn run(args: &Args) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.build_config()?;
    info!("Configuration: {}", config.to_json().dump());

    std::fs::create_dir_all(&args.output)?;
    let mut controller = AdaptController::new(config, PoissonSolver::laplace())?
        .with_exact_solution(Arc::new(lshape::LShapeExact))
        .with_output_dir(&args.output);
    if args.frames {
        let writer = JsonFrameWriter::new(args.output.join("frames"))?;
        controller = controller.with_view(Box::new(ThreadedView::spawn(writer)?));
    }

    match controller.run(lshape::mesh()?, lshape::boundary_conditions()) {
        Ok(outcome) => {
            if let Some(last) = outcome.history.last() {
                info!(
                    "Stopped ({:?}) with {} coarse DOFs, err_est {:.6}%",
                    outcome.cause, last.dof_coarse, last.err_est_percent
                );
            }
            Ok(outcome.cause.exit_code())
        }
        Err(failure) => {
            error!("{}", failure);
            Ok(FAILURE_EXIT_CODE)
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            FAILURE_EXIT_CODE
        }
    };
    exit(code);
}
