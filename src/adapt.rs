/// Convergence graphs and timing of an adaptive run
pub mod telemetry;

use crate::config::{AdaptConfig, ConfigError};
use crate::domain::bc::BoundaryConditions;
use crate::domain::mesh::h_refinement::{HRef, HRefError};
use crate::domain::mesh::p_refinement::PRefError;
use crate::domain::mesh::{Mesh, MeshLoadError};
use crate::domain::space::{Refinement, Space, SpaceError};
use crate::estimation::{estimate, exact_error, ErrorEstimate, EstimatorError, ExactSolution};
use crate::selection::{SelectionError, Selector};
use crate::solution::Solution;
use crate::solver::{SolveError, SolveService};
use crate::view::{Frame, NullView, View};

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry::{ConvergenceGraphs, TimePeriod};

/// Exit code of a failed run
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Why an adaptive run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCause {
    /// The estimated error dropped below `err_stop`
    AccuracyReached,
    /// The coarse space reached `ndof_stop` DOFs
    DofBudgetExhausted,
    /// Nothing was marked, or no refinement was selected
    Stagnated,
}

impl StopCause {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AccuracyReached => 0,
            Self::DofBudgetExhausted => 2,
            Self::Stagnated => 3,
        }
    }
}

/// States of the adaptivity loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    SolveFine,
    DeriveCoarse,
    Estimate,
    CheckStop,
    Refine,
    Done(StopCause),
}

/// Outcome of the work done in a [State]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Completed,
    Stop(StopCause),
}

impl State {
    /// The state following `self` after `event`. `Done` is absorbing.
    pub fn transition(self, event: Event) -> Self {
        match (self, event) {
            (Self::Done(cause), _) => Self::Done(cause),
            (_, Event::Stop(cause)) => Self::Done(cause),
            (Self::Init, Event::Completed) => Self::SolveFine,
            (Self::SolveFine, Event::Completed) => Self::DeriveCoarse,
            (Self::DeriveCoarse, Event::Completed) => Self::Estimate,
            (Self::Estimate, Event::Completed) => Self::CheckStop,
            (Self::CheckStop, Event::Completed) => Self::Refine,
            (Self::Refine, Event::Completed) => Self::SolveFine,
        }
    }
}

/// Measurements of one adaptivity step
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub dof_coarse: usize,
    pub dof_fine: usize,
    pub err_est_percent: f64,
    pub err_exact_percent: Option<f64>,
    /// Seconds spent in the loop so far (excluding exact error computations and visualization)
    pub elapsed_cpu: f64,
}

/// Append-only record of the adaptivity steps
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceHistory {
    entries: Vec<HistoryEntry>,
}

impl ConvergenceHistory {
    fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a successful run
#[derive(Debug)]
pub struct AdaptOutcome {
    pub cause: StopCause,
    pub fine_solution: Solution,
    pub coarse_solution: Solution,
    pub history: ConvergenceHistory,
}

#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    MeshLoad(#[from] MeshLoadError),
    #[error("h-refinement failed: {0}")]
    HRefinement(#[from] HRefError),
    #[error("p-refinement failed: {0}")]
    PRefinement(#[from] PRefError),
    #[error("space construction failed: {0}")]
    Space(#[from] SpaceError),
    #[error("solve failed: {0}")]
    Solve(#[from] SolveError),
    #[error("error estimation failed: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("candidate selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("telemetry output failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed run, along with everything that was learned before the failure
#[derive(Debug, thiserror::Error)]
#[error("adaptive run failed after {} step(s): {error}", .history.len())]
pub struct AdaptFailure {
    #[source]
    pub error: AdaptError,
    pub history: ConvergenceHistory,
    /// The last fine solution whose error was fully estimated
    pub last_good: Option<Solution>,
}

/// Drives the solve / estimate / refine loop over a Space until one of the stopping criteria is met
pub struct AdaptController<S: SolveService> {
    config: AdaptConfig,
    solver: S,
    selector: Selector,
    exact: Option<Arc<dyn ExactSolution>>,
    view: Box<dyn View>,
    output_dir: Option<PathBuf>,
}

// working data of a single run
#[derive(Default)]
struct Run {
    mesh: Option<Mesh>,
    space: Option<Arc<Space>>,
    fine: Option<Solution>,
    coarse: Option<Solution>,
    estimate: Option<ErrorEstimate>,
    iteration: usize,
    history: ConvergenceHistory,
    last_good: Option<Solution>,
    timer: TimePeriod,
    graphs: Option<ConvergenceGraphs>,
}

impl<S: SolveService> AdaptController<S> {
    pub fn new(config: AdaptConfig, solver: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let selector = Selector::from(&config);

        Ok(Self {
            config,
            solver,
            selector,
            exact: None,
            view: Box::new(NullView),
            output_dir: None,
        })
    }

    /// Report the exact error at each step
    pub fn with_exact_solution(mut self, exact: Arc<dyn ExactSolution>) -> Self {
        self.exact = Some(exact);
        self
    }

    pub fn with_view(mut self, view: Box<dyn View>) -> Self {
        self.view = view;
        self
    }

    /// Write convergence graphs into `dir`
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    /// Run the adaptivity loop on a base mesh
    pub fn run(&mut self, mesh: Mesh, bcs: Arc<dyn BoundaryConditions>) -> Result<AdaptOutcome, AdaptFailure> {
        let mut run = Run {
            mesh: Some(mesh),
            ..Default::default()
        };

        let mut state = State::Init;
        loop {
            let event = match self.step(state, &mut run, &bcs) {
                Ok(event) => event,
                Err(error) => {
                    return Err(AdaptFailure {
                        error,
                        history: run.history,
                        last_good: run.last_good,
                    })
                }
            };

            state = state.transition(event);
            if let State::Done(cause) = state {
                info!("Adaptivity finished after {} step(s): {:?}", run.history.len(), cause);
                return match (run.fine, run.coarse) {
                    (Some(fine_solution), Some(coarse_solution)) => Ok(AdaptOutcome {
                        cause,
                        fine_solution,
                        coarse_solution,
                        history: run.history,
                    }),
                    _ => unreachable!("the loop can only stop after an error estimate"),
                };
            }
        }
    }

    fn step(&mut self, state: State, run: &mut Run, bcs: &Arc<dyn BoundaryConditions>) -> Result<Event, AdaptError> {
        match state {
            State::Init => {
                let mut mesh = match run.mesh.take() {
                    Some(mesh) => mesh,
                    None => unreachable!("the base mesh is handed over once, at initialization"),
                };
                for _ in 0..self.config.init_ref_num {
                    mesh.global_h_refinement(HRef::T)?;
                }
                mesh.set_global_expansion_orders(self.config.p_init)?;

                run.space = Some(Arc::new(Space::new(mesh, bcs.clone())?));
                run.graphs = match &self.output_dir {
                    Some(dir) => Some(ConvergenceGraphs::create(dir, self.exact.is_some())?),
                    None => None,
                };
                run.iteration = 1;
                run.timer = TimePeriod::new();
                Ok(Event::Completed)
            }
            State::SolveFine => {
                let space = current_space(run);
                let fine_space = Arc::new(space.reference_space()?);
                run.fine = Some(self.solver.solve(&fine_space)?);
                Ok(Event::Completed)
            }
            State::DeriveCoarse => {
                let space = current_space(run);
                let fine = fine_solution(run);
                let coarse = if self.config.solve_on_coarse_mesh {
                    self.solver.solve(&space)?
                } else {
                    self.solver.project(fine, &space)?
                };
                run.coarse = Some(coarse);
                Ok(Event::Completed)
            }
            State::Estimate => {
                let (coarse, fine) = match (&run.coarse, &run.fine) {
                    (Some(coarse), Some(fine)) => (coarse, fine),
                    _ => unreachable!("solutions are computed before estimation"),
                };
                let est = estimate(coarse, fine)?;
                let elapsed_cpu = run.timer.tick().as_secs_f64();

                let err_exact_percent = match &self.exact {
                    Some(exact) => Some(exact_error(coarse, exact.as_ref())?.global_error_percent()),
                    None => None,
                };

                let entry = HistoryEntry {
                    iteration: run.iteration,
                    dof_coarse: coarse.num_dofs(),
                    dof_fine: fine.num_dofs(),
                    err_est_percent: est.global_error_percent(),
                    err_exact_percent,
                    elapsed_cpu,
                };
                match entry.err_exact_percent {
                    Some(err_exact) => info!(
                        "Step {}: ndof_coarse {}, ndof_fine {}, err_est {:.6}%, err_exact {:.6}%",
                        entry.iteration, entry.dof_coarse, entry.dof_fine, entry.err_est_percent, err_exact
                    ),
                    None => info!(
                        "Step {}: ndof_coarse {}, ndof_fine {}, err_est {:.6}%",
                        entry.iteration, entry.dof_coarse, entry.dof_fine, entry.err_est_percent
                    ),
                }

                if let Some(graphs) = run.graphs.as_mut() {
                    graphs.record(&entry)?;
                }
                self.view.show(Frame::new(run.iteration, coarse.clone()));

                run.last_good = Some(fine.clone());
                run.history.push(entry);
                run.estimate = Some(est);
                run.timer.skip();
                Ok(Event::Completed)
            }
            State::CheckStop => match run.history.last() {
                Some(entry) if entry.err_est_percent < self.config.err_stop => {
                    Ok(Event::Stop(StopCause::AccuracyReached))
                }
                Some(entry) if entry.dof_coarse >= self.config.ndof_stop => {
                    Ok(Event::Stop(StopCause::DofBudgetExhausted))
                }
                Some(_) => Ok(Event::Completed),
                None => unreachable!("the stopping criteria are checked after an estimate"),
            },
            State::Refine => {
                let (coarse, fine, est) = match (&run.coarse, &run.fine, &run.estimate) {
                    (Some(coarse), Some(fine), Some(est)) => (coarse, fine, est),
                    _ => unreachable!("refinements are selected after estimation"),
                };

                let decisions = self.selector.select(coarse, fine, est)?;
                if decisions.is_empty() {
                    warn!("No refinement selected at step {}; stopping", run.iteration);
                    return Ok(Event::Stop(StopCause::Stagnated));
                }

                let refinements: Vec<(usize, Refinement)> =
                    decisions.iter().map(|d| (d.elem_id, d.refinement())).collect();
                let space = run
                    .space
                    .as_mut()
                    .unwrap_or_else(|| unreachable!("the space is built during initialization"));
                let dofs_before = space.num_dofs();
                let extra = Arc::make_mut(space).apply_refinements(&refinements, self.config.mesh_regularity)?;
                debug!(
                    "Step {}: {} elem(s) refined, {} extra refinement(s) for regularity, {} -> {} DOFs",
                    run.iteration,
                    refinements.len(),
                    extra,
                    dofs_before,
                    space.num_dofs()
                );

                run.iteration += 1;
                Ok(Event::Completed)
            }
            State::Done(cause) => Ok(Event::Stop(cause)),
        }
    }
}

fn current_space(run: &Run) -> Arc<Space> {
    match &run.space {
        Some(space) => space.clone(),
        None => unreachable!("the space is built during initialization"),
    }
}

fn fine_solution(run: &Run) -> &Solution {
    match &run.fine {
        Some(fine) => fine,
        None => unreachable!("the fine solution is computed before the coarse one"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmarks::lshape;
    use crate::domain::bc::EssentialBcs;
    use crate::selection::{CandList, Strategy};
    use crate::solver::PoissonSolver;

    const ALL_STATES: [State; 9] = [
        State::Init,
        State::SolveFine,
        State::DeriveCoarse,
        State::Estimate,
        State::CheckStop,
        State::Refine,
        State::Done(StopCause::AccuracyReached),
        State::Done(StopCause::DofBudgetExhausted),
        State::Done(StopCause::Stagnated),
    ];

    fn peaked_solver() -> PoissonSolver {
        PoissonSolver::with_source(|x, y| 50.0 * (-40.0 * ((x - 0.3).powi(2) + (y - 0.6).powi(2))).exp())
    }

    fn square() -> Mesh {
        Mesh::from_file("./test_input/square_2x2.json").unwrap()
    }

    fn run_square(config: AdaptConfig) -> Result<AdaptOutcome, AdaptFailure> {
        AdaptController::new(config, peaked_solver())
            .unwrap()
            .run(square(), Arc::new(EssentialBcs::zero()))
    }

    #[test]
    fn state_transitions() {
        let mut state = State::Init;
        let mut visited = vec![state];
        for _ in 0..6 {
            state = state.transition(Event::Completed);
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                State::Init,
                State::SolveFine,
                State::DeriveCoarse,
                State::Estimate,
                State::CheckStop,
                State::Refine,
                State::SolveFine
            ]
        );

        assert_eq!(
            State::CheckStop.transition(Event::Stop(StopCause::AccuracyReached)),
            State::Done(StopCause::AccuracyReached)
        );
        assert_eq!(
            State::Refine.transition(Event::Stop(StopCause::Stagnated)),
            State::Done(StopCause::Stagnated)
        );

        // done is absorbing
        for event in [Event::Completed, Event::Stop(StopCause::Stagnated)] {
            assert_eq!(
                State::Done(StopCause::DofBudgetExhausted).transition(event),
                State::Done(StopCause::DofBudgetExhausted)
            );
        }

        // pure: the same input always gives the same output
        for state in ALL_STATES {
            assert_eq!(state.transition(Event::Completed), state.transition(Event::Completed));
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(StopCause::AccuracyReached.exit_code(), 0);
        assert_eq!(StopCause::DofBudgetExhausted.exit_code(), 2);
        assert_eq!(StopCause::Stagnated.exit_code(), 3);
        assert_eq!(FAILURE_EXIT_CODE, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AdaptConfig {
            conv_exp: -1.0,
            ..Default::default()
        };
        assert!(AdaptController::new(config, peaked_solver()).is_err());
    }

    #[test]
    fn dofs_grow_and_stopping_is_correct() {
        let config = AdaptConfig {
            init_ref_num: 0,
            p_init: 2,
            err_stop: 2.0,
            ndof_stop: 1500,
            ..Default::default()
        };
        let outcome = run_square(config.clone()).unwrap();
        let entries = outcome.history.entries();
        assert!(entries.len() > 1);

        // every step but the last satisfies neither stopping criterion
        for entry in &entries[..entries.len() - 1] {
            assert!(entry.err_est_percent >= config.err_stop);
            assert!(entry.dof_coarse < config.ndof_stop);
        }
        let last = outcome.history.last().unwrap();
        match outcome.cause {
            StopCause::AccuracyReached => assert!(last.err_est_percent < config.err_stop),
            StopCause::DofBudgetExhausted => {
                assert!(last.err_est_percent >= config.err_stop);
                assert!(last.dof_coarse >= config.ndof_stop);
            }
            StopCause::Stagnated => panic!("unexpected stagnation"),
        }

        for pair in entries.windows(2) {
            assert!(pair[1].dof_coarse >= pair[0].dof_coarse);
            assert!(pair[1].elapsed_cpu >= pair[0].elapsed_cpu);
        }
        assert!(last.dof_coarse > entries[0].dof_coarse);
        assert_eq!(outcome.coarse_solution.num_dofs(), last.dof_coarse);
        assert_eq!(outcome.fine_solution.num_dofs(), last.dof_fine);
    }

    #[test]
    fn absolute_strategy_boundaries() {
        // nothing reaches a huge threshold: stagnation after the first step
        let outcome = run_square(AdaptConfig {
            init_ref_num: 0,
            p_init: 2,
            strategy: Strategy::Absolute,
            threshold: 1e9,
            err_stop: 0.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(outcome.cause, StopCause::Stagnated);
        assert_eq!(outcome.history.len(), 1);

        // a zero threshold refines everything until the budget runs out
        let outcome = run_square(AdaptConfig {
            init_ref_num: 0,
            p_init: 2,
            strategy: Strategy::Absolute,
            threshold: 0.0,
            err_stop: 0.0,
            ndof_stop: 200,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(outcome.cause, StopCause::DofBudgetExhausted);
        assert!(outcome.history.len() > 1);
    }

    fn run_lshape(config: AdaptConfig) -> AdaptOutcome {
        AdaptController::new(config, PoissonSolver::laplace())
            .unwrap()
            .with_exact_solution(Arc::new(lshape::LShapeExact))
            .run(lshape::mesh().unwrap(), lshape::boundary_conditions())
            .unwrap()
    }

    #[test]
    fn projection_matches_coarse_solve() {
        for p_init in [2, 4] {
            let first_entry = |solve_on_coarse_mesh: bool| -> HistoryEntry {
                let outcome = run_lshape(AdaptConfig {
                    p_init,
                    ndof_stop: 1,
                    solve_on_coarse_mesh,
                    ..Default::default()
                });
                assert_eq!(outcome.cause, StopCause::DofBudgetExhausted);
                outcome.history.entries()[0].clone()
            };

            let proj = first_entry(false);
            let solve = first_entry(true);
            assert_eq!(proj.dof_coarse, solve.dof_coarse);

            // the H1 projection is the best coarse approximation of the fine solution
            assert!(proj.err_est_percent <= solve.err_est_percent * (1.0 + 1e-6));
            assert!((proj.err_est_percent - solve.err_est_percent).abs() <= 1e-3 * solve.err_est_percent);

            let exact_proj = proj.err_exact_percent.unwrap();
            let exact_solve = solve.err_exact_percent.unwrap();
            assert!((exact_proj - exact_solve).abs() <= 1e-3 * exact_solve);
        }
    }

    #[test]
    fn dofs_grow_under_hp_candidates() {
        for mesh_regularity in [None, Some(1)] {
            let outcome = run_lshape(AdaptConfig {
                p_init: 4,
                cand_list: CandList::HpAniso,
                mesh_regularity,
                ndof_stop: 1200,
                ..Default::default()
            });
            assert_eq!(outcome.cause, StopCause::DofBudgetExhausted);

            let entries = outcome.history.entries();
            assert!(entries.len() > 2);
            for pair in entries.windows(2) {
                assert!(pair[1].dof_coarse >= pair[0].dof_coarse);
            }
            assert!(entries[entries.len() - 1].err_est_percent < entries[0].err_est_percent);
        }
    }

    #[test]
    fn failures_keep_the_history() {
        // the pure Neumann problem is singular
        let failure = AdaptController::new(
            AdaptConfig {
                init_ref_num: 0,
                p_init: 1,
                ..Default::default()
            },
            peaked_solver(),
        )
        .unwrap()
        .run(square(), Arc::new(crate::domain::bc::MarkerBcs::new()))
        .unwrap_err();

        assert!(matches!(failure.error, AdaptError::Solve(SolveError::SingularSystem(_))));
        assert!(failure.history.is_empty());
        assert!(failure.last_good.is_none());
    }

    #[test]
    fn graphs_and_frames_are_written() {
        let dir = std::env::temp_dir().join("hp_adapt_controller_test");
        let frames = dir.join("frames");
        let config = AdaptConfig {
            init_ref_num: 0,
            p_init: 2,
            ndof_stop: 100,
            ..Default::default()
        };

        let outcome = AdaptController::new(config, peaked_solver())
            .unwrap()
            .with_output_dir(&dir)
            .with_view(Box::new(crate::view::JsonFrameWriter::new(&frames).unwrap()))
            .run(square(), Arc::new(EssentialBcs::zero()))
            .unwrap();

        let dof_est = std::fs::read_to_string(dir.join("conv_dof_est.dat")).unwrap();
        assert_eq!(dof_est.lines().count(), outcome.history.len());
        assert!(!dir.join("conv_dof_exact.dat").exists());
        assert!(frames.join("frame_0001.json").exists());
    }
}
