/// The adaptivity loop: state machine, stopping criteria, convergence history and telemetry
pub mod adapt;
/// Nodal Lagrange bases on Gauss-Lobatto points
pub mod basis;
/// Benchmark problems with known exact solutions
pub mod benchmarks;
/// Tunables of an adaptive run
pub mod config;
/// Structures to define the geometry, refinement state, and approximation space of a problem
pub mod domain;
/// Element-wise error estimates and exact errors
pub mod estimation;
/// Structures and functions to assist in Gauss-Legendre integration
pub mod integration;
/// Sparse symmetric systems and their solvers
pub mod linalg;
/// Marking and refinement candidate selection
pub mod selection;
/// Discrete fields over an approximation space
pub mod solution;
/// Galerkin solves and projections over an approximation space
pub mod solver;
/// Visualization hooks
pub mod view;

pub use adapt::{AdaptController, AdaptError, AdaptFailure, AdaptOutcome, ConvergenceHistory, StopCause};
pub use config::AdaptConfig;
pub use domain::bc::{BcType, BoundaryConditions, EssentialBcs, MarkerBcs};
pub use domain::mesh::Mesh;
pub use domain::space::Space;
pub use estimation::{ErrorEstimate, ExactSolution};
pub use selection::{CandList, Selector, Strategy};
pub use solution::Solution;
pub use solver::{PoissonSolver, SolveService};
