use crate::basis::{lagrange_basis, to_parametric, ShapeSamples};
use crate::domain::bc::BcType;
use crate::domain::mesh::elem::{Elem, Orientation, Rect, Side};
use crate::domain::space::{LocalMap, Space};
use crate::integration::{gauss_rule, num_glq_points, RectQuadrature};
use crate::linalg::{ElemContribution, LinalgError, LinearSystem};
use crate::solution::Solution;

use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Produces discrete solutions on approximation spaces
///
/// `solve` computes the Galerkin solution of the underlying problem on a Space. `project` computes the H1
/// projection of an existing (fine) solution onto a coarser Space, using the same essential boundary lift as `solve`.
pub trait SolveService: Send + Sync {
    fn solve(&self, space: &Arc<Space>) -> Result<Solution, SolveError>;
    fn project(&self, fine: &Solution, coarse: &Arc<Space>) -> Result<Solution, SolveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("assembly failed on elem {elem_id}: {reason}")]
    Assembly { elem_id: usize, reason: String },
    #[error("linear system could not be solved: {0}")]
    SingularSystem(#[from] LinalgError),
    #[error("incompatible spaces: {0}")]
    IncompatibleSpace(String),
}

/// Shareable source term
pub type SourceFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Galerkin solver for the Poisson problem `-Laplace(u) = f`
///
/// Essential boundary values come from the Space's boundary conditions, natural markers contribute their
/// boundary value as the outward flux `du/dn`.
#[derive(Clone)]
pub struct PoissonSolver {
    source: Option<SourceFn>,
}

impl fmt::Debug for PoissonSolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PoissonSolver")
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl PoissonSolver {
    /// The Laplace equation (no source term)
    pub fn laplace() -> Self {
        Self { source: None }
    }

    pub fn with_source<F>(source: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            source: Some(Arc::new(source)),
        }
    }

    fn assemble_and_solve<F>(&self, space: &Arc<Space>, elem_contribution: F) -> Result<Solution, SolveError>
    where
        F: Fn(&Elem, &LocalMap) -> Result<ElemContribution, SolveError> + Send + Sync,
    {
        let leaves: Vec<(usize, &LocalMap)> = space.local_maps().collect();
        let contributions = leaves
            .into_par_iter()
            .map(|(elem_id, map)| elem_contribution(&space.mesh().elems[elem_id], map))
            .collect::<Result<Vec<ElemContribution>, SolveError>>()?;

        let mut system = LinearSystem::new(space.num_dofs());
        system.par_extend(contributions);

        let coefficients = system.solve()?;
        debug!("Solved for {} DOFs", coefficients.len());
        Ok(Solution::new(space.clone(), coefficients))
    }

    // local stiffness matrix, load vector and natural boundary fluxes of a single leaf
    fn local_poisson(&self, space: &Space, elem: &Elem) -> Result<(DMatrix<f64>, Vec<f64>), SolveError> {
        check_elem(elem)?;
        let p = elem.order;
        let tables = ReferenceTables::new(p, num_glq_points(p, p));
        let stiffness = tables.stiffness(&elem.rect);

        let np = p as usize + 1;
        let mut load = vec![0.0; np * np];

        if let Some(source) = &self.source {
            let quad = RectQuadrature::new(&elem.rect, tables.rule_size);
            let f: Vec<Vec<f64>> = quad
                .x
                .iter()
                .map(|x| quad.y.iter().map(|y| source(*x, *y)).collect())
                .collect();

            for j in 0..np {
                for i in 0..np {
                    load[j * np + i] = quad.integrate(|m, n| {
                        f[m][n] * tables.shapes.values[i][m] * tables.shapes.values[j][n]
                    });
                }
            }
        }

        let bcs = space.bcs();
        for side in Side::ALL {
            let marker = match elem.boundary_marker(side) {
                Some(marker) if bcs.classify(marker) == BcType::Natural => marker,
                _ => continue,
            };

            let (orientation, coord, range) = elem.rect.side_geometry(side);
            let rule = gauss_rule(tables.rule_size);
            let scale = (range[1] - range[0]) / 2.0;
            let flux: Vec<f64> = rule
                .points
                .iter()
                .map(|t| {
                    let s = range[0] + (t + 1.0) * scale;
                    match orientation {
                        Orientation::Horizontal => bcs.value(marker, s, coord),
                        Orientation::Vertical => bcs.value(marker, coord, s),
                    }
                })
                .collect();

            // only the nodes on this side have a non-zero trace
            for k in 0..np {
                let integral: f64 = rule
                    .weights
                    .iter()
                    .zip(flux.iter())
                    .enumerate()
                    .map(|(m, (w, g))| w * g * tables.shapes.values[k][m])
                    .sum::<f64>()
                    * scale;

                let idx = match side {
                    Side::S => k,
                    Side::N => (np - 1) * np + k,
                    Side::W => k * np,
                    Side::E => k * np + np - 1,
                };
                load[idx] += integral;
            }
        }

        if stiffness.iter().chain(load.iter()).all(|v| v.is_finite()) {
            Ok((stiffness, load))
        } else {
            Err(SolveError::Assembly {
                elem_id: elem.id,
                reason: String::from("non-finite local matrix or load vector"),
            })
        }
    }
}

impl SolveService for PoissonSolver {
    fn solve(&self, space: &Arc<Space>) -> Result<Solution, SolveError> {
        self.assemble_and_solve(space, |elem, map| {
            let (stiffness, load) = self.local_poisson(space, elem)?;
            Ok(constrained_contribution(map, &stiffness, &load))
        })
    }

    fn project(&self, fine: &Solution, coarse: &Arc<Space>) -> Result<Solution, SolveError> {
        if !fine.space().is_refinement_of(coarse) {
            return Err(SolveError::IncompatibleSpace(String::from(
                "the solution's space is not a refinement of the target space",
            )));
        }
        let fine_mesh = fine.space().mesh();

        self.assemble_and_solve(coarse, |elem, map| {
            check_elem(elem)?;
            let p = elem.order;
            let np = p as usize + 1;
            let tables = ReferenceTables::new(p, num_glq_points(p, p));
            let gram = tables.stiffness(&elem.rect) + tables.mass(&elem.rect);

            // (grad u_f, grad v) + (u_f, v) integrated over the fine leaves covering this elem
            let mut rhs = vec![0.0; np * np];
            let fine_leaves = fine_mesh
                .leaf_descendants(elem.id)
                .map_err(SolveError::IncompatibleSpace)?;
            for fine_id in fine_leaves {
                let piece = fine_mesh.elems[fine_id].rect;
                add_h1_moments(fine, fine_id, &piece, &elem.rect, p, &mut rhs).ok_or_else(|| {
                    SolveError::IncompatibleSpace(format!("fine solution has no values on leaf {}", fine_id))
                })?;
            }

            Ok(constrained_contribution(map, &gram, &rhs))
        })
    }
}

fn check_elem(elem: &Elem) -> Result<(), SolveError> {
    if elem.rect.is_degenerate() {
        Err(SolveError::Assembly {
            elem_id: elem.id,
            reason: String::from("degenerate element geometry"),
        })
    } else {
        Ok(())
    }
}

/// 1D reference matrices of the Lagrange basis of some order
pub(crate) struct ReferenceTables {
    rule_size: usize,
    shapes: ShapeSamples,
    /// `int phi_i phi_j` over `[-1, 1]`
    mass_1d: DMatrix<f64>,
    /// `int phi_i' phi_j'` over `[-1, 1]`
    stiffness_1d: DMatrix<f64>,
}

impl ReferenceTables {
    pub(crate) fn new(order: u8, rule_size: usize) -> Self {
        let rule = gauss_rule(rule_size);
        let shapes = lagrange_basis(order).sample(&rule.points);
        let np = order as usize + 1;

        let integrate = |a: &Vec<f64>, b: &Vec<f64>| -> f64 {
            rule.weights
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(w, (a, b))| w * a * b)
                .sum()
        };
        let mass_1d = DMatrix::from_fn(np, np, |i, j| integrate(&shapes.values[i], &shapes.values[j]));
        let stiffness_1d = DMatrix::from_fn(np, np, |i, j| {
            integrate(&shapes.derivatives[i], &shapes.derivatives[j])
        });

        Self {
            rule_size,
            shapes,
            mass_1d,
            stiffness_1d,
        }
    }

    /// `int grad(phi_k) . grad(phi_l)` over a rectangle
    ///
    /// Local indices are `j * (order + 1) + i`, so the y-direction matrix is the outer factor of each product
    pub(crate) fn stiffness(&self, rect: &Rect) -> DMatrix<f64> {
        let (w, h) = (rect.width(), rect.height());
        self.mass_1d.kronecker(&self.stiffness_1d).scale(h / w)
            + self.stiffness_1d.kronecker(&self.mass_1d).scale(w / h)
    }

    /// `int phi_k phi_l` over a rectangle
    pub(crate) fn mass(&self, rect: &Rect) -> DMatrix<f64> {
        self.mass_1d.kronecker(&self.mass_1d).scale(rect.area() / 4.0)
    }
}

/// Accumulate the H1 moments `(u, phi) + (grad u, grad phi)` of a solution's leaf `fine_id` against the
/// order-`order` basis on `rect`, integrated over `piece` (a part of both the leaf and `rect`)
///
/// Returns `None` if the solution has no values on the leaf.
pub(crate) fn add_h1_moments(
    solution: &Solution,
    fine_id: usize,
    piece: &Rect,
    rect: &Rect,
    order: u8,
    moments: &mut [f64],
) -> Option<()> {
    let np = order as usize + 1;
    let fine_order = solution.space().mesh().elems[fine_id].order;
    let quad = RectQuadrature::new(piece, num_glq_points(order, fine_order));
    let u = solution.sample_leaf(fine_id, &quad.x, &quad.y)?;

    let basis = lagrange_basis(order);
    let sx = basis.sample(&quad.x.iter().map(|x| to_parametric(*x, rect.x)).collect::<Vec<_>>());
    let sy = basis.sample(&quad.y.iter().map(|y| to_parametric(*y, rect.y)).collect::<Vec<_>>());
    let [jx, jy] = [2.0 / rect.width(), 2.0 / rect.height()];

    for j in 0..np {
        for i in 0..np {
            moments[j * np + i] += quad.integrate(|m, n| {
                let phi = sx.values[i][m] * sy.values[j][n];
                let phi_x = sx.derivatives[i][m] * jx * sy.values[j][n];
                let phi_y = sx.values[i][m] * sy.derivatives[j][n] * jy;
                u.values[m][n] * phi + u.dx[m][n] * phi_x + u.dy[m][n] * phi_y
            });
        }
    }
    Some(())
}

/// Map a local system onto the global degrees of freedom through the leaf's constraints
///
/// With local values `u_l = C u + d`, the leaf contributes `C^T K C` to the matrix and `C^T (f - K d)` to the
/// right hand side. Only the upper triangle of the global matrix is emitted.
fn constrained_contribution(map: &LocalMap, k: &DMatrix<f64>, f: &[f64]) -> ElemContribution {
    let n = map.len();
    let constants: Vec<f64> = map.nodes.iter().map(|node| node.constant).collect();

    let mut matrix_entries = Vec::with_capacity(n * n);
    let mut rhs_entries = Vec::with_capacity(n);

    for (a, node_a) in map.nodes.iter().enumerate() {
        if node_a.is_fixed() {
            continue;
        }

        let lifted: f64 = f[a] - (0..n).map(|b| k[(a, b)] * constants[b]).sum::<f64>();
        for (dof_a, c_a) in node_a.terms.iter() {
            rhs_entries.push((*dof_a, c_a * lifted));
        }

        for (b, node_b) in map.nodes.iter().enumerate() {
            let k_ab = k[(a, b)];
            if k_ab == 0.0 {
                continue;
            }
            for (dof_a, c_a) in node_a.terms.iter() {
                for (dof_b, c_b) in node_b.terms.iter().filter(|(dof_b, _)| dof_a <= dof_b) {
                    matrix_entries.push(([*dof_a, *dof_b], c_a * k_ab * c_b));
                }
            }
        }
    }

    ElemContribution {
        matrix_entries,
        rhs_entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bc::{EssentialBcs, MarkerBcs};
    use crate::domain::mesh::h_refinement::HRef;
    use crate::domain::mesh::Mesh;

    fn refined_square(order: u8) -> Mesh {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.set_global_expansion_orders(order).unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_elems(vec![3], HRef::U).unwrap();
        mesh
    }

    fn max_error<F>(sol: &Solution, exact: F) -> f64
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut max: f64 = 0.0;
        for i in 0..=10 {
            for j in 0..=10 {
                let (x, y) = (i as f64 / 10.0, j as f64 / 10.0);
                max = max.max((sol.value(x, y).unwrap() - exact(x, y)).abs());
            }
        }
        max
    }

    #[test]
    fn linear_solutions_are_reproduced() {
        let exact = |x: f64, y: f64| 1.0 + x + 2.0 * y;
        let mut mesh = refined_square(2);
        mesh.set_expansion_orders(vec![(1, 3), (5, 1)]).unwrap();

        let space = Arc::new(Space::new(mesh, Arc::new(EssentialBcs::new(exact))).unwrap());
        let sol = PoissonSolver::laplace().solve(&space).unwrap();

        assert_eq!(sol.num_dofs(), space.num_dofs());
        assert!(max_error(&sol, exact) < 1e-10);
    }

    #[test]
    fn quadratic_solution_with_source() {
        // -Laplace(x^2 + y^2) = -4
        let exact = |x: f64, y: f64| x * x + y * y;
        let space = Arc::new(Space::new(refined_square(2), Arc::new(EssentialBcs::new(exact))).unwrap());
        let sol = PoissonSolver::with_source(|_, _| -4.0).solve(&space).unwrap();

        assert!(max_error(&sol, exact) < 1e-10);
    }

    #[test]
    fn natural_boundaries_carry_flux() {
        // u = x: fixed on the west side (marker 3), unit flux on the east side, zero flux elsewhere
        let bcs = MarkerBcs::new()
            .essential(3, |x, _| x)
            .natural(0, |x, _| if x == 1.0 { 1.0 } else { 0.0 });
        let space = Arc::new(Space::new(refined_square(2), Arc::new(bcs)).unwrap());
        let sol = PoissonSolver::laplace().solve(&space).unwrap();

        assert!(max_error(&sol, |x, _| x) < 1e-10);
    }

    #[test]
    fn pure_neumann_problem_is_singular() {
        let space = Arc::new(Space::new(refined_square(1), Arc::new(MarkerBcs::new())).unwrap());
        assert!(matches!(
            PoissonSolver::laplace().solve(&space),
            Err(SolveError::SingularSystem(_))
        ));
    }

    #[test]
    fn projection_of_representable_field_is_exact() {
        let exact = |x: f64, y: f64| 1.0 - x * y + 0.5 * y;
        let coarse = Arc::new(Space::new(refined_square(2), Arc::new(EssentialBcs::new(exact))).unwrap());
        let fine = Arc::new(coarse.reference_space().unwrap());

        let solver = PoissonSolver::laplace();
        let fine_sol = solver.solve(&fine).unwrap();
        let projected = solver.project(&fine_sol, &coarse).unwrap();
        let solved = solver.solve(&coarse).unwrap();

        assert!(max_error(&projected, exact) < 1e-9);
        for (a, b) in projected.coefficients().iter().zip(solved.coefficients()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn projection_onto_unrelated_space_fails() {
        let bcs = Arc::new(EssentialBcs::zero());
        let square = Arc::new(Space::new(refined_square(2), bcs.clone()).unwrap());
        let mut other = Mesh::from_file("./test_input/lshape.json").unwrap();
        other.set_global_expansion_orders(2).unwrap();
        let lshape = Arc::new(Space::new(other, bcs).unwrap());

        let solver = PoissonSolver::with_source(|_, _| 1.0);
        let sol = solver.solve(&lshape).unwrap();
        assert!(matches!(
            solver.project(&sol, &square),
            Err(SolveError::IncompatibleSpace(_))
        ));
    }
}
