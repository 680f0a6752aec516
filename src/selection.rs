use crate::config::AdaptConfig;
use crate::domain::mesh::elem::{Elem, Rect};
use crate::domain::mesh::h_refinement::{HRef, HRefError};
use crate::domain::mesh::{Mesh, MAX_POLYNOMIAL_ORDER};
use crate::domain::space::Refinement;
use crate::estimation::ErrorEstimate;
use crate::integration::{num_glq_points, RectQuadrature};
use crate::solution::{sample_expansion, Solution};
use crate::solver::{add_h1_moments, ReferenceTables};

use log::debug;
use nalgebra::DVector;
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Highest order a candidate may request (the reference space needs one more)
pub const MAX_CANDIDATE_ORDER: u8 = MAX_POLYNOMIAL_ORDER - 1;

/// Relative difference between squared errors under which the cumulative strategy treats elements as tied
const CUMULATIVE_TIE_TOLERANCE: f64 = 1e-3;

/// Relative tolerance under which two candidate scores are considered equal
const SCORE_TOLERANCE: f64 = 1e-12;

/// How elements are marked for refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Largest errors first, until the refined share of the squared error exceeds `sqrt(threshold)`
    Cumulative,
    /// Every element whose error is at least `threshold` times the largest error
    RelativeToMax,
    /// Every element whose relative error `e / reference_norm` is at least `threshold`
    ///
    /// The comparison is on the error itself, not its square: a threshold of 0.01 marks elements carrying at least
    /// 1% of the reference norm.
    Absolute,
}

impl Strategy {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Cumulative),
            1 => Some(Self::RelativeToMax),
            2 => Some(Self::Absolute),
            _ => None,
        }
    }

    pub fn index(&self) -> i64 {
        match self {
            Self::Cumulative => 0,
            Self::RelativeToMax => 1,
            Self::Absolute => 2,
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .ok()
            .and_then(Self::from_index)
            .ok_or_else(|| format!("unknown strategy '{}' (expected 0, 1 or 2)", s))
    }
}

/// Which kinds of candidates are generated for a marked element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandList {
    PIso,
    HIso,
    HAniso,
    HpIso,
    /// hp candidates with anisotropic splits limited to pure h-refinements
    HpAnisoH,
    HpAniso,
}

impl CandList {
    pub const ALL: [Self; 6] = [
        Self::PIso,
        Self::HIso,
        Self::HAniso,
        Self::HpIso,
        Self::HpAnisoH,
        Self::HpAniso,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PIso => "P_ISO",
            Self::HIso => "H_ISO",
            Self::HAniso => "H_ANISO",
            Self::HpIso => "HP_ISO",
            Self::HpAnisoH => "HP_ANISO_H",
            Self::HpAniso => "HP_ANISO",
        }
    }

    pub fn kinds(&self) -> &'static [RefinementKind] {
        use RefinementKind::*;
        match self {
            Self::PIso => &[PElevate],
            Self::HIso => &[HIso],
            Self::HAniso => &[HIso, HAnisoX, HAnisoY],
            Self::HpIso => &[PElevate, HIso, Hp { layout: HRef::T }],
            Self::HpAnisoH => &[PElevate, HIso, HAnisoX, HAnisoY, Hp { layout: HRef::T }],
            Self::HpAniso => &[
                PElevate,
                HIso,
                HAnisoX,
                HAnisoY,
                Hp { layout: HRef::T },
                Hp { layout: HRef::U },
                Hp { layout: HRef::V },
            ],
        }
    }
}

impl fmt::Display for CandList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CandList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .find(|cl| cl.name() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown candidate list '{}'", s))
    }
}

/// The shape of a refinement candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefinementKind {
    /// Raise the order of the element
    PElevate,
    /// Split into 4 children which keep the order
    HIso,
    /// Split the x-extent into 2 children which keep the order
    HAnisoX,
    /// Split the y-extent into 2 children which keep the order
    HAnisoY,
    /// Split with `layout` and lower the children's order by one
    Hp { layout: HRef },
}

impl RefinementKind {
    /// Fixed preference used to break ties between equally scored candidates (lower is preferred)
    pub fn priority(&self) -> u8 {
        match self {
            Self::PElevate => 0,
            Self::HIso => 1,
            Self::HAnisoX => 2,
            Self::HAnisoY => 3,
            Self::Hp { layout: HRef::T } => 4,
            Self::Hp { layout: HRef::U } => 5,
            Self::Hp { layout: HRef::V } => 6,
        }
    }

    /// The h-refinement applied by this kind of candidate (if any)
    pub fn h_refinement(&self) -> Option<HRef> {
        match self {
            Self::PElevate => None,
            Self::HIso => Some(HRef::T),
            Self::HAnisoX => Some(HRef::U),
            Self::HAnisoY => Some(HRef::V),
            Self::Hp { layout } => Some(*layout),
        }
    }

    // orders proposed for an element of order p; each entry holds one order per child
    fn proposed_orders(&self, p: u8) -> Vec<u8> {
        match self {
            Self::PElevate => vec![p + 1, p + 2],
            Self::HIso | Self::HAnisoX | Self::HAnisoY => vec![p],
            Self::Hp { .. } => {
                if p > 1 {
                    vec![p - 1]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// A proposed refinement of one element
#[derive(Clone, Debug, PartialEq)]
pub struct RefinementCandidate {
    pub kind: RefinementKind,
    /// Order of each resulting element (a single entry for [RefinementKind::PElevate])
    pub orders: SmallVec<[u8; 4]>,
    /// Nodal DOFs added by the candidate
    pub cost: f64,
    /// H1 error of the best local approximation of the fine solution in the candidate's layout
    pub error: f64,
    /// `log10` of the error reduction relative to the unrefined element
    pub benefit: f64,
}

impl RefinementCandidate {
    pub fn score(&self, conv_exp: f64) -> f64 {
        self.benefit / self.cost.powf(conv_exp)
    }

    /// Order two candidates such that the preferred one comes first
    pub fn compare(&self, other: &Self, conv_exp: f64) -> Ordering {
        let (s_a, s_b) = (self.score(conv_exp), other.score(conv_exp));
        let scale = s_a.abs().max(s_b.abs());

        let by_score = if (s_a - s_b).abs() <= SCORE_TOLERANCE * scale {
            Ordering::Equal
        } else {
            s_b.partial_cmp(&s_a).unwrap_or(Ordering::Equal)
        };

        by_score
            .then(self.cost.partial_cmp(&other.cost).unwrap_or(Ordering::Equal))
            .then(self.kind.priority().cmp(&other.kind.priority()))
            .then(self.orders.cmp(&other.orders))
    }

    fn max_order(&self) -> u8 {
        self.orders.iter().copied().max().unwrap_or(0)
    }
}

/// Added nodal DOFs of a candidate on an element of order `p`, counting the element in isolation
pub fn candidate_cost(kind: RefinementKind, p: u8, q: u8) -> f64 {
    let [p, q] = [p as i64, q as i64];
    let before = (p + 1) * (p + 1);
    let after = match kind {
        RefinementKind::PElevate => (q + 1) * (q + 1),
        RefinementKind::HIso | RefinementKind::Hp { layout: HRef::T } => (2 * q + 1) * (2 * q + 1),
        RefinementKind::HAnisoX
        | RefinementKind::HAnisoY
        | RefinementKind::Hp { layout: HRef::U }
        | RefinementKind::Hp { layout: HRef::V } => (2 * q + 1) * (q + 1),
    };
    (after - before) as f64
}

/// The refinement chosen for a marked element
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub elem_id: usize,
    pub candidate: RefinementCandidate,
}

impl Decision {
    pub fn refinement(&self) -> Refinement {
        match self.candidate.kind.h_refinement() {
            None => Refinement::P(self.candidate.max_order()),
            Some(href) => Refinement::H(href, self.candidate.orders.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("incompatible spaces: {0}")]
    IncompatibleSpace(String),
    #[error("local projection failed on elem {0}")]
    Projection(usize),
    #[error("h-refinement check failed: {0}")]
    HRefinement(#[from] HRefError),
}

/// Marks elements from an [ErrorEstimate] and picks the best scoring refinement for each of them
#[derive(Clone, Debug)]
pub struct Selector {
    pub strategy: Strategy,
    pub threshold: f64,
    pub cand_list: CandList,
    pub conv_exp: f64,
}

impl From<&AdaptConfig> for Selector {
    fn from(config: &AdaptConfig) -> Self {
        Self {
            strategy: config.strategy,
            threshold: config.threshold,
            cand_list: config.cand_list,
            conv_exp: config.conv_exp,
        }
    }
}

impl Selector {
    pub fn new(strategy: Strategy, threshold: f64, cand_list: CandList, conv_exp: f64) -> Self {
        Self {
            strategy,
            threshold,
            cand_list,
            conv_exp,
        }
    }

    /// Ids of the elements to refine (ascending). Elements without error are never marked.
    pub fn mark(&self, estimate: &ErrorEstimate) -> Vec<usize> {
        let sorted: Vec<(usize, f64)> = estimate
            .sorted()
            .into_iter()
            .filter(|(_, err)| *err > 0.0)
            .collect();
        let relative = |elem_id: usize| estimate.relative(elem_id).unwrap_or(0.0);

        let mut marked: Vec<usize> = match self.strategy {
            Strategy::Cumulative => {
                let total_sq: f64 = sorted.iter().map(|(_, e)| e * e).sum();
                let cutoff = self.threshold.sqrt() * total_sq;

                let mut marked = Vec::new();
                let mut processed_sq = 0.0;
                let mut last_sq = 0.0;
                for (elem_id, err) in sorted.iter() {
                    let err_sq = err * err;
                    if processed_sq > cutoff && (err_sq - last_sq).abs() > CUMULATIVE_TIE_TOLERANCE * last_sq {
                        break;
                    }
                    marked.push(*elem_id);
                    processed_sq += err_sq;
                    last_sq = err_sq;
                }
                marked
            }
            Strategy::RelativeToMax => {
                let max = sorted.first().map(|(_, e)| *e).unwrap_or(0.0);
                sorted
                    .iter()
                    .filter(|(_, e)| *e >= self.threshold * max)
                    .map(|(id, _)| *id)
                    .collect()
            }
            Strategy::Absolute => sorted
                .iter()
                .filter(|(id, _)| relative(*id) >= self.threshold)
                .map(|(id, _)| *id)
                .collect(),
        };

        marked.sort_unstable();
        marked
    }

    /// Choose refinements for the marked elements of the coarse space
    ///
    /// Decisions are returned in ascending elem-id order. Marked elements where no candidate reduces the
    /// error are left out.
    pub fn select(
        &self,
        coarse: &Solution,
        fine: &Solution,
        estimate: &ErrorEstimate,
    ) -> Result<Vec<Decision>, SelectionError> {
        if !fine.space().is_refinement_of(coarse.space()) {
            return Err(SelectionError::IncompatibleSpace(String::from(
                "the fine solution's space is not a refinement of the coarse space",
            )));
        }

        let marked = self.mark(estimate);
        debug!("{} of {} elems marked for refinement", marked.len(), estimate.num_elems());

        let coarse_mesh = coarse.space().mesh();
        let decisions = marked
            .into_par_iter()
            .map(|elem_id| {
                let elem = coarse_mesh.elems.get(elem_id).ok_or_else(|| {
                    SelectionError::IncompatibleSpace(format!("marked elem {} is not in the coarse mesh", elem_id))
                })?;
                self.best_candidate(coarse_mesh, elem, fine)
                    .map(|best| best.map(|candidate| Decision { elem_id, candidate }))
            })
            .collect::<Result<Vec<_>, SelectionError>>()?;

        let decisions: Vec<Decision> = decisions.into_iter().flatten().collect();
        for decision in decisions.iter() {
            debug!(
                "elem {}: {:?} {:?} (cost {}, score {:.4e})",
                decision.elem_id,
                decision.candidate.kind,
                decision.candidate.orders.as_slice(),
                decision.candidate.cost,
                decision.candidate.score(self.conv_exp)
            );
        }
        Ok(decisions)
    }

    /// Every admissible candidate for an element, with its cost and projection error filled in
    pub fn candidates(
        &self,
        coarse_mesh: &Mesh,
        elem: &Elem,
        fine: &Solution,
    ) -> Result<Vec<RefinementCandidate>, SelectionError> {
        let projector = LocalProjector::new(fine, elem.id)?;
        let p = elem.order;
        let err_unrefined = projector.error(&[elem.rect], p)?;

        let mut candidates = Vec::new();
        for kind in self.cand_list.kinds() {
            if let Some(href) = kind.h_refinement() {
                // children must remain refinable to build the next reference space
                let refinable = coarse_mesh.elem_is_h_refineable(elem.id, href)?
                    && elem.h_levels.refined(href).can_refine(HRef::T);
                if !refinable {
                    continue;
                }
            }

            for q in kind.proposed_orders(p) {
                if q == 0 || q > MAX_CANDIDATE_ORDER {
                    continue;
                }
                let cost = candidate_cost(*kind, p, q);
                if cost <= 0.0 {
                    continue;
                }

                let (rects, orders): (Vec<Rect>, SmallVec<[u8; 4]>) = match kind.h_refinement() {
                    None => (vec![elem.rect], smallvec![q]),
                    Some(href) => (
                        href.locs().map(|loc| elem.rect.child(loc)).collect(),
                        smallvec![q; href.num_children()],
                    ),
                };

                let error = projector.error(&rects, q)?;
                let benefit = if error < err_unrefined && err_unrefined > 0.0 {
                    if error > 0.0 {
                        (err_unrefined / error).log10()
                    } else {
                        f64::MAX.log10()
                    }
                } else {
                    0.0
                };

                candidates.push(RefinementCandidate {
                    kind: *kind,
                    orders,
                    cost,
                    error,
                    benefit,
                });
            }
        }

        Ok(candidates)
    }

    fn best_candidate(
        &self,
        coarse_mesh: &Mesh,
        elem: &Elem,
        fine: &Solution,
    ) -> Result<Option<RefinementCandidate>, SelectionError> {
        let candidates = self.candidates(coarse_mesh, elem, fine)?;
        Ok(candidates
            .into_iter()
            .filter(|c| c.benefit > 0.0)
            .min_by(|a, b| a.compare(b, self.conv_exp)))
    }
}

/// Local H1 projections of the fine solution over the region of one coarse element
struct LocalProjector<'a> {
    elem_id: usize,
    fine: &'a Solution,
    fine_leaves: Vec<usize>,
}

impl<'a> LocalProjector<'a> {
    fn new(fine: &'a Solution, elem_id: usize) -> Result<Self, SelectionError> {
        let fine_leaves = fine
            .space()
            .mesh()
            .leaf_descendants(elem_id)
            .map_err(SelectionError::IncompatibleSpace)?;
        Ok(Self {
            elem_id,
            fine,
            fine_leaves,
        })
    }

    // fine leaves overlapping some rect, along with the overlap
    fn pieces(&self, rect: &Rect) -> Vec<(usize, Rect)> {
        let fine_mesh = self.fine.space().mesh();
        self.fine_leaves
            .iter()
            .filter_map(|id| {
                fine_mesh.elems[*id]
                    .rect
                    .intersection(rect)
                    .map(|piece| (*id, piece))
            })
            .collect()
    }

    /// H1 error of the fine solution against its projection onto discontinuous order-`order` polynomials on `rects`
    fn error(&self, rects: &[Rect], order: u8) -> Result<f64, SelectionError> {
        let mut err_sq = 0.0;
        for rect in rects {
            err_sq += self.error_squared_on(rect, order)?;
        }
        Ok(err_sq.max(0.0).sqrt())
    }

    fn error_squared_on(&self, rect: &Rect, order: u8) -> Result<f64, SelectionError> {
        let pieces = self.pieces(rect);
        let fail = || SelectionError::Projection(self.elem_id);

        let np = order as usize + 1;
        let tables = ReferenceTables::new(order, num_glq_points(order, order));
        let gram = tables.stiffness(rect) + tables.mass(rect);

        let mut moments = vec![0.0; np * np];
        for (fine_id, piece) in pieces.iter() {
            add_h1_moments(self.fine, *fine_id, piece, rect, order, &mut moments).ok_or_else(fail)?;
        }

        let coefficients: Vec<f64> = gram
            .cholesky()
            .ok_or_else(fail)?
            .solve(&DVector::from_vec(moments))
            .iter()
            .copied()
            .collect();

        let fine_mesh = self.fine.space().mesh();
        let mut err_sq = 0.0;
        for (fine_id, piece) in pieces.iter() {
            let n = order.max(fine_mesh.elems[*fine_id].order);
            let quad = RectQuadrature::new(piece, num_glq_points(n, n));
            let u_f = self.fine.sample_leaf(*fine_id, &quad.x, &quad.y).ok_or_else(fail)?;
            let u_p = sample_expansion(order, rect, &coefficients, &quad.x, &quad.y);

            err_sq += quad.integrate(|m, n| {
                (u_f.values[m][n] - u_p.values[m][n]).powi(2)
                    + (u_f.dx[m][n] - u_p.dx[m][n]).powi(2)
                    + (u_f.dy[m][n] - u_p.dy[m][n]).powi(2)
            });
        }

        if err_sq.is_finite() {
            Ok(err_sq)
        } else {
            Err(fail())
        }
    }
}
