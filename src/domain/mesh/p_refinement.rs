use super::MAX_POLYNOMIAL_ORDER;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PRefInt {
    Increment(u8),
    Decrement(u8),
    None,
}

impl PRefInt {
    fn refine(&self, n: u8) -> Result<u8, PRefError> {
        match self {
            Self::Increment(delta) => {
                if n + *delta > MAX_POLYNOMIAL_ORDER {
                    Err(PRefError::ExceededMaxExpansion)
                } else {
                    Ok(n + *delta)
                }
            }
            Self::Decrement(delta) => {
                if *delta >= n {
                    Err(PRefError::NegExpansion)
                } else {
                    Ok(n - *delta)
                }
            }
            Self::None => Ok(n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Description of a p-Refinement (a change in an Elem's polynomial order)
pub struct PRef {
    delta: PRefInt,
}

impl PRef {
    pub const fn from(delta: i8) -> Self {
        Self {
            delta: match delta {
                0 => PRefInt::None,
                d if d > 0 => PRefInt::Increment(d as u8),
                d => PRefInt::Decrement(d.unsigned_abs()),
            },
        }
    }

    /// Apply this refinement to some polynomial order
    pub fn refine(&self, order: u8) -> Result<u8, PRefError> {
        self.delta.refine(order)
    }
}

/// Check that an absolute polynomial order is allowed on an Elem
pub fn check_order(order: u8) -> Result<u8, PRefError> {
    if order == 0 {
        Err(PRefError::NegExpansion)
    } else if order > MAX_POLYNOMIAL_ORDER {
        Err(PRefError::ExceededMaxExpansion)
    } else {
        Ok(order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PRefError {
    NegExpansion,
    ExceededMaxExpansion,
    ElemDoesntExist(usize),
    ElemHasChildren(usize),
    DoubleRefinement(usize),
}

impl std::error::Error for PRefError {}

impl fmt::Display for PRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NegExpansion => write!(f, "p-Refinement will result in 0 or negative expansion; Cannot p-Refine!"),
            Self::ExceededMaxExpansion => write!(f, "p-Refinement will result in expansion order over maximum ({}); Cannot p-Refine!", MAX_POLYNOMIAL_ORDER),
            Self::ElemDoesntExist(elem_id) => write!(f, "Elem {} does not exist; Cannot apply p-Refinement!", elem_id),
            Self::ElemHasChildren(elem_id) => write!(f, "Elem {} is not a leaf; Cannot apply p-Refinement!", elem_id),
            Self::DoubleRefinement(elem_id) => write!(f, "Multiple p-refinements were specified for Elem {}; Cannot apply p-Refinements", elem_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_and_decrements() {
        assert_eq!(PRef::from(2).refine(3), Ok(5));
        assert_eq!(PRef::from(-2).refine(3), Ok(1));
        assert_eq!(PRef::from(0).refine(3), Ok(3));
    }

    #[test]
    fn out_of_range_orders() {
        assert_eq!(PRef::from(-3).refine(3), Err(PRefError::NegExpansion));
        assert_eq!(
            PRef::from(1).refine(MAX_POLYNOMIAL_ORDER),
            Err(PRefError::ExceededMaxExpansion)
        );
        assert_eq!(check_order(0), Err(PRefError::NegExpansion));
        assert_eq!(check_order(MAX_POLYNOMIAL_ORDER), Ok(MAX_POLYNOMIAL_ORDER));
    }
}
