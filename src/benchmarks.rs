/// Laplace equation on an L-shaped domain with a singular gradient at the re-entrant corner
pub mod lshape;
