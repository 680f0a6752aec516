/// Boundary condition classification and values
pub mod bc;
/// The geometric structure and refinement state of a problem
pub mod mesh;
/// Continuous piecewise polynomial spaces over a Mesh
pub mod space;
