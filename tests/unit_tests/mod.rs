mod config;
mod constrained;
mod element_matrices;
mod sparse;
