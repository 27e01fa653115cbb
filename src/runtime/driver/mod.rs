//! Host drivers wiring a scheduler to a concrete terminal or window.

pub mod cli;
