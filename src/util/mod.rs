//! Helpers shared by tests and tooling

pub mod random;

pub use random::RandomGen;
