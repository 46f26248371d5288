//! Kiln, a dependency graph resolver and binary package planner for
//! C/C++ package recipes.

#![warn(missing_docs)]

pub mod cli;
