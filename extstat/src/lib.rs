//! ## Background
//!
//! The planner estimates the selectivity of a filter on several columns by multiplying the
//! selectivities of the single column conditions. That's fine for independent columns, and
//! badly wrong for correlated ones, e.g. `city = 'Paris' AND country = 'France'`. Extended
//! statistics [1] fix this: they keep the number of distinct combinations, functional
//! dependencies and most common value combinations of a group of columns and expressions.
//! They are only used when someone creates them though, and picking the right groups by hand is
//! hard.
//!
//! This crate picks them automatically, from two sources:
//!
//! * Multi-column indexes. The keys of an index are usually queried together.
//! * Executed queries. When a scan produced far more or far fewer rows than the planner
//! predicted, the columns of its filter are reported as a statistics candidate.
//!
//! Before a definition is created it's compared against what the relation already has, so
//! that redundant kinds aren't built twice and definitions made obsolete by the new one are
//! narrowed or dropped.
//!
//! ## Design
//!
//! * [`stat`] Statistics definition model.
//! * [`classifier`] Filter clauses usable by multivariate statistics.
//! * [`comparator`] Overlap detection against stored definitions.
//! * [`collector`] Per session candidate collection and estimation error detection.
//! * [`signature`] Process wide registry of created definitions.
//! * [`generator`] Statistics creation for new indexes.
//! * [`hooks`] Callbacks invoked by the host.
//! * [`catalog`] Boundary to the host statistics catalog.
//! * [`config`] Options.
//!
//! ## Reference
//!
//! 1. PostgreSQL documentation, chapter 76.2. Multivariate Statistics Examples,
//! https://www.postgresql.org/docs/current/multivariate-statistics-examples.html
//! 2. Leis, V., Gubichev, A., Mirchev, A., Boncz, P., Kemper, A. and Neumann, T., 2015. How
//! good are query optimizers, really? Proceedings of the VLDB Endowment, 9(3), pp.204-215.

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;

pub mod catalog;
pub mod classifier;
pub mod collector;
pub mod comparator;
pub mod config;
pub mod error;
pub mod generator;
pub mod hooks;
pub mod signature;
pub mod stat;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
