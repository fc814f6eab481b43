//! # bytemut
//!
//! `bytemut` is a mutation-testing engine for a small stack bytecode, organized around:
//! - `bytecode`: the program model, verifier, runtime library and interpreter
//! - `mutation`: operators, coverage-scoped mutant jobs, execution containers and reports
//!
//! A run loads a [`bytecode::Program`], executes the unmutated test suite once to learn which
//! tests cover which groups, then builds one mutant per mutation point and classifies whether
//! the scoped tests detect it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod bytecode;
pub mod mutation;
