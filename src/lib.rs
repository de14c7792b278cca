//! Graphlate - automatic prompt translation for node-graph workflows
//!
//! Hooks into the submission path of a node-graph workflow runner, finds the
//! text that feeds every text-encoder node (through links, reroutes and
//! text-combining nodes) and translates it into the target language before
//! the workflow is executed.

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod classify;
pub mod resolve;
pub mod translate;
pub mod intercept;
pub mod install;
pub mod host;
pub mod workflow;
