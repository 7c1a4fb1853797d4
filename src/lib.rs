//! Feed aggregation: fetch RSS, Reddit Atom and Slashdot RDF feeds,
//! normalize their items into [`feed::Article`]s and deliver the ones not
//! published in an earlier run.

pub mod config;
pub mod feed;
pub mod notify;
pub mod run;
pub mod storage;
