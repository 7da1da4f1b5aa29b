pub mod config;
pub mod discover;
pub mod fetch;
pub mod ledger;
pub mod materialize;
pub mod paths;
pub mod plan;
pub mod reconcile;
pub mod unpack;
pub mod util;
