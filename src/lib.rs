pub mod browser;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod gmrepo;
pub mod index;
pub mod ledger;
pub mod output;
pub mod store;
pub mod table;
