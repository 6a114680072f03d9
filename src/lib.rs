pub mod catalog;

pub mod deployment;

pub mod error;

pub mod history;

pub mod ledger;

pub mod opening;

pub mod roll;

pub mod session;

pub mod storage;

pub use error::{
    Error,
    Result,
};
