#![cfg_attr(feature = "nightly", feature(backtrace))]

pub(crate) mod deps {
    pub use derive_more;
    pub use lazy_static;
    pub use log;
    pub use serde;
    pub use thiserror;
}

mod fmt;

pub mod checker;
pub mod error;
pub mod instrument;
pub mod paint;
pub mod reporter;
pub mod request;
pub mod tag;
pub mod tagstore;

pub use crate::{
    error::Error,
    tag::{PaintTag, Tag},
    tagstore::TagStore,
};
