//! Default implementations of [crate::backend::Connector]

pub mod redis;
