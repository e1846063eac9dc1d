#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod divide;
pub mod error;
pub mod group;
pub mod header;
pub mod timer;
pub mod unify;

pub use crate::{
    divide::Divider,
    header::{FragmentHeader, HEADER_SIZE, MAX_BLOCK_COUNT, PROTOCOL_SEQ, PROTOCOL_XOR},
    unify::{Unifier, UnifierConfig},
};
