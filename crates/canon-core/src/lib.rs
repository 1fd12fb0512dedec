//! Core types and trait definitions for Canon, the customer identity
//! resolution engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! normaliser and matcher are pure; storage backends implement
//! [`store::IdentityStore`].

pub mod contact;
pub mod customer;
pub mod error;
pub mod matcher;
pub mod normalize;
pub mod queue;
pub mod sighting;
pub mod store;

pub use error::{Classify, Error, FailureClass, Result};
