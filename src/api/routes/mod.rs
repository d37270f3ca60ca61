//! API Routes
//!
//! Route handlers organized by functionality.

pub mod annotation;
pub mod meta;
pub mod put;
pub mod query;
pub mod search;
