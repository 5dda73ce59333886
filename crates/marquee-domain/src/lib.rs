//! Framework-free types shared by Marquee services: identifiers, list
//! pagination and key normalization.

pub mod id;
pub mod pagination;
pub mod text;
