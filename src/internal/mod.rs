pub mod comparator;
pub mod cursor;
pub mod geometry;
pub mod models;
pub mod naming;
pub mod resolver;
pub mod retry;
