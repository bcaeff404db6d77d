pub mod defs;

pub use defs::{ALL, Article, Category, FailureRecord, ImageResolved, Source};
