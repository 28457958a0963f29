//! Built-in transform functions.

mod tags;

pub use tags::AddTags;
