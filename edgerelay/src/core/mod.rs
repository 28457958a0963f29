//! Core value types shared by every pipeline function.
//!
//! - [`Data`]: the value passed from one function to the next
//! - [`Flow`]: the continue/halt decision a function returns

mod data;
mod flow;

pub use data::Data;
pub use flow::Flow;
