//! Render-program runtime.

pub mod eval;

pub use eval::{eval_expr, render_component_root, Scope};
