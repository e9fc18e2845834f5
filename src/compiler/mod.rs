//! Template compiler.
//!
//! Pipeline: `parse → transform → generate`. Parse produces the
//! HTML-like AST; transform applies the fixed-order node transforms and
//! the directive transform table, annotating nodes with codegen IR;
//! generate packs the result into the portable render program the
//! renderer consumes.

pub mod ast;
pub mod codegen;
pub mod errors;
pub mod expr;
pub mod hoist;
pub mod parser;
pub mod transform;
pub mod transforms;

pub use ast::{RootNode, SourceLocation};
pub use errors::{CompileError, ErrorCode};
pub use parser::{parse, ParseResult, ParserOptions};
pub use transform::{
    transform, DirectiveTransform, DirectiveTransformResult, TransformContext, TransformOptions,
};

use crate::program::RenderProgram;

#[derive(Clone, Default)]
pub struct CompilerOptions {
    pub parser: ParserOptions,
    pub transform: TransformOptions,
}

impl CompilerOptions {
    pub fn standard() -> Self {
        Self {
            parser: ParserOptions::default(),
            transform: TransformOptions::standard(),
        }
    }
}

pub struct CompileResult {
    pub program: RenderProgram,
    pub errors: Vec<CompileError>,
}

/// Compile a template into a render program. Diagnostics accumulate
/// across both stages; a best-effort program is always produced.
pub fn compile(template: &str, options: CompilerOptions) -> CompileResult {
    let ParseResult { mut root, mut errors } = parse(template, options.parser);
    let transform_errors = transform(&mut root, options.transform);
    errors.extend(transform_errors);
    let program = codegen::generate(&mut root);
    CompileResult { program, errors }
}

// =============================================================================
// Whole-pipeline tests
// =============================================================================
