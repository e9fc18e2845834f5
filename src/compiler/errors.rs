//! Compile diagnostics.
//!
//! The parser never throws: every malformed construct emits a coded
//! diagnostic through the caller-supplied `on_error` hook and recovery
//! continues. The transform is fail-soft per node the same way.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ast::SourceLocation;

/// The closed set of diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // -- parse: structure ----------------------------------------------------
    AbruptClosingOfEmptyComment,
    CdataInHtmlContent,
    DuplicateAttribute,
    EndTagWithAttributes,
    EndTagWithTrailingSolidus,
    EofBeforeTagName,
    EofInCdata,
    EofInComment,
    EofInTag,
    IncorrectlyClosedComment,
    IncorrectlyOpenedComment,
    InvalidFirstCharacterOfTagName,
    MissingAttributeValue,
    MissingEndTagName,
    MissingWhitespaceBetweenAttributes,
    NestedComment,
    UnexpectedCharacterInAttributeName,
    UnexpectedCharacterInUnquotedAttributeValue,
    UnexpectedEqualsSignBeforeAttributeName,
    UnexpectedNullCharacter,
    UnexpectedQuestionMarkInsteadOfTagName,
    UnexpectedSolidusInTag,
    AbsenceOfDigitsInNumericCharacterReference,
    MissingSemicolonAfterCharacterReference,
    NullCharacterReference,
    SurrogateCharacterReference,
    UnknownEntity,

    // -- parse: template dialect ---------------------------------------------
    MissingInterpolationEnd,
    MissingDynamicDirectiveArgumentEnd,
    MissingEndTag,
    InvalidEndTag,

    // -- transform -----------------------------------------------------------
    InvalidExpression,
    MissingExpression,
    MisplacedVIf,
    MisplacedVSlot,
    MisplacedCharacterData,
    DuplicateSlotName,
    MalformedForExpression,
    UnexpectedDirectiveOnSlotOutlet,
    InvalidModelTarget,
    CacheExplosion,
}

impl ErrorCode {
    pub fn message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            AbruptClosingOfEmptyComment => "abrupt closing of empty comment",
            CdataInHtmlContent => "CDATA section is only allowed in foreign content",
            DuplicateAttribute => "duplicate attribute",
            EndTagWithAttributes => "end tag cannot have attributes",
            EndTagWithTrailingSolidus => "end tag cannot be self-closing",
            EofBeforeTagName => "unexpected end of input before tag name",
            EofInCdata => "unexpected end of input in CDATA section",
            EofInComment => "unexpected end of input in comment",
            EofInTag => "unexpected end of input in tag",
            IncorrectlyClosedComment => "incorrectly closed comment",
            IncorrectlyOpenedComment => "incorrectly opened comment",
            InvalidFirstCharacterOfTagName => "invalid first character of tag name",
            MissingAttributeValue => "missing attribute value",
            MissingEndTagName => "missing end tag name",
            MissingWhitespaceBetweenAttributes => "missing whitespace between attributes",
            NestedComment => "nested comment",
            UnexpectedCharacterInAttributeName => "unexpected character in attribute name",
            UnexpectedCharacterInUnquotedAttributeValue => {
                "unexpected character in unquoted attribute value"
            }
            UnexpectedEqualsSignBeforeAttributeName => {
                "unexpected equals sign before attribute name"
            }
            UnexpectedNullCharacter => "unexpected null character",
            UnexpectedQuestionMarkInsteadOfTagName => {
                "unexpected question mark instead of tag name"
            }
            UnexpectedSolidusInTag => "unexpected solidus in tag",
            AbsenceOfDigitsInNumericCharacterReference => {
                "numeric character reference has no digits"
            }
            MissingSemicolonAfterCharacterReference => {
                "character reference is missing its semicolon"
            }
            NullCharacterReference => "null character reference",
            SurrogateCharacterReference => "surrogate character reference",
            UnknownEntity => "unknown character reference",
            MissingInterpolationEnd => "interpolation is missing its end delimiter",
            MissingDynamicDirectiveArgumentEnd => {
                "dynamic directive argument is missing its closing bracket"
            }
            MissingEndTag => "element is missing its end tag",
            InvalidEndTag => "end tag has no matching open element",
            InvalidExpression => "invalid expression in template",
            MissingExpression => "directive is missing its expression",
            MisplacedVIf => "v-else / v-else-if has no adjacent v-if",
            MisplacedVSlot => "v-slot can only be used on components or <template>",
            MisplacedCharacterData => "text is not allowed here",
            DuplicateSlotName => "duplicate slot name",
            MalformedForExpression => "malformed v-for expression",
            UnexpectedDirectiveOnSlotOutlet => "<slot> outlets accept no directives besides bind",
            InvalidModelTarget => "v-model target must be assignable",
            CacheExplosion => "too many cached expressions in one template",
        }
    }
}

/// A diagnostic with its source range.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{} at {}:{}", .code.message(), .loc.start.line, .loc.start.column)]
pub struct CompileError {
    pub code: ErrorCode,
    pub loc: SourceLocation,
    /// Optional secondary message (e.g. the offending name).
    pub detail: Option<String>,
}

impl CompileError {
    pub fn new(code: ErrorCode, loc: SourceLocation) -> Self {
        Self { code, loc, detail: None }
    }

    pub fn with_detail(code: ErrorCode, loc: SourceLocation, detail: impl Into<String>) -> Self {
        Self { code, loc, detail: Some(detail.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::SourceLocation;

    #[test]
    fn test_error_display_includes_position() {
        let err = CompileError::new(ErrorCode::MissingEndTag, SourceLocation::stub());
        let rendered = err.to_string();
        assert!(rendered.contains("missing its end tag"));
        assert!(rendered.contains("1:1"));
    }
}
