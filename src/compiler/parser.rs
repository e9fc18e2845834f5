//! Template parser.
//!
//! A cursor-driven parser over the HTML+directive dialect. It never
//! panics on malformed input: every defect emits a coded diagnostic
//! through the options and recovery continues (bogus comment, skipped
//! character, or implicitly closed element).

use std::rc::Rc;

use super::ast::{
    AttrOrDirective, CommentNode, DirectiveNode, ElementNode, ElementType, InterpolationNode,
    Namespace, Position, RootNode, SimpleExpr, SourceLocation, StaticAttr, TemplateNode, TextNode,
};
use super::errors::{CompileError, ErrorCode};

/// Tags that never have children.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Raw-text elements: children are uninterpreted text.
const RAW_TEXT_TAGS: &[&str] = &["style", "script", "iframe", "noscript"];

/// RCDATA elements: entities and interpolations, no child elements.
const RCDATA_TAGS: &[&str] = &["textarea", "title"];

const CORE_COMPONENTS: &[&str] = &["teleport", "keep-alive", "suspense"];

/// Text modes gate what the parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    Data,
    RcData,
    RawText,
    Cdata,
}

pub type OnError = Rc<dyn Fn(&CompileError)>;

#[derive(Clone, Default)]
pub struct ParserOptions {
    /// Interpolation delimiters; default `{{` / `}}`.
    pub delimiters: Option<(String, String)>,
    /// Called for every diagnostic, in addition to result collection.
    pub on_error: Option<OnError>,
    /// Host-provided built-in component predicate.
    pub is_builtin_component: Option<Rc<dyn Fn(&str) -> bool>>,
    /// Keep whitespace verbatim instead of condensing.
    pub preserve_whitespace: bool,
}

pub struct ParseResult {
    pub root: RootNode,
    pub errors: Vec<CompileError>,
}

/// Parse a template into its AST. Never fails: malformed input yields a
/// best-effort tree plus diagnostics.
pub fn parse(source: &str, options: ParserOptions) -> ParseResult {
    let delimiters = options
        .delimiters
        .clone()
        .unwrap_or_else(|| ("{{".to_string(), "}}".to_string()));
    let mut parser = Parser {
        source,
        pos: 0,
        line: 1,
        column: 1,
        options,
        delimiters,
        errors: Vec::new(),
        in_pre: false,
        in_v_pre: false,
    };
    let start = parser.position();
    let children = parser.parse_children(&mut Vec::new(), Namespace::Html, TextMode::Data);
    let root = RootNode {
        children,
        loc: SourceLocation::new(start, parser.position()),
        ..Default::default()
    };
    ParseResult { root, errors: parser.errors }
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    options: ParserOptions,
    delimiters: (String, String),
    errors: Vec<CompileError>,
    /// Inside a `<pre>` subtree: whitespace is verbatim.
    in_pre: bool,
    /// Inside a `v-pre` subtree: directives and interpolations are off.
    in_v_pre: bool,
}

impl<'a> Parser<'a> {
    // -- cursor ---------------------------------------------------------------

    fn position(&self) -> Position {
        Position { offset: self.pos, line: self.line, column: self.column }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn done(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn advance(&mut self, bytes: usize) {
        let consumed = &self.source[self.pos..self.pos + bytes];
        for c in consumed.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += bytes;
    }

    fn restore(&mut self, saved: Position) {
        self.pos = saved.offset;
        self.line = saved.line;
        self.column = saved.column;
    }

    fn advance_spaces(&mut self) {
        let n = self
            .rest()
            .find(|c: char| !matches!(c, ' ' | '\t' | '\r' | '\n'))
            .unwrap_or(self.rest().len());
        self.advance(n);
    }

    fn loc_from(&self, start: Position) -> SourceLocation {
        SourceLocation::new(start, self.position())
    }

    fn error(&mut self, code: ErrorCode) {
        self.error_at(code, self.position());
    }

    fn error_at(&mut self, code: ErrorCode, pos: Position) {
        let err = CompileError::new(code, SourceLocation::new(pos, pos));
        if let Some(hook) = &self.options.on_error {
            hook(&err);
        }
        self.errors.push(err);
    }

    // -- children -------------------------------------------------------------

    fn parse_children(
        &mut self,
        ancestors: &mut Vec<String>,
        ns: Namespace,
        mode: TextMode,
    ) -> Vec<TemplateNode> {
        let mut nodes: Vec<TemplateNode> = Vec::new();
        let open_delim = self.delimiters.0.clone();

        while !self.at_end(mode, ancestors) {
            let node = if matches!(mode, TextMode::Data | TextMode::RcData)
                && !self.in_v_pre
                && self.starts_with(&open_delim)
            {
                self.parse_interpolation()
            } else if mode == TextMode::Data && self.starts_with("<") {
                let rest = self.rest();
                if rest.len() == 1 {
                    self.error(ErrorCode::EofBeforeTagName);
                    self.advance(1);
                    None
                } else if rest.starts_with("<!--") {
                    self.parse_comment()
                } else if rest.starts_with("<!DOCTYPE") || rest.starts_with("<!doctype") {
                    // Doctype is a bogus comment.
                    self.parse_bogus_comment()
                } else if rest.starts_with("<![CDATA[") {
                    if ns != Namespace::Html {
                        self.parse_cdata(ancestors, ns)
                    } else {
                        self.error(ErrorCode::CdataInHtmlContent);
                        self.parse_bogus_comment()
                    }
                } else if rest.starts_with("<!") {
                    self.error(ErrorCode::IncorrectlyOpenedComment);
                    self.parse_bogus_comment()
                } else if rest.starts_with("</") {
                    self.parse_stray_end_tag(ancestors)
                } else if rest.starts_with("<?") {
                    self.error(ErrorCode::UnexpectedQuestionMarkInsteadOfTagName);
                    self.parse_bogus_comment()
                } else if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                    self.parse_element(ancestors, ns)
                } else {
                    self.error(ErrorCode::InvalidFirstCharacterOfTagName);
                    self.parse_text_as_node(mode)
                }
            } else {
                self.parse_text_as_node(mode)
            };
            if let Some(node) = node {
                nodes.push(node);
            }
        }

        merge_adjacent_text(&mut nodes);
        if mode == TextMode::Data && !self.options.preserve_whitespace {
            condense_whitespace(&mut nodes, self.in_pre);
        }
        nodes
    }

    fn at_end(&self, mode: TextMode, ancestors: &[String]) -> bool {
        if self.done() {
            return true;
        }
        let rest = self.rest();
        match mode {
            TextMode::Data => {
                if rest.starts_with("</") {
                    // Stop for any ancestor's end tag so missing end tags
                    // recover by implicit close.
                    for tag in ancestors.iter().rev() {
                        if starts_with_end_tag(rest, tag) {
                            return true;
                        }
                    }
                }
                false
            }
            TextMode::RcData | TextMode::RawText => match ancestors.last() {
                Some(parent) => starts_with_end_tag(rest, parent),
                None => true,
            },
            TextMode::Cdata => rest.starts_with("]]>"),
        }
    }

    /// `</tag>` matching no open element: diagnostic, consume, continue.
    fn parse_stray_end_tag(&mut self, ancestors: &[String]) -> Option<TemplateNode> {
        let rest = self.rest();
        if rest.starts_with("</>") {
            self.error(ErrorCode::MissingEndTagName);
            self.advance(3);
            return None;
        }
        if !rest[2..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            self.error(ErrorCode::InvalidFirstCharacterOfTagName);
            return self.parse_bogus_comment();
        }
        // A matching ancestor would have stopped the children loop.
        let _ = ancestors;
        self.error(ErrorCode::InvalidEndTag);
        let close = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
        self.advance(close);
        None
    }

    // -- text / interpolation -------------------------------------------------

    fn parse_text_as_node(&mut self, mode: TextMode) -> Option<TemplateNode> {
        let start = self.position();
        let rest = self.rest();
        let mut end = rest.len();
        // Text runs to the next construct this mode recognizes.
        let open_delim = &self.delimiters.0;
        if matches!(mode, TextMode::Data | TextMode::RcData) {
            if let Some(i) = rest.find(open_delim.as_str()) {
                end = end.min(i);
            }
        }
        if mode == TextMode::Data {
            if let Some(i) = rest.find('<') {
                end = end.min(i);
            }
        }
        if mode == TextMode::Cdata {
            if let Some(i) = rest.find("]]>") {
                end = end.min(i);
            }
        }
        if matches!(mode, TextMode::RcData | TextMode::RawText) {
            if let Some(i) = rest.find("</") {
                end = end.min(i);
            }
        }
        if end == 0 {
            // Lone `<` or delimiter fragment: consume one char as text.
            end = rest.chars().next().map(char::len_utf8).unwrap_or(0);
            if end == 0 {
                return None;
            }
        }
        let raw = &rest[..end];
        self.advance(end);
        let content = if mode == TextMode::RawText {
            raw.to_string()
        } else {
            self.decode_entities(raw)
        };
        Some(TemplateNode::Text(TextNode { content, loc: self.loc_from(start) }))
    }

    fn parse_interpolation(&mut self) -> Option<TemplateNode> {
        let (open, close) = (self.delimiters.0.clone(), self.delimiters.1.clone());
        let start = self.position();
        let rest = self.rest();
        let Some(close_index) = rest[open.len()..].find(close.as_str()) else {
            self.error(ErrorCode::MissingInterpolationEnd);
            self.advance(open.len());
            return None;
        };
        self.advance(open.len());
        let inner_start = self.position();
        let raw = &self.rest()[..close_index];
        let trimmed = raw.trim();
        let offset_in_raw = raw.find(trimmed).unwrap_or(0);
        let mut expr_start = inner_start;
        expr_start.offset += offset_in_raw;
        expr_start.column += offset_in_raw;
        self.advance(close_index);
        let inner_loc = SourceLocation::new(expr_start, self.position());
        self.advance(close.len());
        Some(TemplateNode::Interpolation(InterpolationNode {
            content: SimpleExpr::new(trimmed, inner_loc),
            loc: self.loc_from(start),
        }))
    }

    /// Decode the named references `&amp; &lt; &gt; &quot; &apos;` and
    /// numeric references. Unknown ampersand runs pass through verbatim.
    fn decode_entities(&mut self, raw: &str) -> String {
        if !raw.contains('&') {
            return raw.to_string();
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            rest = &rest[amp..];
            let decoded = decode_one_entity(rest);
            match decoded {
                Some((text, consumed, note)) => {
                    match note {
                        EntityNote::Clean => {}
                        EntityNote::MissingSemicolon => {
                            self.error(ErrorCode::MissingSemicolonAfterCharacterReference)
                        }
                        EntityNote::Null => self.error(ErrorCode::NullCharacterReference),
                        EntityNote::Surrogate => {
                            self.error(ErrorCode::SurrogateCharacterReference)
                        }
                    }
                    out.push_str(&text);
                    rest = &rest[consumed..];
                }
                None => {
                    if rest.starts_with("&#") {
                        self.error(ErrorCode::AbsenceOfDigitsInNumericCharacterReference);
                    }
                    out.push('&');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    // -- comments -------------------------------------------------------------

    fn parse_comment(&mut self) -> Option<TemplateNode> {
        let start = self.position();
        let rest = self.rest();
        // Abrupt closes: `<!-->` and `<!--->`.
        for abrupt in ["<!-->", "<!--->"] {
            if rest.starts_with(abrupt) {
                self.error(ErrorCode::AbruptClosingOfEmptyComment);
                self.advance(abrupt.len());
                return Some(TemplateNode::Comment(CommentNode {
                    content: String::new(),
                    loc: self.loc_from(start),
                }));
            }
        }
        let body = &rest[4..];
        let (content, consumed) = match body.find("-->") {
            Some(end) => {
                let content = &body[..end];
                if content.contains("<!--") {
                    self.error(ErrorCode::NestedComment);
                }
                (content.to_string(), 4 + end + 3)
            }
            None => match body.find("--!>") {
                Some(end) => {
                    self.error(ErrorCode::IncorrectlyClosedComment);
                    (body[..end].to_string(), 4 + end + 4)
                }
                None => {
                    self.error(ErrorCode::EofInComment);
                    (body.to_string(), rest.len())
                }
            },
        };
        self.advance(consumed);
        Some(TemplateNode::Comment(CommentNode { content, loc: self.loc_from(start) }))
    }

    /// Consume `<!...>` or `<?...>` as a comment node.
    fn parse_bogus_comment(&mut self) -> Option<TemplateNode> {
        let start = self.position();
        let rest = self.rest();
        let content_start = if rest.starts_with("<?") { 1 } else { 2 };
        let (content, consumed) = match rest.find('>') {
            Some(end) => (rest[content_start..end].to_string(), end + 1),
            None => (rest[content_start..].to_string(), rest.len()),
        };
        self.advance(consumed);
        Some(TemplateNode::Comment(CommentNode { content, loc: self.loc_from(start) }))
    }

    fn parse_cdata(
        &mut self,
        ancestors: &mut Vec<String>,
        ns: Namespace,
    ) -> Option<TemplateNode> {
        self.advance("<![CDATA[".len());
        let mut nodes = self.parse_children(ancestors, ns, TextMode::Cdata);
        if self.starts_with("]]>") {
            self.advance(3);
        } else {
            self.error(ErrorCode::EofInCdata);
        }
        // CDATA contributes its text directly.
        nodes.pop().or(None)
    }

    // -- elements -------------------------------------------------------------

    fn parse_element(
        &mut self,
        ancestors: &mut Vec<String>,
        parent_ns: Namespace,
    ) -> Option<TemplateNode> {
        let was_in_pre = self.in_pre;
        let was_in_v_pre = self.in_v_pre;

        let start = self.position();
        let mut element = self.parse_open_tag(parent_ns)?;

        if element.tag.eq_ignore_ascii_case("pre") {
            self.in_pre = true;
        }

        let is_void = VOID_TAGS.contains(&element.tag.as_str());
        if element.self_closing || is_void {
            element.loc = self.loc_from(start);
            self.in_pre = was_in_pre;
            self.in_v_pre = was_in_v_pre;
            return Some(TemplateNode::Element(element));
        }

        // Children.
        let mode = child_text_mode(&element.tag);
        ancestors.push(element.tag.clone());
        let ns = element.ns;
        let mut children = self.parse_children(ancestors, ns, mode);
        ancestors.pop();

        // Per the HTML spec, `<pre>` drops a leading newline.
        if self.in_pre && !was_in_pre {
            if let Some(TemplateNode::Text(first)) = children.first_mut() {
                if let Some(stripped) = first.content.strip_prefix('\n') {
                    first.content = stripped.to_string();
                }
            }
        }
        element.children = children;

        // End tag.
        if starts_with_end_tag(self.rest(), &element.tag) {
            self.consume_end_tag();
        } else {
            self.error_at(ErrorCode::MissingEndTag, start);
        }

        element.loc = self.loc_from(start);
        self.in_pre = was_in_pre;
        self.in_v_pre = was_in_v_pre;
        Some(TemplateNode::Element(element))
    }

    fn parse_open_tag(&mut self, parent_ns: Namespace) -> Option<ElementNode> {
        let start = self.position();
        let rest = self.rest();
        let name_len = rest[1..]
            .find(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n' | '/' | '>'))
            .unwrap_or(rest.len() - 1);
        let tag = rest[1..1 + name_len].to_string();
        self.advance(1 + name_len);

        let ns = match tag.as_str() {
            "svg" => Namespace::Svg,
            "math" => Namespace::MathMl,
            _ => parent_ns,
        };

        // First pass over attributes.
        let attrs_start = self.position();
        let error_mark = self.errors.len();
        let mut props = self.parse_attributes();

        // `v-pre`: discard the parse, rewind, re-parse with directive
        // interpretation off. Diagnostics of the discarded pass go too.
        let has_v_pre = !self.in_v_pre
            && props.iter().any(
                |p| matches!(p, AttrOrDirective::Directive(d) if d.name == "pre"),
            );
        if has_v_pre {
            self.in_v_pre = true;
            self.restore(attrs_start);
            self.errors.truncate(error_mark);
            props = self.parse_attributes();
            props.retain(|p| p.name() != "v-pre");
        }

        let self_closing = if self.starts_with("/>") {
            self.advance(2);
            true
        } else if self.starts_with(">") {
            self.advance(1);
            false
        } else {
            self.error(ErrorCode::EofInTag);
            false
        };

        let tag_type = if self.in_v_pre {
            ElementType::Plain
        } else {
            classify_element(&tag, &props, &self.options)
        };

        Some(ElementNode {
            tag,
            tag_type,
            ns,
            self_closing,
            props,
            children: Vec::new(),
            loc: self.loc_from(start),
            codegen: None,
        })
    }

    fn consume_end_tag(&mut self) {
        // `</tag ... >`
        self.advance(2);
        let name_len = self
            .rest()
            .find(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n' | '/' | '>'))
            .unwrap_or(self.rest().len());
        self.advance(name_len);
        self.advance_spaces();
        if !self.starts_with(">") {
            if self.starts_with("/>") {
                self.error(ErrorCode::EndTagWithTrailingSolidus);
                self.advance(2);
                return;
            }
            self.error(ErrorCode::EndTagWithAttributes);
            let close = self.rest().find('>').map(|i| i + 1).unwrap_or(self.rest().len());
            self.advance(close);
            return;
        }
        self.advance(1);
    }

    // -- attributes -----------------------------------------------------------

    fn parse_attributes(&mut self) -> Vec<AttrOrDirective> {
        let mut props: Vec<AttrOrDirective> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        loop {
            self.advance_spaces();
            if self.done() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            if self.starts_with("/") {
                self.error(ErrorCode::UnexpectedSolidusInTag);
                self.advance(1);
                continue;
            }
            let before = self.pos;
            if let Some(prop) = self.parse_attribute() {
                let raw_name = raw_attr_name(&prop);
                if seen.contains(&raw_name) {
                    self.error(ErrorCode::DuplicateAttribute);
                } else {
                    seen.push(raw_name);
                    props.push(prop);
                }
            }
            if self.pos == before {
                // Defensive break on zero progress; malformed input.
                self.advance(1);
            }
        }
        props
    }

    fn parse_attribute(&mut self) -> Option<AttrOrDirective> {
        let start = self.position();
        if self.starts_with("=") {
            self.error(ErrorCode::UnexpectedEqualsSignBeforeAttributeName);
            self.advance(1);
        }
        let rest = self.rest();
        let mut name_len = 0;
        for c in rest.chars() {
            if matches!(c, ' ' | '\t' | '\r' | '\n' | '/' | '>' | '=') {
                break;
            }
            if matches!(c, '"' | '\'' | '<') {
                self.error(ErrorCode::UnexpectedCharacterInAttributeName);
            }
            name_len += c.len_utf8();
        }
        if name_len == 0 {
            return None;
        }
        let name = rest[..name_len].to_string();
        self.advance(name_len);

        // Value.
        self.advance_spaces();
        let value = if self.starts_with("=") {
            self.advance(1);
            self.advance_spaces();
            self.parse_attribute_value()
        } else {
            None
        };

        let loc = self.loc_from(start);
        if !self.in_v_pre && is_directive_name(&name) {
            return Some(AttrOrDirective::Directive(self.build_directive(name, value, loc)));
        }
        Some(AttrOrDirective::Attr(StaticAttr { name, value, loc }))
    }

    fn parse_attribute_value(&mut self) -> Option<String> {
        let rest = self.rest();
        let quote = rest.chars().next()?;
        if quote == '"' || quote == '\'' {
            self.advance(1);
            let rest = self.rest();
            match rest.find(quote) {
                Some(end) => {
                    let raw = &rest[..end];
                    let decoded = self.decode_entities(raw);
                    self.advance(end + 1);
                    Some(decoded)
                }
                None => {
                    self.error(ErrorCode::EofInTag);
                    let len = rest.len();
                    let decoded = self.decode_entities(rest);
                    self.advance(len);
                    Some(decoded)
                }
            }
        } else if quote == '>' {
            self.error(ErrorCode::MissingAttributeValue);
            None
        } else {
            // Unquoted.
            let mut len = 0;
            for c in rest.chars() {
                if matches!(c, ' ' | '\t' | '\r' | '\n' | '>') {
                    break;
                }
                if matches!(c, '"' | '\'' | '<' | '=' | '`') {
                    self.error(ErrorCode::UnexpectedCharacterInUnquotedAttributeValue);
                }
                len += c.len_utf8();
            }
            let raw = &rest[..len];
            let decoded = self.decode_entities(raw);
            self.advance(len);
            Some(decoded)
        }
    }

    /// Split a raw directive attribute into name, argument, and modifiers.
    fn build_directive(
        &mut self,
        raw_name: String,
        value: Option<String>,
        loc: SourceLocation,
    ) -> DirectiveNode {
        let (name, after_name) = if let Some(rest) = raw_name.strip_prefix("v-") {
            match rest.find([':', '.']) {
                Some(i) if rest.as_bytes()[i] == b':' => {
                    (rest[..i].to_string(), Some(rest[i + 1..].to_string()))
                }
                Some(i) => {
                    // `v-name.mod` with no argument.
                    let (n, mods) = rest.split_at(i);
                    (n.to_string(), Some(format!("\u{0}{mods}")))
                }
                None => (rest.to_string(), None),
            }
        } else if let Some(rest) = raw_name.strip_prefix(':') {
            ("bind".to_string(), Some(rest.to_string()))
        } else if let Some(rest) = raw_name.strip_prefix('@') {
            ("on".to_string(), Some(rest.to_string()))
        } else if let Some(rest) = raw_name.strip_prefix('#') {
            ("slot".to_string(), Some(rest.to_string()))
        } else {
            (raw_name.clone(), None)
        };

        // Argument and dot-separated modifiers.
        let mut arg = None;
        let mut modifiers = Vec::new();
        if let Some(after) = after_name {
            let (arg_text, mods_text) = if let Some(stripped) = after.strip_prefix('\u{0}') {
                (None, Some(stripped.to_string()))
            } else if after.starts_with('[') {
                // Dynamic argument: modifiers follow the closing bracket.
                match after.find(']') {
                    Some(end) => {
                        let dynamic = &after[1..end];
                        let mods = after[end + 1..].strip_prefix('.').map(str::to_string);
                        (Some((dynamic.to_string(), false)), mods)
                    }
                    None => {
                        self.error(ErrorCode::MissingDynamicDirectiveArgumentEnd);
                        (Some((after[1..].to_string(), false)), None)
                    }
                }
            } else {
                match after.find('.') {
                    Some(i) => (
                        Some((after[..i].to_string(), true)),
                        Some(after[i + 1..].to_string()),
                    ),
                    None => (Some((after.clone(), true)), None),
                }
            };
            if let Some((content, is_static)) = arg_text {
                arg = Some(if is_static {
                    SimpleExpr::stat(content, loc)
                } else {
                    SimpleExpr::new(content, loc)
                });
            }
            if let Some(mods) = mods_text {
                modifiers = mods.split('.').filter(|m| !m.is_empty()).map(str::to_string).collect();
            }
        }

        let exp = value
            .filter(|v| !v.trim().is_empty())
            .map(|v| SimpleExpr::new(v.trim().to_string(), loc));
        DirectiveNode { name, arg, exp, modifiers, loc }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn is_directive_name(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix("v-") {
        return rest
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .unwrap_or(false);
    }
    name.starts_with(':') || name.starts_with('@') || name.starts_with('#')
}

fn raw_attr_name(prop: &AttrOrDirective) -> String {
    match prop {
        AttrOrDirective::Attr(a) => a.name.clone(),
        AttrOrDirective::Directive(d) => {
            let arg = d
                .arg
                .as_ref()
                .map(|a| a.content.clone())
                .unwrap_or_default();
            format!("{}:{arg}", d.name)
        }
    }
}

fn starts_with_end_tag(rest: &str, tag: &str) -> bool {
    if !rest.starts_with("</") {
        return false;
    }
    let after = &rest[2..];
    if after.len() < tag.len() || !after[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(
        after[tag.len()..].chars().next(),
        None | Some(' ' | '\t' | '\r' | '\n' | '/' | '>')
    )
}

fn child_text_mode(tag: &str) -> TextMode {
    let lower = tag.to_ascii_lowercase();
    if RAW_TEXT_TAGS.contains(&lower.as_str()) {
        TextMode::RawText
    } else if RCDATA_TAGS.contains(&lower.as_str()) {
        TextMode::RcData
    } else {
        TextMode::Data
    }
}

/// Classification order: `is` / `:is`, core components, host built-in
/// predicate, capitalized or `component`, `slot`, `template` with a
/// structural directive.
fn classify_element(tag: &str, props: &[AttrOrDirective], options: &ParserOptions) -> ElementType {
    let has_is = props.iter().any(|p| match p {
        AttrOrDirective::Attr(a) => a.name == "is",
        AttrOrDirective::Directive(d) => {
            d.name == "is"
                || (d.name == "bind"
                    && d.arg.as_ref().map(|a| a.content == "is").unwrap_or(false))
        }
    });
    if has_is {
        return ElementType::Component;
    }
    if CORE_COMPONENTS.contains(&tag.to_ascii_lowercase().as_str()) {
        return ElementType::Component;
    }
    if let Some(is_builtin) = &options.is_builtin_component {
        if is_builtin(tag) {
            return ElementType::Component;
        }
    }
    if tag.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false) || tag == "component" {
        return ElementType::Component;
    }
    if tag == "slot" {
        return ElementType::Slot;
    }
    if tag == "template" {
        let structural = props.iter().any(|p| {
            matches!(p, AttrOrDirective::Directive(d)
                if matches!(d.name.as_str(), "if" | "else" | "else-if" | "for" | "slot"))
        });
        if structural {
            return ElementType::Template;
        }
    }
    ElementType::Plain
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityNote {
    Clean,
    MissingSemicolon,
    Null,
    Surrogate,
}

fn decode_one_entity(rest: &str) -> Option<(String, usize, EntityNote)> {
    const NAMED: &[(&str, char)] = &[
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];
    for (entity, c) in NAMED {
        if rest.starts_with(entity) {
            return Some((c.to_string(), entity.len(), EntityNote::Clean));
        }
    }
    if let Some(body) = rest.strip_prefix("&#") {
        let (digits, radix, prefix_len) = if let Some(hex) = body.strip_prefix(['x', 'X']) {
            (hex, 16, 3)
        } else {
            (body, 10, 2)
        };
        let len = digits.chars().take_while(|c| c.is_ascii_hexdigit()).count();
        if len == 0 {
            return None;
        }
        let number = u32::from_str_radix(&digits[..len], radix).ok()?;
        let terminated = digits[len..].starts_with(';');
        let consumed = prefix_len + len + usize::from(terminated);
        let note = if number == 0 {
            EntityNote::Null
        } else if (0xD800..=0xDFFF).contains(&number) {
            EntityNote::Surrogate
        } else if !terminated {
            EntityNote::MissingSemicolon
        } else {
            EntityNote::Clean
        };
        let c = match char::from_u32(number) {
            Some(c) if number != 0 => c,
            _ => '\u{FFFD}',
        };
        return Some((c.to_string(), consumed, note));
    }
    None
}

/// Merge adjacent text children with contiguous source ranges.
fn merge_adjacent_text(nodes: &mut Vec<TemplateNode>) {
    let mut i = 0;
    while i + 1 < nodes.len() {
        let contiguous = match (&nodes[i], &nodes[i + 1]) {
            (TemplateNode::Text(a), TemplateNode::Text(b)) => a.loc.end.offset == b.loc.start.offset,
            _ => false,
        };
        if contiguous {
            let TemplateNode::Text(b) = nodes.remove(i + 1) else { unreachable!() };
            let TemplateNode::Text(a) = &mut nodes[i] else { unreachable!() };
            a.content.push_str(&b.content);
            a.loc.end = b.loc.end;
        } else {
            i += 1;
        }
    }
}

/// The whitespace policy: drop whitespace-only runs at the edges, next to
/// comments, or between elements when they span a newline; collapse
/// everything else to a single space. Inside `<pre>` nothing is touched.
fn condense_whitespace(nodes: &mut Vec<TemplateNode>, in_pre: bool) {
    if in_pre {
        return;
    }
    let len = nodes.len();
    let mut drop: Vec<bool> = vec![false; len];
    for i in 0..len {
        let TemplateNode::Text(text) = &nodes[i] else { continue };
        let all_ws = text.content.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
        if all_ws {
            let prev = if i == 0 { None } else { Some(&nodes[i - 1]) };
            let next = nodes.get(i + 1);
            let edge = prev.is_none() || next.is_none();
            let comment_neighbor = matches!(prev, Some(TemplateNode::Comment(_)))
                || matches!(next, Some(TemplateNode::Comment(_)));
            let between_elements_with_newline = matches!(prev, Some(TemplateNode::Element(_)))
                && matches!(next, Some(TemplateNode::Element(_)))
                && text.content.contains('\n');
            drop[i] = edge || comment_neighbor || between_elements_with_newline;
        }
    }
    let mut index = 0;
    nodes.retain(|_| {
        let d = drop[index];
        index += 1;
        !d
    });

    let last = nodes.len().saturating_sub(1);
    for (i, node) in nodes.iter_mut().enumerate() {
        if let TemplateNode::Text(text) = node {
            let mut collapsed = collapse_whitespace(&text.content);
            if i == 0 {
                collapsed = collapsed.trim_start().to_string();
            }
            if i == last {
                collapsed = collapsed.trim_end().to_string();
            }
            text.content = collapsed;
        }
    }
    nodes.retain(|n| !matches!(n, TemplateNode::Text(t) if t.content.is_empty()));
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if matches!(c, ' ' | '\t' | '\r' | '\n') {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> RootNode {
        let result = parse(src, ParserOptions::default());
        assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
        result.root
    }

    fn first_element(root: &RootNode) -> &ElementNode {
        match &root.children[0] {
            TemplateNode::Element(el) => el,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_element() {
        let root = parse_ok("<div class=\"app\">hi</div>");
        let el = first_element(&root);
        assert_eq!(el.tag, "div");
        assert_eq!(el.tag_type, ElementType::Plain);
        assert_eq!(el.find_attr("class").unwrap().value.as_deref(), Some("app"));
        assert!(matches!(&el.children[0], TemplateNode::Text(t) if t.content == "hi"));
    }

    #[test]
    fn test_interpolation() {
        let root = parse_ok("<p>{{ message }}</p>");
        let el = first_element(&root);
        match &el.children[0] {
            TemplateNode::Interpolation(i) => assert_eq!(i.content.content, "message"),
            other => panic!("expected interpolation, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_delimiters() {
        let result = parse(
            "<p>[[ x ]]</p>",
            ParserOptions {
                delimiters: Some(("[[".into(), "]]".into())),
                ..Default::default()
            },
        );
        let el = first_element(&result.root);
        assert!(matches!(&el.children[0], TemplateNode::Interpolation(i)
            if i.content.content == "x"));
    }

    #[test]
    fn test_directive_forms() {
        let root = parse_ok(r#"<a v-bind:href="url" :title="t" @click.stop="go" #head></a>"#);
        let el = first_element(&root);
        let dirs: Vec<_> = el
            .props
            .iter()
            .filter_map(|p| match p {
                AttrOrDirective::Directive(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(dirs.len(), 4);
        assert_eq!(dirs[0].name, "bind");
        assert_eq!(dirs[0].arg.as_ref().unwrap().content, "href");
        assert_eq!(dirs[1].name, "bind");
        assert_eq!(dirs[1].arg.as_ref().unwrap().content, "title");
        assert_eq!(dirs[2].name, "on");
        assert_eq!(dirs[2].modifiers, vec!["stop"]);
        assert_eq!(dirs[3].name, "slot");
        assert_eq!(dirs[3].arg.as_ref().unwrap().content, "head");
    }

    #[test]
    fn test_dynamic_directive_argument() {
        let root = parse_ok(r#"<a v-bind:[attr]="v"></a>"#);
        let el = first_element(&root);
        let AttrOrDirective::Directive(d) = &el.props[0] else { panic!("expected directive") };
        let arg = d.arg.as_ref().unwrap();
        assert_eq!(arg.content, "attr");
        assert!(!arg.is_static);
    }

    #[test]
    fn test_modifiers_after_dynamic_argument() {
        let root = parse_ok(r#"<a v-on:[ev].stop="v"></a>"#);
        let el = first_element(&root);
        let AttrOrDirective::Directive(d) = &el.props[0] else { panic!("expected directive") };
        assert_eq!(d.modifiers, vec!["stop"]);
    }

    #[test]
    fn test_classification() {
        let root = parse_ok(
            "<MyWidget/><component/><teleport/><slot/><template v-if=\"a\"></template><template></template>",
        );
        let types: Vec<ElementType> = root
            .children
            .iter()
            .map(|n| match n {
                TemplateNode::Element(el) => el.tag_type,
                other => panic!("expected element, got {other:?}"),
            })
            .collect();
        assert_eq!(
            types,
            vec![
                ElementType::Component,
                ElementType::Component,
                ElementType::Component,
                ElementType::Slot,
                ElementType::Template,
                // A bare <template> is a plain element.
                ElementType::Plain,
            ]
        );
    }

    #[test]
    fn test_v_pre_disables_directives_and_interpolation() {
        let root = parse_ok(r#"<span v-pre>{{ expr }}</span>"#);
        let el = first_element(&root);
        assert!(el.props.is_empty(), "v-pre itself is filtered: {:?}", el.props);
        assert_eq!(el.children.len(), 1);
        assert!(matches!(&el.children[0], TemplateNode::Text(t) if t.content == "{{ expr }}"));
    }

    #[test]
    fn test_v_pre_keeps_directive_syntax_as_plain_attrs() {
        let root = parse_ok(r#"<span v-pre :id="x"></span>"#);
        let el = first_element(&root);
        assert!(matches!(&el.props[0], AttrOrDirective::Attr(a) if a.name == ":id"));
    }

    #[test]
    fn test_whitespace_collapse() {
        let root = parse_ok("<p>  a  \n  b  </p>");
        let el = first_element(&root);
        assert_eq!(el.children.len(), 1);
        assert!(matches!(&el.children[0], TemplateNode::Text(t) if t.content == "a b"));
    }

    #[test]
    fn test_whitespace_between_elements_dropped() {
        let root = parse_ok("<div>\n  <span/>\n  <span/>\n</div>");
        let el = first_element(&root);
        assert_eq!(el.children.len(), 2);
        assert!(el.children.iter().all(|c| matches!(c, TemplateNode::Element(_))));
    }

    #[test]
    fn test_whitespace_between_inline_content_kept() {
        let root = parse_ok("<p>a <b>x</b> c</p>");
        let el = first_element(&root);
        assert_eq!(el.children.len(), 3);
        assert!(matches!(&el.children[0], TemplateNode::Text(t) if t.content == "a "));
        assert!(matches!(&el.children[2], TemplateNode::Text(t) if t.content == " c"));
    }

    #[test]
    fn test_pre_preserves_whitespace() {
        let root = parse_ok("<pre>\n  keep   this\n</pre>");
        let el = first_element(&root);
        // Leading newline stripped, inner whitespace kept.
        assert!(matches!(&el.children[0], TemplateNode::Text(t)
            if t.content == "  keep   this\n"));
    }

    #[test]
    fn test_entities() {
        let root = parse_ok("<p>&lt;a&gt; &amp; &#65;&#x42;</p>");
        let el = first_element(&root);
        assert!(matches!(&el.children[0], TemplateNode::Text(t) if t.content == "<a> & AB"));
    }

    #[test]
    fn test_comment() {
        let root = parse_ok("<!-- note -->");
        assert!(matches!(&root.children[0], TemplateNode::Comment(c) if c.content == " note "));
    }

    #[test]
    fn test_nested_comment_diagnostic() {
        let result = parse("<!-- a <!-- b -->", ParserOptions::default());
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::NestedComment));
    }

    #[test]
    fn test_doctype_is_bogus_comment() {
        let result = parse("<!DOCTYPE html><div/>", ParserOptions::default());
        assert!(matches!(&result.root.children[0], TemplateNode::Comment(_)));
        assert!(matches!(&result.root.children[1], TemplateNode::Element(_)));
    }

    #[test]
    fn test_missing_end_tag_recovers() {
        let result = parse("<div><span></div>", ParserOptions::default());
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::MissingEndTag));
        let el = first_element(&result.root);
        assert_eq!(el.tag, "div");
        assert_eq!(el.children.len(), 1);
    }

    #[test]
    fn test_invalid_end_tag_diagnostic() {
        let result = parse("<div></nope></div>", ParserOptions::default());
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::InvalidEndTag));
    }

    #[test]
    fn test_duplicate_attribute_diagnostic() {
        let result = parse(r#"<div id="a" id="b"></div>"#, ParserOptions::default());
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::DuplicateAttribute));
        let el = first_element(&result.root);
        // Last duplicate is dropped.
        assert_eq!(el.find_attr("id").unwrap().value.as_deref(), Some("a"));
    }

    #[test]
    fn test_missing_interpolation_end() {
        let result = parse("<p>{{ broken</p>", ParserOptions::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == ErrorCode::MissingInterpolationEnd));
    }

    #[test]
    fn test_raw_text_children() {
        let root = parse_ok("<style>a { color: red; } {{ not_interp }}</style>");
        let el = first_element(&root);
        assert!(matches!(&el.children[0], TemplateNode::Text(t)
            if t.content.contains("{{ not_interp }}")));
    }

    #[test]
    fn test_void_tags_have_no_children() {
        let root = parse_ok("<div><br><img src=\"x\"></div>");
        let el = first_element(&root);
        assert_eq!(el.children.len(), 2);
    }

    #[test]
    fn test_parse_never_panics_on_garbage() {
        for src in ["<", "</", "<!", "<div", "<div a=<", "<a b='", "{{", "<//>", "<?php ?>"] {
            let _ = parse(src, ParserOptions::default());
        }
    }

    #[test]
    fn test_on_error_hook_receives_diagnostics() {
        use std::cell::RefCell;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _ = parse(
            "<div></div></div>",
            ParserOptions {
                on_error: Some(Rc::new(move |e| s.borrow_mut().push(e.code))),
                ..Default::default()
            },
        );
        assert_eq!(*seen.borrow(), vec![ErrorCode::InvalidEndTag]);
    }

    #[test]
    fn test_reparse_equal_up_to_locations() {
        let src = r#"<div :id="x"><p v-if="ok">{{ a }} text</p><p v-else>n</p></div>"#;
        let mut a = parse(src, ParserOptions::default()).root;
        let mut b = parse(src, ParserOptions::default()).root;
        super::super::ast::strip_locations(&mut a.children);
        super::super::ast::strip_locations(&mut b.children);
        assert_eq!(a.children, b.children);
    }
}
