//! Parser for MLIR snapshot text
//!
//! Builds an arena tree in a fresh [`Context`]. Both the generic form
//! (`"dialect.op"(...) ... : type`) and custom assembly forms are accepted;
//! custom bodies are kept as text interleaved with the pieces the tracer
//! needs to reach: inline attributes, attribute dictionaries, nested regions
//! and locations.

use std::collections::HashMap;

use crate::mlir::ir::*;
use crate::mlir::lexer::{find_top_level_location, is_suffix_char, split_top_level, Lexer};
use crate::utils::{Error, Result};

/// Keywords that introduce an inline literal attribute in custom syntax
const INLINE_ATTRIBUTE_KEYWORDS: &[&str] = &[
    "dense",
    "dense_resource",
    "array",
    "sparse",
    "affine_map",
    "affine_set",
];

/// Maximum nesting of location aliases that will be expanded
const MAX_ALIAS_DEPTH: usize = 16;

/// A top-level `#name = ...` or `!name = ...` definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasDefinition {
    pub name: String,
    pub value: String,
}

/// A parsed snapshot: the owning context plus its root module operation
#[derive(Debug)]
pub struct Module {
    context: Context,
    body: OpId,
}

impl Module {
    /// Parse `source` into `context`, which the module then owns
    pub fn parse(source: &str, context: Context) -> Result<Self> {
        Parser::new(source, context).parse_module()
    }

    /// The root `builtin.module` operation
    pub fn operation(&self) -> OpId {
        self.body
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}

/// The parser
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    context: Context,
    aliases: Vec<AliasDefinition>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, context: Context) -> Self {
        Self { lexer: Lexer::new(source), context, aliases: Vec::new() }
    }

    // ==================== Module ====================

    /// Parse a complete snapshot
    pub fn parse_module(mut self) -> Result<Module> {
        let mut top_level = Vec::new();
        loop {
            self.lexer.skip_whitespace();
            match self.lexer.peek() {
                None => break,
                Some(b'#' | b'!') => self.parse_alias()?,
                Some(b'{') if self.lexer.starts_with("{-#") => self.skip_resources()?,
                Some(_) => top_level.push(self.parse_operation()?),
            }
        }

        let body = match top_level.as_slice() {
            [single] if is_module_name(&self.context.op(*single)?.name) => *single,
            _ => self.implicit_module(top_level),
        };

        self.resolve_location_aliases();
        Ok(Module { context: self.context, body })
    }

    /// Wrap loose top-level operations the way MLIR does
    fn implicit_module(&mut self, operations: Vec<OpId>) -> OpId {
        let block = self.context.add_block(Block { label: None, arguments: Vec::new(), operations });
        let region = self.context.add_region(Region { blocks: vec![block] });
        self.context.add_operation(Operation {
            name: "builtin.module".to_string(),
            results: Vec::new(),
            operands: Vec::new(),
            attributes: Vec::new(),
            regions: vec![region],
            location: Location::Unknown,
            inner_locations: Vec::new(),
            syntax: Syntax::Custom { body: vec![Piece::Text(" ".to_string()), Piece::Region(0)] },
        })
    }

    fn parse_alias(&mut self) -> Result<()> {
        let name = self.lexer.read_prefixed()?.to_string();
        self.lexer.skip_inline_whitespace();
        self.lexer.expect(b'=')?;
        self.lexer.skip_inline_whitespace();
        let value = self.lexer.scan_line_tail(false)?.to_string();
        self.aliases.push(AliasDefinition { name, value });
        Ok(())
    }

    /// Skip a `{-# ... #-}` resource section
    fn skip_resources(&mut self) -> Result<()> {
        let start = self.lexer.pos();
        while !self.lexer.starts_with("#-}") {
            if self.lexer.advance().is_none() {
                return Err(self.lexer.eof_error(start, "'#-}'"));
            }
        }
        self.lexer.advance();
        self.lexer.advance();
        self.lexer.advance();
        Ok(())
    }

    /// Replace `#locN` references with their definitions
    fn resolve_location_aliases(&mut self) {
        let definitions: HashMap<&str, &str> = self
            .aliases
            .iter()
            .filter_map(|alias| location_inner(&alias.value).map(|inner| (alias.name.as_str(), inner)))
            .collect();

        for location in self.context.all_locations_mut() {
            if let Location::Known(text) = location {
                let expanded = expand_aliases(text, &definitions, 0);
                *location = location_from_text(&expanded);
            }
        }
    }

    // ==================== Operations ====================

    /// Parse one operation; the lexer stops at the end of its last line
    pub fn parse_operation(&mut self) -> Result<OpId> {
        let start = self.lexer.pos();
        let mut results = Vec::new();
        if self.lexer.peek() == Some(b'%') {
            loop {
                results.push(self.lexer.read_value()?.to_string());
                self.lexer.skip_inline_whitespace();
                if self.lexer.peek() != Some(b',') {
                    break;
                }
                self.lexer.advance();
                self.lexer.skip_inline_whitespace();
            }
            self.lexer.expect(b'=')?;
            self.lexer.skip_inline_whitespace();
        }

        let op = match self.lexer.peek() {
            Some(b'"') => self.parse_generic(results, start)?,
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.parse_custom(results, start)?,
            Some(_) => return Err(self.lexer.error(start, "expected operation name")),
            None => return Err(self.lexer.eof_error(start, "operation")),
        };
        Ok(self.context.add_operation(op))
    }

    fn check_dialect(&self, name: &str, start: usize) -> Result<()> {
        let dialect = dialect_of(name);
        if self.context.is_registered(dialect) {
            Ok(())
        } else {
            Err(Error::UnregisteredDialect {
                dialect: dialect.to_string(),
                op: name.to_string(),
                span: self.lexer.span_from(start),
            })
        }
    }

    /// `"dialect.op"(%a, %b) [^bb1] <{props}> ({...}) {attrs} : type loc(...)`
    fn parse_generic(&mut self, results: Vec<String>, start: usize) -> Result<Operation> {
        let quoted = self.lexer.read_string()?;
        let name = quoted[1..quoted.len() - 1].to_string();
        self.check_dialect(&name, start)?;

        self.lexer.skip_inline_whitespace();
        if self.lexer.peek() != Some(b'(') {
            return Err(self.lexer.error(start, format!("expected operand list after \"{}\"", name)));
        }
        let operands = split_top_level(strip_brackets(self.lexer.scan_balanced()?), b',')
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut attributes = Vec::new();

        self.lexer.skip_inline_whitespace();
        let mut successors = Vec::new();
        if self.lexer.peek() == Some(b'[') {
            successors = split_top_level(strip_brackets(self.lexer.scan_balanced()?), b',')
                .into_iter()
                .map(str::to_string)
                .collect();
        }

        self.lexer.skip_inline_whitespace();
        let mut properties = None;
        if self.lexer.starts_with("<{") {
            let text = self.lexer.scan_balanced()?;
            properties = Some(parse_entries(strip_brackets(strip_brackets(text)), &mut attributes));
        }

        self.lexer.skip_inline_whitespace();
        let mut regions = Vec::new();
        if self.lexer.peek() == Some(b'(') {
            regions = self.parse_region_list()?;
        }

        self.lexer.skip_inline_whitespace();
        let mut dictionary = None;
        if self.lexer.peek() == Some(b'{') {
            let text = self.lexer.scan_balanced()?;
            dictionary = Some(parse_entries(strip_brackets(text), &mut attributes));
        }

        self.lexer.skip_inline_whitespace();
        let mut signature = None;
        if self.lexer.peek() == Some(b':') {
            self.lexer.advance();
            self.lexer.skip_inline_whitespace();
            signature = Some(self.lexer.scan_line_tail(true)?.to_string());
        }

        self.lexer.skip_inline_whitespace();
        let location = if self.lexer.at_location_keyword() {
            self.parse_location()?
        } else {
            Location::Unknown
        };
        self.finish_line(start)?;

        Ok(Operation {
            name,
            results,
            operands,
            attributes,
            regions,
            location,
            inner_locations: Vec::new(),
            syntax: Syntax::Generic { successors, properties, dictionary, signature },
        })
    }

    fn parse_region_list(&mut self) -> Result<Vec<RegionId>> {
        let start = self.lexer.pos();
        self.lexer.expect(b'(')?;
        let mut regions = Vec::new();
        loop {
            self.lexer.skip_whitespace();
            match self.lexer.peek() {
                Some(b')') => {
                    self.lexer.advance();
                    return Ok(regions);
                }
                Some(b',') => {
                    self.lexer.advance();
                }
                Some(b'{') => regions.push(self.parse_region()?),
                Some(_) => return Err(self.lexer.error(start, "expected region")),
                None => return Err(self.lexer.eof_error(start, "')' closing region list")),
            }
        }
    }

    /// `dialect.op <body> loc(...)`, ending at a top-level newline
    fn parse_custom(&mut self, results: Vec<String>, start: usize) -> Result<Operation> {
        let name = self.lexer.read_identifier().to_string();
        self.check_dialect(&name, start)?;

        let mut op = Operation {
            name,
            results,
            operands: Vec::new(),
            attributes: Vec::new(),
            regions: Vec::new(),
            location: Location::Unknown,
            inner_locations: Vec::new(),
            syntax: Syntax::Custom { body: Vec::new() },
        };
        let mut body = Vec::new();
        let mut text_start = self.lexer.pos();
        let mut depth: Vec<u8> = Vec::new();

        while let Some(c) = self.lexer.peek() {
            let here = self.lexer.pos();
            match c {
                b'\n' if depth.is_empty() && self.ends_with_equals(&body, text_start, here) => {
                    self.push_text(&mut body, text_start, here, true);
                    body.push(Piece::Continuation);
                    self.lexer.skip_whitespace();
                    text_start = self.lexer.pos();
                }
                b'\n' | b'}' if depth.is_empty() => break,
                b'/' if self.lexer.peek_at(1) == Some(b'/') => {
                    self.push_text(&mut body, text_start, here, true);
                    self.lexer.skip_comment();
                    text_start = self.lexer.pos();
                }
                b'l' if self.lexer.at_location_keyword() => {
                    self.push_text(&mut body, text_start, here, true);
                    let location = self.parse_location()?;
                    if depth.is_empty() && self.lexer.rest_of_line_is_blank() {
                        op.location = location;
                    } else {
                        op.inner_locations.push(location);
                        body.push(Piece::Location(op.inner_locations.len() - 1));
                    }
                    text_start = self.lexer.pos();
                }
                b'{' if depth.is_empty() => {
                    self.push_text(&mut body, text_start, here, false);
                    if self.lexer.line_is_blank_from(here + 1) {
                        op.regions.push(self.parse_region()?);
                        body.push(Piece::Region(op.regions.len() - 1));
                    } else {
                        let text = self.lexer.scan_balanced()?;
                        body.push(Piece::AttrDict(parse_entries(strip_brackets(text), &mut op.attributes)));
                    }
                    text_start = self.lexer.pos();
                }
                b'"' if depth.is_empty() => {
                    self.push_text(&mut body, text_start, here, false);
                    let literal = self.lexer.read_string()?.to_string();
                    body.push(Piece::Attribute(push_inline(&mut op.attributes, literal)));
                    text_start = self.lexer.pos();
                }
                b'"' => {
                    self.lexer.read_string()?;
                }
                b'%' => {
                    let value = self.lexer.read_value()?;
                    op.operands.push(value.to_string());
                }
                b'@' | b'^' | b'!' => {
                    self.lexer.read_prefixed()?;
                }
                b'#' => {
                    self.lexer.read_prefixed()?;
                    if depth.is_empty() && self.lexer.peek() == Some(b'<') {
                        self.lexer.scan_balanced()?;
                        let literal = self.lexer.slice_from(here).to_string();
                        self.push_text(&mut body, text_start, here, false);
                        body.push(Piece::Attribute(push_inline(&mut op.attributes, literal)));
                        text_start = self.lexer.pos();
                    }
                }
                b'-' if self.lexer.peek_at(1) == Some(b'>') => {
                    self.lexer.advance();
                    self.lexer.advance();
                }
                b'(' | b'[' | b'{' => {
                    depth.push(c);
                    self.lexer.advance();
                }
                b'<' if self.lexer.opens_angle() => {
                    depth.push(c);
                    self.lexer.advance();
                }
                b')' | b']' | b'}' => {
                    while depth.last() == Some(&b'<') {
                        depth.pop();
                    }
                    if depth.pop() != Some(opening_of(c)) {
                        return Err(self.lexer.error(here, format!("unbalanced '{}'", c as char)));
                    }
                    self.lexer.advance();
                }
                b'>' if depth.last() == Some(&b'<') => {
                    depth.pop();
                    self.lexer.advance();
                }
                c if depth.is_empty() && (c.is_ascii_alphabetic() || c == b'_') => {
                    let word = self.lexer.read_identifier();
                    if INLINE_ATTRIBUTE_KEYWORDS.contains(&word) && self.lexer.peek() == Some(b'<') {
                        self.lexer.scan_balanced()?;
                        let literal = self.lexer.slice_from(here).to_string();
                        self.push_text(&mut body, text_start, here, false);
                        body.push(Piece::Attribute(push_inline(&mut op.attributes, literal)));
                        text_start = self.lexer.pos();
                    }
                }
                _ => {
                    self.lexer.advance();
                }
            }
        }

        if !depth.is_empty() {
            return Err(self.lexer.eof_error(start, "closing bracket in operation body"));
        }
        let end = self.lexer.pos();
        self.push_text(&mut body, text_start, end, true);
        op.syntax = Syntax::Custom { body };
        Ok(op)
    }

    /// Whether the body so far ends in a dangling `=`, as in
    /// `flow.dispatch.workgroups ... -> tensor<4xf32> =` whose region
    /// arguments follow on the next line
    fn ends_with_equals(&self, body: &[Piece], from: usize, to: usize) -> bool {
        let text = self.lexer.source()[from..to].trim_end();
        if !text.is_empty() {
            return text.ends_with('=');
        }
        matches!(body.last(), Some(Piece::Text(last)) if last.trim_end().ends_with('='))
    }

    fn push_text(&self, body: &mut Vec<Piece>, from: usize, to: usize, trim_end: bool) {
        let text = &self.lexer.source()[from..to];
        let text = if trim_end { text.trim_end() } else { text };
        if !text.is_empty() {
            body.push(Piece::Text(text.to_string()));
        }
    }

    /// `loc(...)` at the current position
    fn parse_location(&mut self) -> Result<Location> {
        let start = self.lexer.pos();
        self.lexer.advance();
        self.lexer.advance();
        self.lexer.advance();
        if self.lexer.peek() != Some(b'(') {
            return Err(self.lexer.error(start, "expected '(' after loc"));
        }
        self.lexer.scan_balanced()?;
        Ok(location_from_text(self.lexer.slice_from(start)))
    }

    fn finish_line(&mut self, start: usize) -> Result<()> {
        self.lexer.skip_inline_whitespace();
        match self.lexer.peek() {
            None | Some(b'\n' | b'}') => Ok(()),
            Some(b'/') if self.lexer.peek_at(1) == Some(b'/') => Ok(()),
            Some(_) => Err(self.lexer.error(start, "unexpected text after operation")),
        }
    }

    // ==================== Regions and Blocks ====================

    /// `{ [^bb0(...):] ops... }`
    fn parse_region(&mut self) -> Result<RegionId> {
        let start = self.lexer.pos();
        self.lexer.expect(b'{')?;
        let mut blocks = Vec::new();
        let mut current: Option<Block> = None;
        loop {
            self.lexer.skip_whitespace();
            match self.lexer.peek() {
                None => return Err(self.lexer.eof_error(start, "'}' closing region")),
                Some(b'}') => {
                    self.lexer.advance();
                    break;
                }
                Some(b'^') => {
                    if let Some(block) = current.take() {
                        blocks.push(self.context.add_block(block));
                    }
                    current = Some(self.parse_block_header()?);
                }
                Some(_) => {
                    let op = self.parse_operation()?;
                    current.get_or_insert_with(Block::default).operations.push(op);
                }
            }
        }
        if let Some(block) = current {
            blocks.push(self.context.add_block(block));
        }
        Ok(self.context.add_region(Region { blocks }))
    }

    /// `^bb0(%a: i32 loc(...), %b: f32):`
    fn parse_block_header(&mut self) -> Result<Block> {
        let start = self.lexer.pos();
        let label = self.lexer.read_prefixed()?.to_string();
        let mut arguments = Vec::new();
        if self.lexer.peek() == Some(b'(') {
            let list = self.lexer.scan_balanced()?;
            for arg in split_top_level(strip_brackets(list), b',') {
                let (decl, location) = match find_top_level_location(arg) {
                    Some(i) => (arg[..i].trim(), location_from_text(arg[i..].trim())),
                    None => (arg, Location::Unknown),
                };
                let (name, ty) = decl
                    .split_once(':')
                    .ok_or_else(|| self.lexer.error(start, format!("malformed block argument '{}'", decl)))?;
                arguments.push(BlockArgument {
                    name: name.trim().to_string(),
                    ty: ty.trim().to_string(),
                    location,
                });
            }
        }
        self.lexer.skip_inline_whitespace();
        self.lexer.expect(b':')?;
        Ok(Block { label: Some(label), arguments, operations: Vec::new() })
    }
}

// ==================== Helpers ====================

fn is_module_name(name: &str) -> bool {
    name == "module" || name == "builtin.module"
}

fn opening_of(close: u8) -> u8 {
    match close {
        b')' => b'(',
        b']' => b'[',
        _ => b'{',
    }
}

/// Drop the first and last byte of a bracketed span
fn strip_brackets(text: &str) -> &str {
    if text.len() >= 2 {
        &text[1..text.len() - 1]
    } else {
        ""
    }
}

/// Parse `name = value, flag, "quoted.name" = value` entries into `attributes`
fn parse_entries(text: &str, attributes: &mut Vec<NamedAttribute>) -> Vec<usize> {
    let mut indices = Vec::new();
    for entry in split_top_level(text, b',') {
        let mut lexer = Lexer::new(entry);
        if lexer.peek() == Some(b'"') {
            let _ = lexer.read_string();
        } else {
            while matches!(lexer.peek(), Some(c) if c != b'=' && !c.is_ascii_whitespace()) {
                lexer.advance();
            }
        }
        let name = lexer.slice_from(0).to_string();
        lexer.skip_whitespace();
        let value = if lexer.peek() == Some(b'=') {
            Some(entry[lexer.pos() + 1..].trim().to_string())
        } else {
            None
        };
        attributes.push(NamedAttribute { name, value });
        indices.push(attributes.len() - 1);
    }
    indices
}

/// Record an inline literal as `value`, `value_1`, ...
fn push_inline(attributes: &mut Vec<NamedAttribute>, literal: String) -> usize {
    let ordinal = attributes.iter().filter(|a| a.name == "value" || a.name.starts_with("value_")).count();
    let name = if ordinal == 0 { "value".to_string() } else { format!("value_{}", ordinal) };
    attributes.push(NamedAttribute { name, value: Some(literal) });
    attributes.len() - 1
}

fn location_from_text(text: &str) -> Location {
    if text == "loc(unknown)" {
        Location::Unknown
    } else {
        Location::Known(text.to_string())
    }
}

/// `loc(X)` -> `X`
fn location_inner(value: &str) -> Option<&str> {
    value.strip_prefix("loc(")?.strip_suffix(')')
}

/// Substitute alias references (outside strings) with their definitions
fn expand_aliases(text: &str, definitions: &HashMap<&str, &str>, depth: usize) -> String {
    if depth >= MAX_ALIAS_DEPTH || !text.contains('#') {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            match c {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match c {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'#' => {
                let mut end = i + 1;
                while end < bytes.len() && is_suffix_char(bytes[end]) {
                    end += 1;
                }
                match definitions.get(&text[i..end]) {
                    Some(definition) => {
                        out.push_str(&text[copied..i]);
                        out.push_str(&expand_aliases(definition, definitions, depth + 1));
                        copied = end;
                    }
                    None => {}
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    out
}
