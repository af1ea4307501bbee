//! Directive scanner: a lightweight C-family parser
//!
//! Runs the preprocessor directives of a translation unit (conditionals, defines,
//! includes, `#pragma once`, include guards) and extracts declarations and references
//! from active lines with a handful of patterns. It does not expand macros inside code.

use super::{
    IncludeAction, IncludeDirective, IncludeResolver, ParseError, ParseRequest, ParsedFile,
    ParsedUnit, Parser,
};
use crate::model::{
    Comment, FileContent, FileLocation, MacroDictionary, MacroEvent, MacroState, NameOccurrence,
    NameRole, SignificantMacros, SymbolKind,
};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// Leading words that make a line a statement rather than a declaration
const STATEMENT_KEYWORDS: &[&str] =
    &["return", "goto", "case", "delete", "else", "throw", "typedef"];

/// Default bound on the number of files one unit may pull in
pub const DEFAULT_MAX_UNIT_FILES: usize = 4096;

const KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "do", "switch", "case", "return", "sizeof", "typedef",
    "struct", "class", "union", "enum", "static", "const", "extern", "inline", "void", "int",
    "char", "long", "short", "unsigned", "signed", "float", "double", "bool", "auto",
    "namespace", "template", "typename", "public", "private", "protected", "virtual", "new",
    "delete", "operator", "using", "defined", "goto", "break", "continue", "default",
];

#[derive(Debug, Clone)]
pub struct DirectiveScanner {
    max_unit_files: usize,
    directive: Regex,
    identifier: Regex,
    type_declaration: Regex,
    function_declaration: Regex,
    typedef_name: Regex,
    variable_declaration: Regex,
}

/// One logical source line with comments removed
#[derive(Debug)]
struct Line {
    offset: u32,
    text: String,
}

#[derive(Debug)]
struct Conditional {
    parent_active: bool,
    active: bool,
    taken: bool,
}

/// What a scanned file contributes to its includer
struct ScanSummary {
    significant: SignificantMacros,
    /// Macros the file (or anything it included) defined or undefined
    touched: HashSet<String>,
}

struct UnitState<'r> {
    resolver: &'r dyn IncludeResolver,
    dictionary: MacroDictionary,
    files: Vec<ParsedFile>,
    /// Files with pragma-once semantics already included in this unit
    once: HashSet<FileLocation>,
    stack: Vec<FileLocation>,
    known_names: HashSet<String>,
}

/// Per-file bookkeeping of macro tests
struct MacroTests<'a> {
    entry: &'a MacroDictionary,
    guard: Option<&'a str>,
    significant: SignificantMacros,
    touched: HashSet<String>,
}

impl MacroTests<'_> {
    fn note(&mut self, name: &str) {
        if self.guard == Some(name) || self.touched.contains(name) {
            return;
        }
        self.significant.record(name, self.entry.state(name));
    }

    /// Fold in what an included file depends on and changes
    fn absorb(&mut self, significant: &SignificantMacros, touched: &HashSet<String>) {
        for (name, state) in significant.iter() {
            if self.guard != Some(name.as_str()) && !self.touched.contains(name) {
                self.significant.record(name.clone(), state.clone());
            }
        }
        self.touched.extend(touched.iter().cloned());
    }
}

impl DirectiveScanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            max_unit_files: DEFAULT_MAX_UNIT_FILES,
            directive: Regex::new(r"^\s*#\s*([A-Za-z_]+)\s*(.*)$")?,
            identifier: Regex::new(r"[A-Za-z_][A-Za-z0-9_]*")?,
            // struct point {   /   class Widget;
            type_declaration: Regex::new(
                r"\b(struct|class|union|enum)\s+([A-Za-z_][A-Za-z0-9_]*)\s*(\{|;|:[^:])",
            )?,
            // int parse(const char *s) {   /   void reset(void);
            function_declaration: Regex::new(concat!(
                r"^\s*(?:[A-Za-z_][A-Za-z0-9_:<>]*[\s\*&]+)+([A-Za-z_][A-Za-z0-9_]*)",
                r"\s*\([^;{}]*\)\s*(?:const\s*)?(\{|;)",
            ))?,
            typedef_name: Regex::new(r"\btypedef\b.*\b([A-Za-z_][A-Za-z0-9_]*)\s*;")?,
            // static int count = 0;
            variable_declaration: Regex::new(concat!(
                r"^\s*((?:[A-Za-z_][A-Za-z0-9_:<>]*[\s\*&]+)+)([A-Za-z_][A-Za-z0-9_]*)",
                r"\s*(?:\[[^\]]*\]\s*)?(?:=[^;]*)?;",
            ))?,
        })
    }

    pub fn with_max_unit_files(mut self, max_unit_files: usize) -> Self {
        self.max_unit_files = max_unit_files;
        self
    }

    fn scan_file(
        &self,
        content: &FileContent,
        includer: Option<usize>,
        unit: &mut UnitState<'_>,
    ) -> Result<ScanSummary, ParseError> {
        let location = &content.location;
        if unit.resolver.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        if unit.files.len() >= self.max_unit_files {
            return Err(ParseError::ResourceExhausted {
                location: location.clone(),
                reason: format!("translation unit exceeds {} files", self.max_unit_files),
            });
        }

        let index = unit.files.len();
        let mut file = ParsedFile::new(location.clone(), content.stamp.clone(), includer);
        unit.files.push(file.clone());
        unit.stack.push(location.clone());

        let (lines, comments) = split_lines(&content.text);
        file.comments = comments;

        let guard = self.include_guard(&lines);
        if guard.is_some() {
            file.pragma_once = true;
            unit.once.insert(location.clone());
        }

        let entry = unit.dictionary.clone();
        let mut tests = MacroTests {
            entry: &entry,
            guard: guard.as_deref(),
            significant: SignificantMacros::none(),
            touched: HashSet::new(),
        };
        let mut conditionals: Vec<Conditional> = Vec::new();

        for line in &lines {
            let active = conditionals.last().is_none_or(|c| c.active);
            let Some(captures) = self.directive.captures(&line.text) else {
                if active {
                    self.extract_names(line, &mut file, unit);
                }
                continue;
            };
            let name = captures.get(1).map_or("", |m| m.as_str());
            let rest = captures.get(2).map_or("", |m| m.as_str()).trim();

            match name {
                "ifdef" | "ifndef" => {
                    let macro_name = self.first_identifier(rest).unwrap_or_default();
                    let mut taken = false;
                    if active {
                        tests.note(&macro_name);
                        let defined = unit.dictionary.is_defined(&macro_name);
                        taken = if name == "ifdef" { defined } else { !defined };
                    }
                    conditionals.push(Conditional {
                        parent_active: active,
                        active: active && taken,
                        taken,
                    });
                }
                "if" => {
                    let taken = active && self.evaluate(rest, &unit.dictionary, &mut tests);
                    conditionals.push(Conditional {
                        parent_active: active,
                        active: taken,
                        taken,
                    });
                }
                "elif" => {
                    let Some(top) = conditionals.last() else {
                        warn!("{}: #elif without #if", location);
                        continue;
                    };
                    let (parent_active, taken) = (top.parent_active, top.taken);
                    let value = parent_active
                        && !taken
                        && self.evaluate(rest, &unit.dictionary, &mut tests);
                    if let Some(top) = conditionals.last_mut() {
                        top.active = value;
                        top.taken = taken || value;
                    }
                }
                "else" => match conditionals.last_mut() {
                    Some(top) => {
                        top.active = top.parent_active && !top.taken;
                        top.taken = true;
                    }
                    None => warn!("{}: #else without #if", location),
                },
                "endif" => {
                    if conditionals.pop().is_none() {
                        warn!("{}: #endif without #if", location);
                    }
                }
                _ if !active => {
                    if name == "include" || name == "include_next" {
                        let (spelled, system) = parse_include_target(rest);
                        file.includes.push(IncludeDirective {
                            target: unit.resolver.resolve_include(location, &spelled, system),
                            spelled,
                            system,
                            offset: line.offset,
                            active: false,
                            significant: SignificantMacros::none(),
                            reused: false,
                            skipped: false,
                        });
                    }
                }
                "define" => {
                    let Some((macro_name, value)) = parse_define(rest) else {
                        continue;
                    };
                    if guard.as_deref() != Some(macro_name.as_str()) {
                        tests.touched.insert(macro_name.clone());
                    }
                    unit.dictionary.define(macro_name.clone(), value.clone());
                    file.names.push(NameOccurrence::new(
                        macro_name.clone(),
                        SymbolKind::Macro,
                        NameRole::Definition,
                        line.offset,
                    ));
                    unit.known_names.insert(macro_name.clone());
                    file.macros
                        .push(MacroEvent::define(macro_name, value, line.offset));
                }
                "undef" => {
                    if let Some(macro_name) = self.first_identifier(rest) {
                        tests.touched.insert(macro_name.clone());
                        unit.dictionary.undefine(&macro_name);
                        file.macros.push(MacroEvent::undefine(macro_name, line.offset));
                    }
                }
                "include" | "include_next" => {
                    let directive = self.include(
                        location,
                        index,
                        rest,
                        line.offset,
                        &mut file,
                        &mut tests,
                        unit,
                    )?;
                    file.includes.push(directive);
                }
                "pragma" => {
                    if rest.split_whitespace().next() == Some("once") {
                        file.pragma_once = true;
                        unit.once.insert(location.clone());
                    }
                }
                other => trace!("{}: ignoring #{}", location, other),
            }
        }

        if !conditionals.is_empty() {
            warn!("{}: {} unterminated conditional(s)", location, conditionals.len());
        }

        unit.stack.pop();
        file.significant_macros = tests.significant.clone();
        unit.files[index] = file;
        Ok(ScanSummary {
            significant: tests.significant,
            touched: tests.touched,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn include(
        &self,
        location: &FileLocation,
        index: usize,
        rest: &str,
        offset: u32,
        file: &mut ParsedFile,
        tests: &mut MacroTests<'_>,
        unit: &mut UnitState<'_>,
    ) -> Result<IncludeDirective, ParseError> {
        let (spelled, system) = parse_include_target(rest);
        let mut directive = IncludeDirective {
            spelled,
            system,
            offset,
            active: true,
            target: None,
            significant: SignificantMacros::none(),
            reused: false,
            skipped: false,
        };

        let Some(target) = unit
            .resolver
            .resolve_include(location, &directive.spelled, system)
        else {
            debug!("{}: unresolved include {}", location, directive.spelled);
            file.has_unresolved_include = true;
            return Ok(directive);
        };
        directive.target = Some(target.clone());

        if unit.once.contains(&target) || unit.stack.contains(&target) {
            directive.skipped = true;
            return Ok(directive);
        }

        match unit.resolver.include_action(&target, &unit.dictionary) {
            IncludeAction::DependsOnOutdated => {
                return Err(ParseError::DependsOnOutdatedFile { location: target });
            }
            IncludeAction::Reuse(reused) => {
                tests.absorb(&reused.significant, &HashSet::new());
                for effect in &reused.effects {
                    tests.touched.insert(effect.name.clone());
                    unit.dictionary.apply(effect);
                    unit.known_names.insert(effect.name.clone());
                }
                if reused.pragma_once {
                    unit.once.insert(target);
                }
                directive.significant = reused.significant;
                directive.reused = true;
            }
            IncludeAction::Parse => match unit.resolver.read(&target) {
                Ok(content) => {
                    let summary = self.scan_file(&content, Some(index), unit)?;
                    tests.absorb(&summary.significant, &summary.touched);
                    directive.significant = summary.significant;
                }
                Err(ParseError::Cancelled) => return Err(ParseError::Cancelled),
                Err(e) => {
                    warn!("{}: cannot read included {}: {}", location, target, e);
                    unit.files.push(ParsedFile::defective(target, Some(index)));
                }
            },
        }
        Ok(directive)
    }

    fn first_identifier(&self, text: &str) -> Option<String> {
        self.identifier
            .find(text)
            .map(|m| m.as_str().to_string())
    }

    /// Classic guard: first directive `#ifndef G`, second `#define G`, last `#endif`,
    /// and no code outside the conditional
    fn include_guard(&self, lines: &[Line]) -> Option<String> {
        let meaningful: Vec<&Line> = lines.iter().filter(|l| !l.text.trim().is_empty()).collect();
        let (first, second, last) = match meaningful.as_slice() {
            [first, second, .., last] => (first, second, last),
            _ => return None,
        };
        let directive = |line: &Line| -> Option<(String, String)> {
            let captures = self.directive.captures(&line.text)?;
            Some((
                captures.get(1)?.as_str().to_string(),
                captures.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            ))
        };
        let (first_name, first_rest) = directive(first)?;
        let (second_name, second_rest) = directive(second)?;
        let (last_name, _) = directive(last)?;
        if first_name != "ifndef" || second_name != "define" || last_name != "endif" {
            return None;
        }
        let guard = self.first_identifier(&first_rest)?;
        let defined = self.first_identifier(&second_rest)?;
        (guard == defined).then_some(guard)
    }

    /// Evaluate a `#if` expression: `defined`, `!`, `&&`, `||`, parentheses, integer
    /// literals, comparisons, and macros with integer values. Unknown tokens are 0.
    fn evaluate(
        &self,
        expression: &str,
        dictionary: &MacroDictionary,
        tests: &mut MacroTests<'_>,
    ) -> bool {
        let tokens = tokenize(expression);
        let mut evaluator = Evaluator {
            tokens: &tokens,
            position: 0,
            dictionary,
            tests,
        };
        evaluator.or() != 0
    }

    fn extract_names(&self, line: &Line, file: &mut ParsedFile, unit: &mut UnitState<'_>) {
        let mut declared: HashSet<String> = HashSet::new();
        let mut push = |file: &mut ParsedFile, name: &str, kind, role, offset: usize| {
            declared.insert(name.to_string());
            file.names.push(NameOccurrence::new(
                name,
                kind,
                role,
                line.offset + offset as u32,
            ));
        };

        for captures in self.type_declaration.captures_iter(&line.text) {
            let (Some(keyword), Some(name), Some(terminator)) =
                (captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            let kind = match keyword.as_str() {
                "struct" => SymbolKind::Struct,
                "class" => SymbolKind::Class,
                "union" => SymbolKind::Union,
                _ => SymbolKind::Enum,
            };
            let role = if terminator.as_str() == ";" {
                NameRole::Declaration
            } else {
                NameRole::Definition
            };
            push(file, name.as_str(), kind, role, name.start());
        }

        if let Some(captures) = self.function_declaration.captures(&line.text)
            && let (Some(name), Some(terminator)) = (captures.get(1), captures.get(2))
            && !KEYWORDS.contains(&name.as_str())
        {
            let role = if terminator.as_str() == "{" {
                NameRole::Definition
            } else {
                NameRole::Declaration
            };
            push(file, name.as_str(), SymbolKind::Function, role, name.start());
        }

        if let Some(captures) = self.typedef_name.captures(&line.text)
            && let Some(name) = captures.get(1)
        {
            push(file, name.as_str(), SymbolKind::Typedef, NameRole::Definition, name.start());
        } else if let Some(captures) = self.variable_declaration.captures(&line.text)
            && let (Some(leading), Some(name)) = (captures.get(1), captures.get(2))
            && !STATEMENT_KEYWORDS
                .contains(&leading.as_str().split_whitespace().next().unwrap_or_default())
            && !KEYWORDS.contains(&name.as_str())
        {
            push(file, name.as_str(), SymbolKind::Variable, NameRole::Definition, name.start());
        }

        unit.known_names.extend(declared.iter().cloned());
        for identifier in self.identifier.find_iter(&line.text) {
            let name = identifier.as_str();
            if declared.contains(name) || !unit.known_names.contains(name) {
                continue;
            }
            file.names.push(NameOccurrence::new(
                name,
                SymbolKind::Variable,
                NameRole::Reference,
                line.offset + identifier.start() as u32,
            ));
        }
    }
}

impl Default for DirectiveScanner {
    fn default() -> Self {
        Self::new().expect("Failed to compile directive scanner patterns")
    }
}

impl Parser for DirectiveScanner {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        resolver: &dyn IncludeResolver,
    ) -> Result<ParsedUnit, ParseError> {
        let mut unit = UnitState {
            resolver,
            dictionary: request.config.initial_dictionary(),
            files: Vec::new(),
            once: HashSet::new(),
            stack: Vec::new(),
            known_names: HashSet::new(),
        };
        self.scan_file(request.content, None, &mut unit)?;
        trace!(
            "Scanned {} ({} files in unit)",
            request.location(),
            unit.files.len()
        );
        Ok(ParsedUnit {
            linkage: request.linkage,
            files: unit.files,
        })
    }
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Split into logical lines (joining backslash continuations) with comments removed
fn split_lines(text: &str) -> (Vec<Line>, Vec<Comment>) {
    let mut lines = Vec::new();
    let mut comments = Vec::new();
    let mut current = String::new();
    let mut current_offset: Option<u32> = None;
    let mut block: Option<(u32, String)> = None;

    let bytes: Vec<char> = text.chars().collect();
    let mut offsets = Vec::with_capacity(bytes.len());
    let mut byte_offset = 0u32;
    for c in &bytes {
        offsets.push(byte_offset);
        byte_offset += c.len_utf8() as u32;
    }

    let mut i = 0;
    let mut in_string: Option<char> = None;
    while i < bytes.len() {
        let c = bytes[i];
        let offset = offsets[i];

        if let Some((_, comment)) = block.as_mut() {
            if c == '*' && bytes.get(i + 1) == Some(&'/') {
                if let Some((start, comment)) = block.take() {
                    comments.push(Comment {
                        text: comment,
                        offset: start,
                        is_block: true,
                    });
                }
                current.push(' ');
                i += 2;
                continue;
            }
            comment.push(c);
            if c == '\n' {
                // keep line structure so offsets of later lines stay right
                flush_line(&mut lines, &mut current, &mut current_offset);
            }
            i += 1;
            continue;
        }

        if in_string.is_none() && c == '/' && bytes.get(i + 1) == Some(&'/') {
            let start = offset;
            let mut j = i + 2;
            let mut comment = String::new();
            while j < bytes.len() && bytes[j] != '\n' {
                comment.push(bytes[j]);
                j += 1;
            }
            comments.push(Comment {
                text: comment,
                offset: start,
                is_block: false,
            });
            i = j;
            continue;
        }
        if in_string.is_none() && c == '/' && bytes.get(i + 1) == Some(&'*') {
            block = Some((offset, String::new()));
            i += 2;
            continue;
        }

        match c {
            '\\' if bytes.get(i + 1) == Some(&'\n') => {
                i += 2;
                continue;
            }
            '\n' => {
                in_string = None;
                flush_line(&mut lines, &mut current, &mut current_offset);
            }
            '"' | '\'' => {
                match in_string {
                    Some(open) if open == c && !current.ends_with('\\') => in_string = None,
                    None => in_string = Some(c),
                    _ => {}
                }
                current_offset.get_or_insert(offset);
                current.push(c);
            }
            _ => {
                current_offset.get_or_insert(offset);
                current.push(c);
            }
        }
        i += 1;
    }
    if let Some((start, comment)) = block {
        comments.push(Comment {
            text: comment,
            offset: start,
            is_block: true,
        });
    }
    flush_line(&mut lines, &mut current, &mut current_offset);
    (lines, comments)
}

fn flush_line(lines: &mut Vec<Line>, current: &mut String, offset: &mut Option<u32>) {
    if let Some(start) = offset.take() {
        lines.push(Line {
            offset: start,
            text: std::mem::take(current),
        });
    } else {
        current.clear();
    }
}

fn parse_include_target(rest: &str) -> (String, bool) {
    let rest = rest.trim();
    if let Some(stripped) = rest.strip_prefix('<') {
        let name = stripped.split('>').next().unwrap_or_default();
        return (name.trim().to_string(), true);
    }
    if let Some(stripped) = rest.strip_prefix('"') {
        let name = stripped.split('"').next().unwrap_or_default();
        return (name.to_string(), false);
    }
    // computed include; kept verbatim and never resolves to a file on its own
    (rest.to_string(), false)
}

/// `NAME value` or `NAME(args) body`; object-like macros without a value get ""
fn parse_define(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim_start();
    let end = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(rest.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }
    let name = rest[..end].to_string();
    let value = rest[end..].trim().to_string();
    Some((name, value))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Ident(String),
    Op(&'static str),
}

fn tokenize(expression: &str) -> Vec<Token> {
    const OPERATORS: &[&str] = &[
        "&&", "||", "==", "!=", "<=", ">=", "(", ")", "!", "<", ">", "+", "-", "*", "/",
    ];
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            tokens.push(Token::Number(parse_number(&literal)));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        for op in OPERATORS {
            let len = op.len();
            if i + len <= chars.len() && chars[i..i + len].iter().collect::<String>() == *op {
                tokens.push(Token::Op(op));
                i += len;
                continue 'outer;
            }
        }
        i += 1;
    }
    tokens
}

fn parse_number(literal: &str) -> i64 {
    let trimmed = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    trimmed.parse().unwrap_or(0)
}

struct Evaluator<'a, 't> {
    tokens: &'a [Token],
    position: usize,
    dictionary: &'a MacroDictionary,
    tests: &'a mut MacroTests<'t>,
}

impl Evaluator<'_, '_> {
    fn peek_op(&self, op: &str) -> bool {
        matches!(self.tokens.get(self.position), Some(Token::Op(o)) if *o == op)
    }

    fn or(&mut self) -> i64 {
        let mut value = self.and();
        while self.peek_op("||") {
            self.position += 1;
            let rhs = self.and();
            value = i64::from(value != 0 || rhs != 0);
        }
        value
    }

    fn and(&mut self) -> i64 {
        let mut value = self.comparison();
        while self.peek_op("&&") {
            self.position += 1;
            let rhs = self.comparison();
            value = i64::from(value != 0 && rhs != 0);
        }
        value
    }

    fn comparison(&mut self) -> i64 {
        let mut value = self.additive();
        loop {
            let op = match self.tokens.get(self.position) {
                Some(Token::Op(op)) if ["==", "!=", "<", ">", "<=", ">="].contains(op) => *op,
                _ => return value,
            };
            self.position += 1;
            let rhs = self.additive();
            value = i64::from(match op {
                "==" => value == rhs,
                "!=" => value != rhs,
                "<" => value < rhs,
                ">" => value > rhs,
                "<=" => value <= rhs,
                _ => value >= rhs,
            });
        }
    }

    fn additive(&mut self) -> i64 {
        let mut value = self.multiplicative();
        loop {
            if self.peek_op("+") {
                self.position += 1;
                value = value.wrapping_add(self.multiplicative());
            } else if self.peek_op("-") {
                self.position += 1;
                value = value.wrapping_sub(self.multiplicative());
            } else {
                return value;
            }
        }
    }

    fn multiplicative(&mut self) -> i64 {
        let mut value = self.unary();
        loop {
            if self.peek_op("*") {
                self.position += 1;
                value = value.wrapping_mul(self.unary());
            } else if self.peek_op("/") {
                self.position += 1;
                let rhs = self.unary();
                value = if rhs == 0 { 0 } else { value.wrapping_div(rhs) };
            } else {
                return value;
            }
        }
    }

    fn unary(&mut self) -> i64 {
        if self.peek_op("!") {
            self.position += 1;
            return i64::from(self.unary() == 0);
        }
        if self.peek_op("-") {
            self.position += 1;
            return self.unary().wrapping_neg();
        }
        self.primary()
    }

    fn primary(&mut self) -> i64 {
        let tokens = self.tokens;
        let Some(token) = tokens.get(self.position).cloned() else {
            return 0;
        };
        self.position += 1;
        match token {
            Token::Number(n) => n,
            Token::Op("(") => {
                let value = self.or();
                if self.peek_op(")") {
                    self.position += 1;
                }
                value
            }
            Token::Ident(name) if name == "defined" => {
                let parenthesized = self.peek_op("(");
                if parenthesized {
                    self.position += 1;
                }
                let value = match tokens.get(self.position) {
                    Some(Token::Ident(macro_name)) => {
                        self.position += 1;
                        self.tests.note(macro_name);
                        i64::from(self.dictionary.is_defined(macro_name))
                    }
                    _ => 0,
                };
                if parenthesized && self.peek_op(")") {
                    self.position += 1;
                }
                value
            }
            Token::Ident(name) => {
                self.tests.note(&name);
                match self.dictionary.state(&name) {
                    MacroState::Defined(value) => {
                        let tokens = tokenize(&value);
                        match tokens.as_slice() {
                            [Token::Number(n)] => *n,
                            [] => 0,
                            _ => 1,
                        }
                    }
                    MacroState::Undefined => 0,
                }
            }
            Token::Op(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkageId, MacroEventKind};
    use crate::parser::{MockIncludeResolver, ReusedVersion, ScannerConfig};
    use std::collections::HashMap;

    /// Resolver over an in-memory file map that always asks for a parse
    struct MapResolver {
        files: HashMap<FileLocation, String>,
        reuse: HashMap<FileLocation, ReusedVersion>,
        outdated: HashSet<FileLocation>,
    }

    impl MapResolver {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(path, text)| (FileLocation::file(path), text.to_string()))
                    .collect(),
                reuse: HashMap::new(),
                outdated: HashSet::new(),
            }
        }

        fn content(&self, path: &str) -> FileContent {
            let location = FileLocation::file(path);
            FileContent::new(location.clone(), self.files[&location].clone(), chrono::Utc::now())
        }
    }

    impl IncludeResolver for MapResolver {
        fn resolve_include(
            &self,
            includer: &FileLocation,
            spelled: &str,
            _system: bool,
        ) -> Option<FileLocation> {
            let candidate = includer.parent()?.join(spelled);
            self.files.contains_key(&candidate).then_some(candidate)
        }

        fn read(&self, location: &FileLocation) -> Result<FileContent, ParseError> {
            self.files
                .get(location)
                .map(|text| FileContent::new(location.clone(), text.clone(), chrono::Utc::now()))
                .ok_or_else(|| ParseError::Io {
                    location: location.clone(),
                    reason: "missing".to_string(),
                })
        }

        fn include_action(&self, location: &FileLocation, _: &MacroDictionary) -> IncludeAction {
            if self.outdated.contains(location) {
                return IncludeAction::DependsOnOutdated;
            }
            match self.reuse.get(location) {
                Some(reused) => IncludeAction::Reuse(reused.clone()),
                None => IncludeAction::Parse,
            }
        }

        fn is_cancelled(&self) -> bool {
            false
        }
    }

    fn scan(
        resolver: &MapResolver,
        path: &str,
        config: &ScannerConfig,
    ) -> Result<ParsedUnit, ParseError> {
        let content = resolver.content(path);
        let request = ParseRequest {
            linkage: LinkageId::C,
            content: &content,
            config,
            context: None,
        };
        DirectiveScanner::default().parse(&request, resolver)
    }

    #[test]
    fn test_includes_in_order_with_includer_links() {
        let resolver = MapResolver::new(&[
            ("/p/a.c", "#include \"a.h\"\n#include \"b.h\"\nint main(void) {\n}\n"),
            ("/p/a.h", "#include \"b.h\"\nint a;\n"),
            ("/p/b.h", "#pragma once\nstruct point { int x; };\n"),
        ]);
        let unit = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap();

        let locations: Vec<&str> = unit
            .files
            .iter()
            .map(|f| f.location.path().to_str().unwrap())
            .collect();
        assert_eq!(locations, vec!["/p/a.c", "/p/a.h", "/p/b.h"]);
        assert_eq!(unit.files[1].includer, Some(0));
        assert_eq!(unit.files[2].includer, Some(1));

        // second include of the pragma-once header is skipped
        let top = &unit.files[0];
        assert!(!top.includes[0].skipped);
        assert!(top.includes[1].skipped);
        assert!(unit.files[2].pragma_once);
        assert!(
            unit.files[2]
                .names
                .iter()
                .any(|n| n.name == "point" && n.role == NameRole::Definition)
        );
        assert!(
            top.names
                .iter()
                .any(|n| n.name == "main" && n.kind == SymbolKind::Function)
        );
    }

    #[test]
    fn test_significant_macros_capture_entry_state() {
        let resolver = MapResolver::new(&[
            ("/p/a.c", "#define MODE 2\n#include \"cfg.h\"\n"),
            ("/p/cfg.h", "#ifdef DEBUG\nint debug;\n#endif\n#if MODE == 2\nint two;\n#endif\n"),
        ]);
        let config = ScannerConfig::new().with_define("DEBUG", "1");
        let unit = scan(&resolver, "/p/a.c", &config).unwrap();

        let header = &unit.files[1];
        assert_eq!(
            header.significant_macros.get("DEBUG"),
            Some(&MacroState::Defined("1".to_string()))
        );
        assert_eq!(
            header.significant_macros.get("MODE"),
            Some(&MacroState::Defined("2".to_string()))
        );
        assert!(header.names.iter().any(|n| n.name == "debug"));
        assert!(header.names.iter().any(|n| n.name == "two"));

        // the source defines MODE itself, so only DEBUG matters from outside
        let top = &unit.files[0];
        assert!(top.significant_macros.contains("DEBUG"));
        assert!(!top.significant_macros.contains("MODE"));
        assert_eq!(top.includes[0].significant, header.significant_macros);
    }

    #[test]
    fn test_include_guard_is_not_significant() {
        let resolver = MapResolver::new(&[
            ("/p/a.c", "#include \"g.h\"\n#include \"g.h\"\n"),
            ("/p/g.h", "// guard\n#ifndef G_H\n#define G_H\nint g;\n#endif\n"),
        ]);
        let unit = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap();
        assert_eq!(unit.files.len(), 2);
        let header = &unit.files[1];
        assert!(header.pragma_once);
        assert!(header.significant_macros.is_empty());
        assert!(unit.files[0].includes[1].skipped);
        assert_eq!(header.comments.len(), 1);
    }

    #[test]
    fn test_inactive_regions() {
        let resolver = MapResolver::new(&[
            (
                "/p/a.c",
                concat!(
                    "#if 0\n#include \"x.h\"\n#define HIDDEN 1\nint hidden;\n",
                    "#elif defined(FOO) || 1\nint shown;\n#else\nint never;\n#endif\n",
                ),
            ),
            ("/p/x.h", "int x;\n"),
        ]);
        let unit = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap();
        assert_eq!(unit.files.len(), 1);
        let top = &unit.files[0];
        assert_eq!(top.includes.len(), 1);
        assert!(!top.includes[0].active);
        assert!(top.macros.is_empty());
        let names: Vec<&str> = top.names.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"shown"));
        assert!(!names.contains(&"hidden"));
        assert!(!names.contains(&"never"));
        assert_eq!(top.significant_macros.get("FOO"), Some(&MacroState::Undefined));
    }

    #[test]
    fn test_unresolved_and_unreadable_includes() {
        let mut resolver = MapResolver::new(&[
            ("/p/a.c", "#include <missing.h>\n#include \"gone.h\"\n"),
            ("/p/gone.h", "int g;\n"),
        ]);
        // resolvable but unreadable
        let gone = FileLocation::file("/p/gone.h");
        resolver.files.insert(gone.clone(), String::new());
        struct Unreadable(MapResolver);
        impl IncludeResolver for Unreadable {
            fn resolve_include(
                &self,
                i: &FileLocation,
                s: &str,
                sys: bool,
            ) -> Option<FileLocation> {
                self.0.resolve_include(i, s, sys)
            }
            fn read(&self, location: &FileLocation) -> Result<FileContent, ParseError> {
                Err(ParseError::Io {
                    location: location.clone(),
                    reason: "permission denied".to_string(),
                })
            }
            fn include_action(&self, l: &FileLocation, d: &MacroDictionary) -> IncludeAction {
                self.0.include_action(l, d)
            }
            fn is_cancelled(&self) -> bool {
                false
            }
        }
        let content = resolver.content("/p/a.c");
        let config = ScannerConfig::new();
        let request = ParseRequest {
            linkage: LinkageId::C,
            content: &content,
            config: &config,
            context: None,
        };
        let unit = DirectiveScanner::default()
            .parse(&request, &Unreadable(resolver))
            .unwrap();

        assert!(unit.files[0].has_unresolved_include);
        assert_eq!(unit.files.len(), 2);
        assert!(unit.files[1].defective);
        assert_eq!(unit.files[1].location, gone);
    }

    #[test]
    fn test_reused_include_replays_macro_effects() {
        let mut resolver = MapResolver::new(&[
            ("/p/a.c", "#include \"cfg.h\"\n#ifdef FEATURE\nint feature_on;\n#endif\n"),
            ("/p/cfg.h", "#define FEATURE 1\n"),
        ]);
        resolver.reuse.insert(
            FileLocation::file("/p/cfg.h"),
            ReusedVersion {
                significant: SignificantMacros::from([("PLATFORM", MacroState::Undefined)]),
                pragma_once: false,
                effects: vec![MacroEvent::define("FEATURE", "1", 0)],
            },
        );
        let unit = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap();

        assert_eq!(unit.files.len(), 1);
        let top = &unit.files[0];
        assert!(top.includes[0].reused);
        assert!(top.names.iter().any(|n| n.name == "feature_on"));
        // FEATURE was set by the include, so it is not significant for the source
        assert!(!top.significant_macros.contains("FEATURE"));
        assert!(top.significant_macros.contains("PLATFORM"));
    }

    #[test]
    fn test_outdated_dependency_aborts_parse() {
        let mut resolver = MapResolver::new(&[
            ("/p/a.c", "#include \"dep.h\"\n"),
            ("/p/dep.h", "int d;\n"),
        ]);
        resolver.outdated.insert(FileLocation::file("/p/dep.h"));
        let error = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap_err();
        assert!(matches!(
            error,
            ParseError::DependsOnOutdatedFile { location }
                if location == FileLocation::file("/p/dep.h")
        ));
    }

    #[test]
    fn test_cancellation_through_mock_resolver() {
        let mut resolver = MockIncludeResolver::new();
        resolver.expect_is_cancelled().returning(|| true);
        let content =
            FileContent::new(FileLocation::file("/p/a.c"), "int a;\n", chrono::Utc::now());
        let config = ScannerConfig::new();
        let request = ParseRequest {
            linkage: LinkageId::C,
            content: &content,
            config: &config,
            context: None,
        };
        let result = DirectiveScanner::default().parse(&request, &resolver);
        assert!(matches!(result, Err(ParseError::Cancelled)));
    }

    #[test]
    fn test_unit_size_bound() {
        let resolver = MapResolver::new(&[
            ("/p/a.c", "#include \"b.h\"\n"),
            ("/p/b.h", "int b;\n"),
        ]);
        let content = resolver.content("/p/a.c");
        let config = ScannerConfig::new();
        let request = ParseRequest {
            linkage: LinkageId::C,
            content: &content,
            config: &config,
            context: None,
        };
        let scanner = DirectiveScanner::default().with_max_unit_files(1);
        assert!(matches!(
            scanner.parse(&request, &resolver),
            Err(ParseError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_macro_events_and_references() {
        let resolver = MapResolver::new(&[(
            "/p/a.c",
            concat!(
                "#define LIMIT 10\n#undef OLD\nint parse(const char *s);\n",
                "int run(void) {\n  return parse(0) + LIMIT;\n}\n",
            ),
        )]);
        let unit = scan(&resolver, "/p/a.c", &ScannerConfig::new()).unwrap();
        let top = &unit.files[0];
        assert_eq!(top.macros.len(), 2);
        assert!(matches!(
            top.macros[0].kind,
            MacroEventKind::Define { ref value } if value == "10"
        ));
        assert_eq!(top.macros[1].kind, MacroEventKind::Undefine);

        let declaration = top
            .names
            .iter()
            .find(|n| n.name == "parse" && n.role == NameRole::Declaration);
        assert!(declaration.is_some());
        let references: Vec<&str> = top
            .names
            .iter()
            .filter(|n| n.role == NameRole::Reference)
            .map(|n| n.name.as_str())
            .collect();
        assert!(references.contains(&"parse"));
        assert!(references.contains(&"LIMIT"));
    }

    #[test]
    fn test_comments_and_continuations() {
        let (lines, comments) = split_lines(
            concat!(
                "/* block\n comment */ int a;\n#define LONG \\\n  1\n",
                "int b; // trailing\nchar *s = \"// not a comment\";\n",
            ),
        );
        assert_eq!(comments.len(), 2);
        assert!(comments[0].is_block);
        assert_eq!(comments[1].text, " trailing");
        assert!(lines.iter().any(|l| l.text.contains("#define LONG") && l.text.contains('1')));
        assert!(lines.iter().any(|l| l.text.contains("\"// not a comment\"")));
    }

    #[test]
    fn test_expression_evaluation() {
        let scanner = DirectiveScanner::default();
        let dictionary: MacroDictionary = [("V", "3"), ("EMPTY", "")].into_iter().collect();
        let entry = dictionary.clone();
        let mut tests = MacroTests {
            entry: &entry,
            guard: None,
            significant: SignificantMacros::none(),
            touched: HashSet::new(),
        };
        assert!(scanner.evaluate("V >= 2 && !defined(NOPE)", &dictionary, &mut tests));
        assert!(!scanner.evaluate("V == 2 || EMPTY", &dictionary, &mut tests));
        assert!(scanner.evaluate("(0x10 / 4) - 3 == 1", &dictionary, &mut tests));
        assert!(scanner.evaluate("defined V", &dictionary, &mut tests));
        assert!(tests.significant.contains("NOPE"));
        assert!(tests.significant.contains("V"));
        assert_eq!(tests.significant.len(), 3);
    }
}
