use super::values::{format_spice_number, parse_spice_number};
use crate::core::{CompiledExpression, NetlistError, ParameterKind, ParameterSpec, ParseError};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Byte range of a rewritable value token on one physical line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Location {
    line: usize,
    start: usize,
    end: usize,
}

#[derive(Clone, Debug, PartialEq)]
struct Binding {
    spec: ParameterSpec,
    locations: Vec<Location>,
}

/// A circuit element as declared in the netlist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub nodes: Vec<String>,
    /// Evaluated value for R, L and C elements.
    pub value: Option<f64>,
    /// Enclosing subcircuit, `None` at top level.
    pub subcircuit: Option<String>,
    /// 1-based source line.
    pub line: usize,
}

impl Component {
    pub fn element(&self) -> char {
        self.name
            .chars()
            .next()
            .map_or(' ', |c| c.to_ascii_uppercase())
    }
}

/// `.INCLUDE` or `.LIB` reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub path: String,
    /// Library section for `.LIB path section`.
    pub section: Option<String>,
    pub line: usize,
}

/// Parsed circuit description.
///
/// Holds the raw text split into physical lines plus the location of every tunable
/// value token, so that substituting values touches nothing else in the file.
#[derive(Clone, Debug, PartialEq)]
pub struct NetlistDocument {
    lines: Vec<String>,
    bindings: IndexMap<String, Binding>,
    params: IndexMap<String, f64>,
    components: Vec<Component>,
    nodes: IndexSet<String>,
    sources: Vec<String>,
    includes: Vec<IncludeDirective>,
    models: IndexMap<String, String>,
    subcircuits: Vec<String>,
}

impl NetlistDocument {
    /// Parse netlist text. A leading byte-order mark is dropped; the first line is the title.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let parsed = Parser::default().run(&lines)?;

        Ok(Self {
            lines,
            bindings: parsed.bindings,
            params: parsed.params,
            components: parsed.components,
            nodes: parsed.nodes,
            sources: parsed.sources,
            includes: parsed.includes,
            models: parsed.models,
            subcircuits: parsed.subcircuits,
        })
    }

    /// Parse uploaded bytes; invalid UTF-8 sequences are replaced.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Every tunable value in declaration order: top-level R, L, C literals and
    /// `.PARAM` literals. Names are unique ignoring case.
    pub fn tunable_parameters(&self) -> Vec<ParameterSpec> {
        self.bindings.values().map(|b| b.spec.clone()).collect()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.bindings
            .get(&name.trim().to_ascii_uppercase())
            .map(|b| &b.spec)
    }

    /// Current value of a tunable parameter.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameter(name).map(|spec| spec.value)
    }

    /// Substitute values and return a new document; `self` is left untouched.
    ///
    /// Parameters absent from `vector` keep their current text. Names are matched
    /// ignoring case; unknown names and non-finite values are rejected.
    pub fn apply(&self, vector: &[(String, f64)]) -> Result<Self, NetlistError> {
        if vector.is_empty() {
            return Ok(self.clone());
        }

        let mut edits: Vec<(Location, String)> = Vec::new();
        for (name, value) in vector {
            let binding = self
                .bindings
                .get(&name.trim().to_ascii_uppercase())
                .ok_or_else(|| NetlistError::UnknownParameter(name.clone()))?;
            if !value.is_finite() {
                return Err(NetlistError::NonFiniteValue {
                    name: name.clone(),
                    value: *value,
                });
            }
            let text = format_spice_number(*value);
            edits.extend(binding.locations.iter().map(|&loc| (loc, text.clone())));
        }

        // Right-to-left so earlier offsets on the same line stay valid
        edits.sort_by(|a, b| (b.0.line, b.0.start).cmp(&(a.0.line, a.0.start)));
        edits.dedup_by(|a, b| a.0 == b.0);

        let mut lines = self.lines.clone();
        for (loc, text) in edits {
            lines[loc.line].replace_range(loc.start..loc.end, &text);
        }

        Ok(Self::parse(&lines.join("\n"))?)
    }

    /// Full text, byte-identical to the parsed input minus any byte-order mark.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn title(&self) -> &str {
        self.lines.first().map_or("", |l| l.trim())
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Evaluated `.PARAM` values at top level.
    pub fn params(&self) -> &IndexMap<String, f64> {
        &self.params
    }

    /// Top-level node names in order of first appearance.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.eq_ignore_ascii_case(name.trim()))
    }

    /// Independent voltage and current sources at top level.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.eq_ignore_ascii_case(name.trim()))
    }

    pub fn includes(&self) -> &[IncludeDirective] {
        &self.includes
    }

    /// Model name (upper-case) to model type.
    pub fn models(&self) -> &IndexMap<String, String> {
        &self.models
    }

    pub fn subcircuits(&self) -> &[String] {
        &self.subcircuits
    }
}

// ===== TOKENIZER =====

#[derive(Clone, Debug)]
struct Token<'a> {
    text: &'a str,
    line: usize,
    start: usize,
}

impl Token<'_> {
    fn location(&self) -> Location {
        Location {
            line: self.line,
            start: self.start,
            end: self.start + self.text.len(),
        }
    }

    fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    fn is(&self, text: &str) -> bool {
        self.text.eq_ignore_ascii_case(text)
    }
}

/// Split one physical line starting at byte `from`. Whitespace and top-level commas
/// separate tokens, `=` is a token of its own, `;` starts a comment, and bracketed or
/// quoted text stays in one piece.
fn tokenize(line: &str, line_idx: usize, from: usize) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start: Option<usize> = None;

    for (i, c) in line[from..].char_indices().map(|(i, c)| (i + from, c)) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                start.get_or_insert(i);
            }
            '(' | '{' | '[' => {
                depth += 1;
                start.get_or_insert(i);
            }
            ')' | '}' | ']' => {
                depth = (depth - 1).max(0);
                start.get_or_insert(i);
            }
            _ if depth > 0 => {
                start.get_or_insert(i);
            }
            ';' => {
                push_token(&mut tokens, line, line_idx, start.take(), i);
                return tokens;
            }
            '=' => {
                push_token(&mut tokens, line, line_idx, start.take(), i);
                push_token(&mut tokens, line, line_idx, Some(i), i + 1);
            }
            c if c.is_whitespace() || c == ',' => {
                push_token(&mut tokens, line, line_idx, start.take(), i)
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    push_token(&mut tokens, line, line_idx, start, line.len());
    tokens
}

#[inline]
fn push_token<'a>(
    tokens: &mut Vec<Token<'a>>,
    line: &'a str,
    line_idx: usize,
    start: Option<usize>,
    end: usize,
) {
    if let Some(start) = start {
        tokens.push(Token {
            text: &line[start..end],
            line: line_idx,
            start,
        });
    }
}

struct LogicalLine<'a> {
    /// 1-based number of the first physical line.
    number: usize,
    tokens: Vec<Token<'a>>,
}

/// Join `+` continuations; comment and blank lines are skipped. Line 0 is the title.
fn logical_lines(lines: &[String]) -> Result<Vec<LogicalLine<'_>>, ParseError> {
    let mut out: Vec<LogicalLine<'_>> = Vec::new();
    for (idx, line) in lines.iter().enumerate().skip(1) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('*') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.starts_with('+') {
            let plus = line.len() - trimmed.len();
            let previous = out
                .last_mut()
                .ok_or_else(|| ParseError::new(idx + 1, "continuation line without a preceding statement"))?;
            previous.tokens.extend(tokenize(line, idx, plus + 1));
            continue;
        }
        let tokens = tokenize(line, idx, 0);
        if !tokens.is_empty() {
            out.push(LogicalLine {
                number: idx + 1,
                tokens,
            });
        }
    }
    Ok(out)
}

// ===== PARSER =====

struct Scope {
    name: String,
    params: Vec<(String, f64)>,
}

#[derive(Default)]
struct Parser {
    bindings: IndexMap<String, Binding>,
    params: IndexMap<String, f64>,
    components: Vec<Component>,
    nodes: IndexSet<String>,
    sources: Vec<String>,
    includes: Vec<IncludeDirective>,
    models: IndexMap<String, String>,
    subcircuits: Vec<String>,
    scopes: Vec<Scope>,
}

impl Parser {
    fn run(mut self, lines: &[String]) -> Result<Self, ParseError> {
        let mut in_control = false;
        for logical in logical_lines(lines)? {
            let keyword = logical.tokens[0].upper();
            if in_control {
                in_control = keyword != ".ENDC";
                continue;
            }
            match keyword.as_str() {
                ".CONTROL" => in_control = true,
                ".END" => break,
                _ => self.statement(&logical)?,
            }
        }

        if let Some(open) = self.scopes.last() {
            return Err(ParseError::new(
                lines.len(),
                format!("subcircuit '{}' is missing .ENDS", open.name),
            ));
        }
        Ok(self)
    }

    fn statement(&mut self, logical: &LogicalLine<'_>) -> Result<(), ParseError> {
        let tokens = &logical.tokens;
        let line = logical.number;
        let keyword = tokens[0].upper();

        if keyword.starts_with('.') {
            return match keyword.as_str() {
                ".SUBCKT" => self.open_subcircuit(tokens, line),
                ".ENDS" => self
                    .scopes
                    .pop()
                    .map(|_| ())
                    .ok_or_else(|| ParseError::new(line, ".ENDS without a matching .SUBCKT")),
                ".PARAM" | ".PARAMS" => self.param_statement(&tokens[1..], line),
                ".INCLUDE" | ".INC" | ".LIB" => {
                    let path = tokens
                        .get(1)
                        .ok_or_else(|| ParseError::new(line, format!("{} requires a path", keyword)))?;
                    self.includes.push(IncludeDirective {
                        path: path.text.trim_matches(['"', '\'']).to_string(),
                        section: tokens.get(2).map(|t| t.text.to_string()),
                        line,
                    });
                    Ok(())
                }
                ".MODEL" => {
                    if tokens.len() < 3 {
                        return Err(ParseError::new(line, ".MODEL requires a name and a type"));
                    }
                    let kind = tokens[2].text.split('(').next().unwrap_or_default();
                    self.models.insert(tokens[1].upper(), kind.to_string());
                    Ok(())
                }
                // Analysis, output and option directives carry no tunable state
                _ => Ok(()),
            };
        }

        self.element(tokens, line)
    }

    fn open_subcircuit(&mut self, tokens: &[Token<'_>], line: usize) -> Result<(), ParseError> {
        let name = tokens
            .get(1)
            .ok_or_else(|| ParseError::new(line, ".SUBCKT requires a name"))?
            .text
            .to_string();

        // Push the scope first so header defaults resolve against enclosing parameters only
        let params_at = tokens
            .iter()
            .position(|t| t.is("PARAMS:"))
            .or_else(|| tokens.iter().position(|t| t.text == "=").map(|i| i - 1))
            .unwrap_or(tokens.len());
        self.scopes.push(Scope {
            name: name.clone(),
            params: Vec::new(),
        });
        self.subcircuits.push(name);

        let mut header = &tokens[params_at..];
        if header.first().is_some_and(|t| t.is("PARAMS:")) {
            header = &header[1..];
        }
        self.param_statement(header, line)
    }

    /// `name = value` assignments; a value may span several tokens when written
    /// as a bare expression (`b = a * 2`).
    fn param_statement(&mut self, tokens: &[Token<'_>], line: usize) -> Result<(), ParseError> {
        let equals: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.text == "=")
            .map(|(i, _)| i)
            .collect();
        if tokens.is_empty() {
            return Ok(());
        }
        if equals.is_empty() || equals[0] != 1 {
            return Err(ParseError::new(line, "expected 'name = value' assignment"));
        }

        for (k, &eq) in equals.iter().enumerate() {
            let name = &tokens[eq - 1];
            let value_end = equals.get(k + 1).map_or(tokens.len(), |&next| next - 1);
            if value_end <= eq + 1 {
                return Err(ParseError::new(
                    line,
                    format!("parameter '{}' has no value", name.text),
                ));
            }
            let value_tokens = &tokens[eq + 1..value_end];
            let value = if let [single] = value_tokens {
                self.evaluate(single.text, line)?
            } else {
                let joined: String = value_tokens.iter().map(|t| t.text).collect();
                self.evaluate(&joined, line)?
            };

            let key = name.upper();
            match self.scopes.last_mut() {
                Some(scope) => scope.params.push((key, value)),
                None => {
                    self.params.insert(key.clone(), value);
                    if let [single] = value_tokens {
                        if parse_spice_number(single.text).is_some() {
                            self.bind(&key, name.text, ParameterKind::Scalar, value, single.location());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn element(&mut self, tokens: &[Token<'_>], line: usize) -> Result<(), ParseError> {
        let name = tokens[0].text;
        let element = name
            .chars()
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
            .ok_or_else(|| ParseError::new(line, format!("unrecognized statement '{}'", name)))?;
        let top_level = self.scopes.is_empty();

        let mut component = Component {
            name: name.to_string(),
            nodes: Vec::new(),
            value: None,
            subcircuit: self.scopes.last().map(|s| s.name.clone()),
            line,
        };

        match element {
            'R' | 'L' | 'C' => {
                if tokens.len() < 4 {
                    return Err(ParseError::new(
                        line,
                        format!("component '{}' requires two nodes and a value", name),
                    ));
                }
                let value_idx = if tokens.len() > 5
                    && tokens[4].text == "="
                    && ["VALUE", "R", "C", "L"].iter().any(|k| tokens[3].is(k))
                {
                    5
                } else {
                    3
                };
                let value_token = &tokens[value_idx];
                let value = self.evaluate(value_token.text, line)?;
                if top_level && parse_spice_number(value_token.text).is_some() {
                    if let Some(kind) = ParameterKind::from_component(name) {
                        self.bind(&name.to_ascii_uppercase(), name, kind, value, value_token.location());
                    }
                }
                component.value = Some(value);
                component.nodes = tokens[1..3].iter().map(|t| t.text.to_string()).collect();
            }
            'X' => {
                let end = tokens
                    .iter()
                    .position(|t| t.is("PARAMS:"))
                    .or_else(|| tokens.iter().position(|t| t.text == "=").map(|i| i - 1))
                    .unwrap_or(tokens.len());
                if end < 3 {
                    return Err(ParseError::new(
                        line,
                        format!("subcircuit instance '{}' requires nodes and a subcircuit name", name),
                    ));
                }
                component.nodes = tokens[1..end - 1].iter().map(|t| t.text.to_string()).collect();
            }
            _ => {
                let arity = match element {
                    'B' | 'D' | 'F' | 'H' | 'I' | 'V' | 'W' => 2,
                    'J' | 'Q' | 'U' | 'Z' => 3,
                    'E' | 'G' | 'M' | 'O' | 'S' | 'T' => 4,
                    'A' => 8,
                    _ => 0,
                };
                component.nodes = tokens
                    .iter()
                    .skip(1)
                    .take(arity)
                    .take_while(|t| t.text != "=")
                    .map(|t| t.text.to_string())
                    .collect();
                if top_level && matches!(element, 'V' | 'I') {
                    self.sources.push(name.to_string());
                }
            }
        }

        if top_level {
            for node in &component.nodes {
                self.nodes.insert(node.clone());
            }
        }
        self.components.push(component);
        Ok(())
    }

    fn bind(&mut self, key: &str, name: &str, kind: ParameterKind, value: f64, location: Location) {
        self.bindings
            .entry(key.to_string())
            .or_insert_with(|| Binding {
                spec: ParameterSpec::new(name, kind, value),
                locations: Vec::new(),
            })
            .locations
            .push(location);
    }

    /// Evaluate a literal, `{expr}`, `'expr'` or bare expression against the visible parameters.
    fn evaluate(&self, text: &str, line: usize) -> Result<f64, ParseError> {
        if let Some(value) = parse_spice_number(text) {
            return Ok(value);
        }

        let expr = text
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            .unwrap_or(text);

        // Innermost scope first so local names shadow outer ones
        let (names, values): (Vec<String>, Vec<f64>) = self
            .scopes
            .iter()
            .rev()
            .flat_map(|s| s.params.iter().rev().cloned())
            .chain(self.params.iter().map(|(k, v)| (k.clone(), *v)))
            .unzip();

        let compiled = CompiledExpression::new(expr, &names)
            .map_err(|e| ParseError::new(line, format!("invalid value '{}': {}", text, e)))?;
        let value = compiled
            .evaluate(&values)
            .map_err(|e| ParseError::new(line, format!("cannot evaluate '{}': {}", text, e)))?;
        if !value.is_finite() {
            return Err(ParseError::new(
                line,
                format!("'{}' evaluates to non-finite {}", text, value),
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DIVIDER: &str = "\u{feff}Voltage divider
V1 1 0 5
R1 1 2 1k
R2 2 0 3k
.TRAN 1u 1m
.PRINT TRAN V(2)
.END
";

    #[test]
    fn lists_tunables_in_declaration_order() {
        let doc = NetlistDocument::parse(DIVIDER).unwrap();
        let names: Vec<_> = doc.tunable_parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["R1", "R2"]);
        assert_relative_eq!(doc.value("r2").unwrap(), 3000.0);
        assert_eq!(doc.title(), "Voltage divider");
        assert!(doc.has_source("v1"));
        assert_eq!(doc.nodes().collect::<Vec<_>>(), vec!["1", "0", "2"]);
    }

    #[test]
    fn apply_rewrites_only_the_value_token() {
        let doc = NetlistDocument::parse(DIVIDER).unwrap();
        let applied = doc.apply(&[("R2".to_string(), 1000.0)]).unwrap();
        assert!(applied.text().contains("R2 2 0 1e3\n"));
        assert!(applied.text().contains("R1 1 2 1k\n"));
        assert_relative_eq!(applied.value("R2").unwrap(), 1000.0);
        assert_relative_eq!(doc.value("R2").unwrap(), 3000.0);
    }

    #[test]
    fn apply_is_pure_and_empty_vector_is_identity() {
        let doc = NetlistDocument::parse(DIVIDER).unwrap();
        let vector = vec![("R1".to_string(), 1234.5), ("r2".to_string(), 0.1 + 0.2)];
        let a = doc.apply(&vector).unwrap();
        let b = doc.apply(&vector).unwrap();
        assert_eq!(a.text(), b.text());
        assert_eq!(doc.apply(&[]).unwrap(), doc);
        assert_eq!(doc.text(), DIVIDER.trim_start_matches('\u{feff}'));
        assert_eq!(a.value("R2"), Some(0.1 + 0.2));
    }

    #[test]
    fn apply_rejects_unknown_and_non_finite() {
        let doc = NetlistDocument::parse(DIVIDER).unwrap();
        assert_eq!(
            doc.apply(&[("R9".to_string(), 1.0)]),
            Err(NetlistError::UnknownParameter("R9".into()))
        );
        assert!(matches!(
            doc.apply(&[("R1".to_string(), f64::NAN)]),
            Err(NetlistError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn resolves_param_expressions() {
        let text = "params
.PARAM RBASE=1k GAIN = 2
.param RTOP = {RBASE * GAIN}
R1 in out {RTOP}
R2 out 0 RBASE
C1 out 0 C=10n
";
        let doc = NetlistDocument::parse(text).unwrap();
        let names: Vec<_> = doc.tunable_parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["RBASE", "GAIN", "C1"]);
        assert_relative_eq!(doc.params()["RTOP"], 2000.0);
        assert_relative_eq!(doc.components()[0].value.unwrap(), 2000.0);
        assert_relative_eq!(doc.components()[1].value.unwrap(), 1000.0);
        assert_relative_eq!(doc.value("C1").unwrap(), 10e-9);

        let applied = doc.apply(&[("GAIN".to_string(), 3.0)]).unwrap();
        assert_relative_eq!(applied.params()["RTOP"], 3000.0);
        assert_eq!(applied.parameter("GAIN").unwrap().kind, ParameterKind::Scalar);
    }

    #[test]
    fn joins_continuation_lines() {
        let text = "continued
R1 1
+ 0
+ 4.7k
";
        let doc = NetlistDocument::parse(text).unwrap();
        assert_relative_eq!(doc.value("R1").unwrap(), 4700.0);
        let applied = doc.apply(&[("R1".to_string(), 10.0)]).unwrap();
        assert_eq!(applied.lines()[3], "+ 1e1");
    }

    #[test]
    fn subcircuit_elements_are_not_tunable() {
        let text = "nested
.SUBCKT FILT in out PARAMS: RV=2k
R1 in mid {RV}
.SUBCKT INNER a b
C1 a b 1n
.ENDS
C2 mid out 1u
.ENDS FILT
X1 1 2 FILT PARAMS: RV=5k
R9 2 0 1k
";
        let doc = NetlistDocument::parse(text).unwrap();
        let names: Vec<_> = doc.tunable_parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["R9"]);
        assert_eq!(doc.subcircuits(), &["FILT".to_string(), "INNER".to_string()]);
        assert_eq!(doc.components().len(), 5);
        assert_eq!(doc.components()[3].nodes, vec!["1", "2"]);
    }

    #[test]
    fn skips_control_blocks_and_text_after_end() {
        let text = "ctl
R1 1 0 1k
.control
run
.endc
.END
R2 1 0 garbage
";
        let doc = NetlistDocument::parse(text).unwrap();
        assert_eq!(doc.tunable_parameters().len(), 1);
    }

    #[test]
    fn reports_line_of_malformed_component() {
        let err = NetlistDocument::parse("title\nV1 1 0 5\nR1 1 0\n").unwrap_err();
        assert_eq!(err.line, 3);

        let err = NetlistDocument::parse("title\nR1 1 0 {RMISSING}\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("RMISSING"));

        let err = NetlistDocument::parse("title\nR1 1 0 1q\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn rejects_unbalanced_subcircuits() {
        assert!(NetlistDocument::parse("t\n.SUBCKT A 1 2\nR1 1 2 1k\n").is_err());
        assert_eq!(NetlistDocument::parse("t\n.ENDS\n").unwrap_err().line, 2);
    }

    #[test]
    fn records_models_and_includes() {
        let text = "inv
.include \"models/opamp.lib\"
.lib cmos.lib tt
.model DMOD D(IS=1e-14)
D1 1 0 DMOD
";
        let doc = NetlistDocument::parse(text).unwrap();
        assert_eq!(doc.includes()[0].path, "models/opamp.lib");
        assert_eq!(doc.includes()[1].section.as_deref(), Some("tt"));
        assert_eq!(doc.models()["DMOD"], "D");
    }
}
