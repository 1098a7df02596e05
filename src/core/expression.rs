use crate::simulation::values::parse_spice_number;

/// Compact bytecode instruction
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpCode {
    LoadParam(u16),
    LoadConst(u16),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Arithmetic expression compiled against an ordered list of parameter names.
///
/// Supports `+ - * / ^`, parentheses, unary sign, plain and engineering-notation
/// numbers (`4.7k`, `1e-9`) and parameter identifiers (case-insensitive).
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledExpression {
    source: String,
    instructions: Vec<OpCode>,
    constants: Vec<f64>, // Constant pool
    param_count: u16,
}

impl CompiledExpression {
    /// Compile `expr`, resolving identifiers against `param_names`.
    pub fn new(expr: &str, param_names: &[String]) -> Result<Self, String> {
        Compiler::new(param_names).compile(expr)
    }

    /// Evaluate with `params` laid out in the same order as the compile-time names.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64, &'static str> {
        if params.len() != self.param_count as usize {
            return Err("Parameter count mismatch");
        }

        let mut stack: Vec<f64> = Vec::with_capacity(8);

        for &inst in &self.instructions {
            match inst {
                OpCode::LoadParam(idx) => stack.push(params[idx as usize]),
                OpCode::LoadConst(idx) => stack.push(self.constants[idx as usize]),
                op => {
                    let rhs = stack.pop().ok_or("Invalid expression")?;
                    let lhs = stack.pop().ok_or("Invalid expression")?;
                    let value = match op {
                        OpCode::Add => lhs + rhs,
                        OpCode::Sub => lhs - rhs,
                        OpCode::Mul => lhs * rhs,
                        OpCode::Div => {
                            if rhs == 0.0 {
                                return Err("Division by zero");
                            }
                            lhs / rhs
                        }
                        OpCode::Pow => lhs.powf(rhs),
                        OpCode::LoadParam(_) | OpCode::LoadConst(_) => unreachable!(),
                    };
                    stack.push(value);
                }
            }
        }

        match stack.as_slice() {
            [value] => Ok(*value),
            _ => Err("Invalid expression"),
        }
    }

    /// Indices of the parameters this expression reads.
    pub fn dependencies(&self) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .instructions
            .iter()
            .filter_map(|op| match op {
                OpCode::LoadParam(idx) => Some(*idx as usize),
                _ => None,
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    pub fn is_constant(&self) -> bool {
        self.dependencies().is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

struct Compiler<'a> {
    params: &'a [String],
    instructions: Vec<OpCode>,
    constants: Vec<f64>,
}

impl<'a> Compiler<'a> {
    fn new(params: &'a [String]) -> Self {
        Self {
            params,
            instructions: Vec::with_capacity(32),
            constants: Vec::with_capacity(8),
        }
    }

    fn compile(mut self, expr: &str) -> Result<CompiledExpression, String> {
        if expr.is_empty() {
            return Err("Expression cannot be empty".into());
        }

        let cleaned: String = expr.chars().filter(|c| !c.is_whitespace()).collect();

        if cleaned.is_empty() {
            return Err("Expression contains only whitespace".into());
        }

        self.parse_expr(&cleaned)
            .map_err(|e| format!("Parse error: {}", e))?;

        Ok(CompiledExpression {
            source: expr.trim().to_string(),
            instructions: self.instructions,
            constants: self.constants,
            param_count: self.params.len() as u16,
        })
    }

    fn add_const(&mut self, val: f64) -> u16 {
        // Reuse existing constants
        if let Some(idx) = self.constants.iter().position(|&v| v == val) {
            return idx as u16;
        }
        let idx = self.constants.len();
        self.constants.push(val);
        idx as u16
    }

    fn parse_expr(&mut self, s: &str) -> Result<(), String> {
        self.parse_additive(s)
    }

    fn parse_additive(&mut self, s: &str) -> Result<(), String> {
        if let Some(pos) = find_op(s, &['+', '-']) {
            self.parse_additive(&s[..pos])?;
            self.parse_multiplicative(&s[pos + 1..])?;
            self.instructions.push(if s.as_bytes()[pos] == b'+' {
                OpCode::Add
            } else {
                OpCode::Sub
            });
        } else {
            self.parse_multiplicative(s)?;
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self, s: &str) -> Result<(), String> {
        if let Some(pos) = find_op(s, &['*', '/']) {
            self.parse_multiplicative(&s[..pos])?;
            self.parse_power(&s[pos + 1..])?;
            self.instructions.push(if s.as_bytes()[pos] == b'*' {
                OpCode::Mul
            } else {
                OpCode::Div
            });
        } else {
            self.parse_power(s)?;
        }
        Ok(())
    }

    fn parse_power(&mut self, s: &str) -> Result<(), String> {
        // Unary sign binds looser than '^': -2^2 == -(2^2)
        if let Some(rest) = s.strip_prefix('-') {
            let idx = self.add_const(0.0);
            self.instructions.push(OpCode::LoadConst(idx));
            self.parse_power(rest)?;
            self.instructions.push(OpCode::Sub);
            return Ok(());
        }
        if let Some(rest) = s.strip_prefix('+') {
            return self.parse_power(rest);
        }

        if let Some(pos) = find_op(s, &['^']) {
            self.parse_power(&s[..pos])?;
            self.parse_atom(&s[pos + 1..])?;
            self.instructions.push(OpCode::Pow);
        } else {
            self.parse_atom(s)?;
        }
        Ok(())
    }

    fn parse_atom(&mut self, s: &str) -> Result<(), String> {
        if s.is_empty() {
            return Err("Empty sub-expression".into());
        }

        if s.starts_with('-') || s.starts_with('+') {
            return self.parse_power(s);
        }

        // Handle parentheses
        if s.starts_with('(') {
            if !s.ends_with(')') {
                return Err(format!("Unmatched parentheses in '{}'", s));
            }

            let inner = &s[1..s.len() - 1];
            if !is_balanced(inner) {
                return Err(format!("Unbalanced parentheses in '{}'", s));
            }

            return self.parse_expr(inner);
        }

        // Check for invalid characters before parsing
        if !s
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '+' || c == '-')
        {
            return Err(format!("Invalid characters in '{}'", s));
        }

        // Numbers (with optional engineering suffix) start with a digit or '.'
        if s.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            let num = parse_spice_number(s).ok_or_else(|| format!("Invalid number '{}'", s))?;
            if !num.is_finite() {
                return Err(format!("Number '{}' is not finite", s));
            }
            let idx = self.add_const(num);
            self.instructions.push(OpCode::LoadConst(idx));
            return Ok(());
        }

        if let Some(idx) = self.params.iter().position(|p| p.eq_ignore_ascii_case(s)) {
            self.instructions.push(OpCode::LoadParam(idx as u16));
            return Ok(());
        }

        Err(format!(
            "Unknown identifier '{}'. Available parameters: [{}]",
            s,
            self.params.join(", ")
        ))
    }
}

/// Rightmost top-level binary operator from `ops`, skipping unary signs and
/// exponent signs inside numeric literals such as `1e-3`.
#[inline]
fn find_op(s: &str, ops: &[char]) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0;

    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' => depth -= 1,
            c if depth == 0 && ops.contains(&(c as char)) => {
                if (c == b'+' || c == b'-') && (is_unary(bytes, i) || is_exponent_sign(bytes, i)) {
                    continue;
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

#[inline]
fn is_unary(bytes: &[u8], i: usize) -> bool {
    i == 0 || matches!(bytes[i - 1], b'+' | b'-' | b'*' | b'/' | b'^' | b'(')
}

#[inline]
fn is_exponent_sign(bytes: &[u8], i: usize) -> bool {
    if i < 2 || !matches!(bytes[i - 1], b'e' | b'E') {
        return false;
    }
    // The mantissa before 'e' must be a bare numeric literal.
    let mut j = i - 1;
    let mut saw_digit = false;
    while j > 0 && (bytes[j - 1].is_ascii_digit() || bytes[j - 1] == b'.') {
        saw_digit |= bytes[j - 1].is_ascii_digit();
        j -= 1;
    }
    saw_digit && (j == 0 || !(bytes[j - 1].is_ascii_alphanumeric() || bytes[j - 1] == b'_'))
}

#[inline]
fn is_balanced(s: &str) -> bool {
    let mut depth = 0;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
