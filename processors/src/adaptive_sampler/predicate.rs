//! The small boolean-expression language `AdaptiveSampler` rules use to match
//! items: `==, !=, <, <=, >, >=, in, matches, and, or, not` over attribute
//! keys and literals. Compiled once at rule-construction time (original spec
//! §9's re-architecture guidance: compile predicates once, evaluate without
//! per-item allocation where practical) and reused across every item the
//! rule is tested against.

use common::batch::{AttributeValue, Attributes};
use common::error::CoreError;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    In,
    Matches,
}

fn lex(source: &str) -> Result<Vec<Token>, CoreError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(CoreError::Config(format!("unterminated string literal in predicate: {source}")));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(">"));
                i += 1;
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text.parse::<f64>().map_err(|e| CoreError::Config(format!("bad numeric literal {text:?}: {e}")))?;
                tokens.push(Token::Num(num));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "matches" => Token::Matches,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(CoreError::Config(format!("unexpected character {other:?} in predicate: {source}"))),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
enum Expr {
    Compare { key: String, op: &'static str, value: Literal },
    In { key: String, values: Vec<Literal> },
    Matches { key: String, regex: Box<Regex> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Literal(bool),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), CoreError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(CoreError::Config(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, CoreError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Bool(b)) => Ok(Expr::Literal(b)),
            Some(Token::Ident(key)) => self.parse_comparison(key),
            other => Err(CoreError::Config(format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_comparison(&mut self, key: String) -> Result<Expr, CoreError> {
        match self.advance() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(Expr::Compare { key, op, value })
            }
            Some(Token::In) => {
                self.expect(&Token::LParen)?;
                let mut values = vec![self.parse_literal()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    values.push(self.parse_literal()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::In { key, values })
            }
            Some(Token::Matches) => {
                let pattern = match self.advance() {
                    Some(Token::Str(s)) => s,
                    other => return Err(CoreError::Config(format!("expected a string regex after `matches`, found {other:?}"))),
                };
                let regex = Regex::new(&pattern).map_err(|e| CoreError::Config(format!("bad regex {pattern:?} in predicate: {e}")))?;
                Ok(Expr::Matches { key, regex: Box::new(regex) })
            }
            other => Err(CoreError::Config(format!("expected a comparison operator after {key:?}, found {other:?}"))),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, CoreError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Num(n)) => Ok(Literal::Num(n)),
            Some(Token::Bool(b)) => Ok(Literal::Bool(b)),
            other => Err(CoreError::Config(format!("expected a literal, found {other:?}"))),
        }
    }
}

fn parse(source: &str) -> Result<Expr, CoreError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(CoreError::Config(format!("trailing tokens after predicate: {source}")));
    }
    Ok(expr)
}

/// A compiled predicate. Construction fails fast on a malformed expression
/// (original spec §4.3's "misconfigured rule -> startup failure"); evaluation
/// never fails -- a runtime type mismatch (comparing a string attribute with
/// `<`, say) evaluates to `false` rather than propagating an error, per
/// "predicate evaluation errors at runtime -> rule treated as non-matching."
#[derive(Debug, Clone)]
pub struct Predicate {
    expr: Expr,
}

impl Predicate {
    pub fn compile(source: &str) -> Result<Self, CoreError> {
        Ok(Predicate { expr: parse(source)? })
    }

    pub fn evaluate(&self, attrs: &Attributes) -> bool {
        eval(&self.expr, attrs)
    }
}

fn attribute_matches_literal(value: &AttributeValue, op: &str, literal: &Literal) -> bool {
    match (value, literal) {
        (AttributeValue::String(s), Literal::Str(l)) => compare_str(s, op, l),
        (AttributeValue::Bool(b), Literal::Bool(l)) => compare_bool(*b, op, *l),
        (_, Literal::Num(l)) => match value.as_float() {
            Some(v) => compare_num(v, op, *l),
            None => false,
        },
        _ => false,
    }
}

fn compare_str(a: &str, op: &str, b: &str) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn compare_num(a: f64, op: &str, b: f64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn compare_bool(a: bool, op: &str, b: bool) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        _ => false,
    }
}

fn eval(expr: &Expr, attrs: &Attributes) -> bool {
    match expr {
        Expr::Literal(b) => *b,
        Expr::Compare { key, op, value } => match attrs.get(key) {
            Some(attr_value) => attribute_matches_literal(attr_value, op, value),
            None => false,
        },
        Expr::In { key, values } => match attrs.get(key) {
            Some(attr_value) => values.iter().any(|v| attribute_matches_literal(attr_value, "==", v)),
            None => false,
        },
        Expr::Matches { key, regex } => match attrs.get(key).and_then(AttributeValue::as_str) {
            Some(s) => regex.is_match(s),
            None => false,
        },
        Expr::And(l, r) => eval(l, attrs) && eval(r, attrs),
        Expr::Or(l, r) => eval(l, attrs) || eval(r, attrs),
        Expr::Not(inner) => !eval(inner, attrs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs_with(key: &str, value: AttributeValue) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(key.to_string(), value);
        attrs
    }

    #[test]
    fn equality_on_string_attribute() {
        let pred = Predicate::compile(r#"db.system == "postgresql""#).unwrap();
        assert!(pred.evaluate(&attrs_with("db.system", "postgresql".into())));
        assert!(!pred.evaluate(&attrs_with("db.system", "mysql".into())));
    }

    #[test]
    fn numeric_comparison() {
        let pred = Predicate::compile("plan.total_cost > 100").unwrap();
        assert!(pred.evaluate(&attrs_with("plan.total_cost", 150.0.into())));
        assert!(!pred.evaluate(&attrs_with("plan.total_cost", 50.0.into())));
    }

    #[test]
    fn and_or_not_combinators() {
        let pred = Predicate::compile(r#"db.system == "postgresql" and not (plan.total_cost < 10)"#).unwrap();
        let mut attrs = attrs_with("db.system", "postgresql".into());
        attrs.insert("plan.total_cost".into(), 50.0.into());
        assert!(pred.evaluate(&attrs));
    }

    #[test]
    fn in_list() {
        let pred = Predicate::compile(r#"db.system in ("postgresql", "mysql")"#).unwrap();
        assert!(pred.evaluate(&attrs_with("db.system", "mysql".into())));
        assert!(!pred.evaluate(&attrs_with("db.system", "oracle".into())));
    }

    #[test]
    fn matches_regex() {
        let pred = Predicate::compile(r#"db.statement matches "^SELECT""#).unwrap();
        assert!(pred.evaluate(&attrs_with("db.statement", "SELECT 1".into())));
        assert!(!pred.evaluate(&attrs_with("db.statement", "INSERT INTO t".into())));
    }

    #[test]
    fn missing_attribute_is_non_matching_not_an_error() {
        let pred = Predicate::compile("db.system == \"postgresql\"").unwrap();
        assert!(!pred.evaluate(&Attributes::new()));
    }

    #[test]
    fn malformed_predicate_fails_to_compile() {
        assert!(Predicate::compile("db.system ==").is_err());
        assert!(Predicate::compile("(db.system == \"x\"").is_err());
    }
}
