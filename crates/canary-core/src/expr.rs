//! The `when=` / `-k` expression language.
//!
//! Staging directives, keyword declarations, and enable/skip guards all take
//! a small boolean expression over parameters, platforms, and options:
//!
//! ```text
//! when = "np=4 and platform=linux"
//! when = "not option=debug"
//! when = "'np=1 or np=2' and mesh=coarse"     # quoted sub-expression
//! ```
//!
//! The same grammar drives `-k` keyword filtering, where bare words match
//! the case's keyword set (`-k "regression and not slow"`). Values may
//! contain glob `*`.

use std::fmt;

use thiserror::Error;

use crate::value::ParamMap;

/// Error parsing a when/keyword expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// Ran out of input mid-expression
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Token that does not fit the grammar at this position
    #[error("unexpected token '{0}' in expression")]
    UnexpectedToken(String),

    /// Input left over after a complete expression
    #[error("trailing input after expression: '{0}'")]
    TrailingInput(String),

    /// Unterminated quoted section
    #[error("unterminated quote in expression")]
    UnterminatedQuote,
}

/// Comparison operator in an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhenExpr {
    /// All branches must hold
    And(Vec<WhenExpr>),
    /// Any branch must hold
    Or(Vec<WhenExpr>),
    /// Negation
    Not(Box<WhenExpr>),
    /// `key=value` / `key!=value`; value may be a glob
    Cmp {
        /// Parameter name, or the pseudo-keys `platform`/`option`
        key: String,
        /// `=` or `!=`
        op: CmpOp,
        /// Literal or glob pattern
        value: String,
    },
    /// Bare word, matched against the active domain (platforms+options for
    /// when-guards, the keyword set for `-k` filters)
    Word(String),
    /// Always true; the parse of an empty guard
    True,
}

/// What a when-guard is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The case's parameters
    pub params: &'a ParamMap,
    /// Active platform names (e.g. `linux`, the hostname's site name)
    pub platforms: &'a [String],
    /// User-supplied `-o` options
    pub options: &'a [String],
}

impl WhenExpr {
    /// Parse an expression. Empty input parses to [`WhenExpr::True`].
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Self::True);
        }
        let mut p = Parser { tokens, pos: 0 };
        let expr = p.or_expr()?;
        if p.pos != p.tokens.len() {
            return Err(ExprError::TrailingInput(p.tokens[p.pos].text()));
        }
        Ok(expr)
    }

    /// Evaluate as a when-guard.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::True => true,
            Self::And(branches) => branches.iter().all(|b| b.eval(ctx)),
            Self::Or(branches) => branches.iter().any(|b| b.eval(ctx)),
            Self::Not(inner) => !inner.eval(ctx),
            Self::Word(w) => {
                ctx.platforms.iter().chain(ctx.options).any(|s| glob_match(w, s))
            }
            Self::Cmp { key, op, value } => {
                let hit = match key.as_str() {
                    "platform" | "platforms" => {
                        ctx.platforms.iter().any(|p| glob_match(value, p))
                    }
                    "option" | "options" => ctx.options.iter().any(|o| glob_match(value, o)),
                    name => match ctx.params.get(name) {
                        Some(v) => glob_match(value, &v.to_string()),
                        None => false,
                    },
                };
                match op {
                    CmpOp::Eq => hit,
                    CmpOp::Ne => !hit,
                }
            }
        }
    }

    /// Evaluate as a `-k` keyword filter: bare words match the keyword set,
    /// comparisons never match (keywords are flat strings).
    pub fn eval_keywords(&self, keywords: &[String]) -> bool {
        match self {
            Self::True => true,
            Self::And(branches) => branches.iter().all(|b| b.eval_keywords(keywords)),
            Self::Or(branches) => branches.iter().any(|b| b.eval_keywords(keywords)),
            Self::Not(inner) => !inner.eval_keywords(keywords),
            Self::Word(w) => keywords.iter().any(|k| glob_match(w, k)),
            Self::Cmp { .. } => false,
        }
    }
}

impl fmt::Display for WhenExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("true"),
            Self::And(bs) => {
                let parts: Vec<String> = bs.iter().map(|b| b.to_string()).collect();
                write!(f, "({})", parts.join(" and "))
            }
            Self::Or(bs) => {
                let parts: Vec<String> = bs.iter().map(|b| b.to_string()).collect();
                write!(f, "({})", parts.join(" or "))
            }
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::Cmp { key, op, value } => {
                let op = match op {
                    CmpOp::Eq => "=",
                    CmpOp::Ne => "!=",
                };
                write!(f, "{key}{op}{value}")
            }
            Self::Word(w) => f.write_str(w),
        }
    }
}

/// Match `pattern` (with `*` and `?` wildcards) against `text`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_at(&p, &t)
}

fn glob_match_at(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            (0..=t.len()).any(|i| glob_match_at(&p[1..], &t[i..]))
        }
        Some('?') => !t.is_empty() && glob_match_at(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_match_at(&p[1..], &t[1..]),
    }
}

// ============================================================================
// Tokenizer / parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Eq,
    Ne,
    LParen,
    RParen,
}

impl Token {
    fn text(&self) -> String {
        match self {
            Self::Word(w) => w.clone(),
            Self::Quoted(q) => format!("'{q}'"),
            Self::Eq => "=".to_string(),
            Self::Ne => "!=".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(ExprError::UnterminatedQuote),
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Ne),
                    other => {
                        return Err(ExprError::UnexpectedToken(format!(
                            "!{}",
                            other.map(String::from).unwrap_or_default()
                        )))
                    }
                }
            }
            _ => {
                let mut w = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '\'' | '"' | '(' | ')' | '=' | '!') {
                        break;
                    }
                    w.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(w));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn or_expr(&mut self) -> Result<WhenExpr, ExprError> {
        let mut branches = vec![self.and_expr()?];
        while matches!(self.peek(), Some(Token::Word(w)) if w == "or") {
            self.next();
            branches.push(self.and_expr()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            WhenExpr::Or(branches)
        })
    }

    fn and_expr(&mut self) -> Result<WhenExpr, ExprError> {
        let mut branches = vec![self.not_expr()?];
        while matches!(self.peek(), Some(Token::Word(w)) if w == "and") {
            self.next();
            branches.push(self.not_expr()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            WhenExpr::And(branches)
        })
    }

    fn not_expr(&mut self) -> Result<WhenExpr, ExprError> {
        if matches!(self.peek(), Some(Token::Word(w)) if w == "not") {
            self.next();
            return Ok(WhenExpr::Not(Box::new(self.not_expr()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<WhenExpr, ExprError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ExprError::UnexpectedToken(t.text())),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            // A quoted token in atom position is a parenthesized
            // sub-expression; in value position (below) it is a literal.
            Some(Token::Quoted(q)) => WhenExpr::parse(&q),
            Some(Token::Word(w)) => match self.peek() {
                Some(Token::Eq) | Some(Token::Ne) => {
                    let op = match self.next() {
                        Some(Token::Eq) => CmpOp::Eq,
                        _ => CmpOp::Ne,
                    };
                    let value = match self.next() {
                        Some(Token::Word(v)) => v,
                        Some(Token::Quoted(v)) => v,
                        Some(t) => return Err(ExprError::UnexpectedToken(t.text())),
                        None => return Err(ExprError::UnexpectedEnd),
                    };
                    Ok(WhenExpr::Cmp { key: w, op, value })
                }
                _ => Ok(WhenExpr::Word(w)),
            },
            Some(t) => Err(ExprError::UnexpectedToken(t.text())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParamValue;

    fn ctx_with_np(np: i64) -> ParamMap {
        let mut m = ParamMap::new();
        m.insert("np", ParamValue::Int(np));
        m
    }

    fn eval(expr: &str, params: &ParamMap, platforms: &[&str], options: &[&str]) -> bool {
        let platforms: Vec<String> = platforms.iter().map(|s| s.to_string()).collect();
        let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
        WhenExpr::parse(expr).unwrap().eval(&EvalContext {
            params,
            platforms: &platforms,
            options: &options,
        })
    }

    #[test]
    fn parameter_comparison() {
        let params = ctx_with_np(4);
        assert!(eval("np=4", &params, &[], &[]));
        assert!(!eval("np=8", &params, &[], &[]));
        assert!(eval("np!=8", &params, &[], &[]));
    }

    #[test]
    fn missing_parameter_fails_eq_and_passes_ne() {
        let params = ParamMap::new();
        assert!(!eval("np=4", &params, &[], &[]));
        assert!(eval("np!=4", &params, &[], &[]));
    }

    #[test]
    fn platform_and_option_pseudo_keys() {
        let params = ParamMap::new();
        assert!(eval("platform=linux", &params, &["linux"], &[]));
        assert!(eval("platform=lin*", &params, &["linux"], &[]));
        assert!(!eval("platform=darwin", &params, &["linux"], &[]));
        assert!(eval("option=debug", &params, &[], &["debug"]));
    }

    #[test]
    fn boolean_structure() {
        let params = ctx_with_np(4);
        assert!(eval("np=4 and platform=linux", &params, &["linux"], &[]));
        assert!(eval("np=8 or np=4", &params, &[], &[]));
        assert!(eval("not np=8", &params, &[], &[]));
        assert!(!eval("not (np=4 or np=8)", &params, &[], &[]));
    }

    #[test]
    fn quoted_subexpression() {
        let params = ctx_with_np(2);
        assert!(eval("'np=1 or np=2' and np!=3", &params, &[], &[]));
    }

    #[test]
    fn quoted_value_is_literal() {
        let mut params = ParamMap::new();
        params.insert("mesh", ParamValue::from("very fine"));
        assert!(eval("mesh='very fine'", &params, &[], &[]));
    }

    #[test]
    fn keyword_filtering() {
        let kws: Vec<String> = ["regression", "slow", "mpi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let hit = |e: &str| WhenExpr::parse(e).unwrap().eval_keywords(&kws);
        assert!(hit("regression"));
        assert!(hit("regression and not smoke"));
        assert!(!hit("regression and not slow"));
        assert!(hit("smoke or mpi"));
        assert!(hit("reg*"));
    }

    #[test]
    fn empty_guard_is_true() {
        assert_eq!(WhenExpr::parse("").unwrap(), WhenExpr::True);
        assert_eq!(WhenExpr::parse("   ").unwrap(), WhenExpr::True);
    }

    #[test]
    fn parse_errors() {
        assert!(WhenExpr::parse("np=").is_err());
        assert!(WhenExpr::parse("(np=4").is_err());
        assert!(WhenExpr::parse("'np=4").is_err());
        assert!(WhenExpr::parse("np=4 np=5 extra=1 )").is_err());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "ab"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
    }
}
