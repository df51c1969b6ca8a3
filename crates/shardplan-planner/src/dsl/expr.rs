//! Text syntax for scalar expressions and aggregates.
//!
//! ```text
//! x = $2 AND NOT (y < 3.5 OR name != 'bob')
//! CASE WHEN @0 > 10 THEN $1 ELSE -$1 END
//! CAST(v AS DOUBLE_TYPE)  SQRT(abs(x - 1))
//! COUNT(*)    AVG(price * qty)
//! ```
//!
//! Bare words are named attributes, `$n` positional columns and `@n` state
//! columns. Keywords are case-insensitive. Binary operators are
//! left-associative and bind by precedence climbing.

use shardplan_core::aggregate::AggregateExpr;
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::{BinaryOp, Expr, Literal, UnaryOp};

use super::parse_data_type;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Column(usize),
    State(usize),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Mul,
    Div,
}

impl Token {
    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw))
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        let tok = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Mul,
            '/' => Token::Div,
            '=' => {
                if chars.get(i) == Some(&'=') {
                    i += 1;
                }
                Token::Eq
            }
            '!' if chars.get(i) == Some(&'=') => {
                i += 1;
                Token::Neq
            }
            '<' => match chars.get(i) {
                Some('=') => {
                    i += 1;
                    Token::LtEq
                }
                Some('>') => {
                    i += 1;
                    Token::Neq
                }
                _ => Token::Lt,
            },
            '>' => match chars.get(i) {
                Some('=') => {
                    i += 1;
                    Token::GtEq
                }
                _ => Token::Gt,
            },
            '\'' => {
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::Parse(format!(
                                "unterminated string starting at offset {start} in `{src}`"
                            )))
                        }
                        // '' inside a string is an escaped quote.
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                Token::Str(s)
            }
            '$' | '@' => {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start + 1..i].iter().collect();
                let pos = digits.parse::<usize>().map_err(|_| {
                    Error::Parse(format!("`{c}` must be followed by a column number in `{src}`"))
                })?;
                if c == '$' {
                    Token::Column(pos)
                } else {
                    Token::State(pos)
                }
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    Token::Float(text.parse().map_err(|_| {
                        Error::Parse(format!("invalid number `{text}` in `{src}`"))
                    })?)
                } else {
                    Token::Int(text.parse().map_err(|_| {
                        Error::Parse(format!("invalid number `{text}` in `{src}`"))
                    })?)
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                Token::Word(chars[start..i].iter().collect())
            }
            other => {
                return Err(Error::Parse(format!(
                    "unexpected character `{other}` at offset {start} in `{src}`"
                )))
            }
        };
        tokens.push(tok);
    }
    Ok(tokens)
}

const PREC_OR: u8 = 10;
const PREC_AND: u8 = 20;
const PREC_NOT: u8 = 30;
const PREC_COMPARISON: u8 = 50;
const PREC_ADD_SUB: u8 = 80;
const PREC_MUL_DIV: u8 = 90;
const PREC_UNARY_MINUS: u8 = 100;

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    idx: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            idx: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.idx)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx).cloned();
        if tok.is_some() {
            self.idx += 1;
        }
        tok
    }

    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::Parse(format!("{msg} in `{}`", self.src))
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(self.error(format!("expected {want:?}, found {tok:?}"))),
            None => Err(self.error(format!("expected {want:?}, found end of input"))),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.next() {
            Some(tok) if tok.is_keyword(kw) => Ok(()),
            Some(tok) => Err(self.error(format!("expected {kw}, found {tok:?}"))),
            None => Err(self.error(format!("expected {kw}, found end of input"))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("unexpected trailing {tok:?}"))),
        }
    }

    fn parse_subexpr(&mut self, precedence: u8) -> Result<Expr> {
        let mut expr = self.parse_prefix()?;
        loop {
            let Some((op, next_precedence)) = self.peek_infix() else {
                break;
            };
            if precedence >= next_precedence {
                break;
            }
            self.idx += 1;
            let right = self.parse_subexpr(next_precedence)?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn peek_infix(&self) -> Option<(BinaryOp, u8)> {
        Some(match self.peek()? {
            Token::Word(w) if w.eq_ignore_ascii_case("OR") => (BinaryOp::Or, PREC_OR),
            Token::Word(w) if w.eq_ignore_ascii_case("AND") => (BinaryOp::And, PREC_AND),
            Token::Eq => (BinaryOp::Eq, PREC_COMPARISON),
            Token::Neq => (BinaryOp::Neq, PREC_COMPARISON),
            Token::Lt => (BinaryOp::Lt, PREC_COMPARISON),
            Token::LtEq => (BinaryOp::LtEq, PREC_COMPARISON),
            Token::Gt => (BinaryOp::Gt, PREC_COMPARISON),
            Token::GtEq => (BinaryOp::GtEq, PREC_COMPARISON),
            Token::Plus => (BinaryOp::Plus, PREC_ADD_SUB),
            Token::Minus => (BinaryOp::Minus, PREC_ADD_SUB),
            Token::Mul => (BinaryOp::Times, PREC_MUL_DIV),
            Token::Div => (BinaryOp::Divide, PREC_MUL_DIV),
            _ => return None,
        })
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        let tok = self
            .next()
            .ok_or_else(|| self.error("expected an expression, found end of input"))?;
        Ok(match tok {
            Token::Int(v) => Expr::Literal(Literal::Int(v)),
            Token::Float(v) => Expr::Literal(Literal::Float(v)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::Column(p) => Expr::Column(p),
            Token::State(p) => Expr::State(p),
            Token::LParen => {
                let inner = self.parse_subexpr(0)?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::Minus => match self.parse_subexpr(PREC_UNARY_MINUS)? {
                Expr::Literal(Literal::Int(v)) => Expr::Literal(Literal::Int(-v)),
                Expr::Literal(Literal::Float(v)) => Expr::Literal(Literal::Float(-v)),
                other => unary(UnaryOp::Negate, other),
            },
            Token::Word(w) => self.parse_word(w)?,
            other => return Err(self.error(format!("unexpected {other:?}"))),
        })
    }

    fn parse_word(&mut self, w: String) -> Result<Expr> {
        let upper = w.to_ascii_uppercase();
        Ok(match upper.as_str() {
            "TRUE" => Expr::Literal(Literal::Bool(true)),
            "FALSE" => Expr::Literal(Literal::Bool(false)),
            "NOT" => unary(UnaryOp::Not, self.parse_subexpr(PREC_NOT)?),
            "ABS" | "SQRT" if self.peek() == Some(&Token::LParen) => {
                self.idx += 1;
                let arg = self.parse_subexpr(0)?;
                self.expect(Token::RParen)?;
                let op = if upper == "ABS" {
                    UnaryOp::Abs
                } else {
                    UnaryOp::Sqrt
                };
                unary(op, arg)
            }
            "CAST" => {
                self.expect(Token::LParen)?;
                let input = self.parse_subexpr(0)?;
                self.expect_keyword("AS")?;
                let to = match self.next() {
                    Some(Token::Word(ty)) => parse_data_type(&ty)?,
                    other => return Err(self.error(format!("expected a type, found {other:?}"))),
                };
                self.expect(Token::RParen)?;
                Expr::Cast {
                    input: Box::new(input),
                    to,
                }
            }
            "CASE" => {
                self.expect_keyword("WHEN")?;
                let when = self.parse_subexpr(0)?;
                self.expect_keyword("THEN")?;
                let then = self.parse_subexpr(0)?;
                self.expect_keyword("ELSE")?;
                let otherwise = self.parse_subexpr(0)?;
                self.expect_keyword("END")?;
                Expr::Case {
                    when: Box::new(when),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                }
            }
            _ => Expr::Named(w),
        })
    }

    fn parse_aggregate(&mut self) -> Result<AggregateExpr> {
        let name = match self.next() {
            Some(Token::Word(w)) => w.to_ascii_uppercase(),
            other => return Err(self.error(format!("expected an aggregate, found {other:?}"))),
        };
        self.expect(Token::LParen)?;
        if name == "COUNT" && self.peek() == Some(&Token::Mul) {
            self.idx += 1;
            self.expect(Token::RParen)?;
            return Ok(AggregateExpr::CountAll);
        }
        let input = self.parse_subexpr(0)?;
        self.expect(Token::RParen)?;
        Ok(match name.as_str() {
            "COUNT" => AggregateExpr::Count(input),
            "SUM" => AggregateExpr::Sum(input),
            "MIN" => AggregateExpr::Min(input),
            "MAX" => AggregateExpr::Max(input),
            "AVG" => AggregateExpr::Avg(input),
            other => return Err(self.error(format!("unknown aggregate {other}"))),
        })
    }
}

fn unary(op: UnaryOp, input: Expr) -> Expr {
    Expr::Unary {
        op,
        input: Box::new(input),
    }
}

pub fn parse_expr(src: &str) -> Result<Expr> {
    let mut parser = Parser::new(src)?;
    let expr = parser.parse_subexpr(0)?;
    parser.expect_end()?;
    Ok(expr)
}

pub fn parse_aggregate(src: &str) -> Result<AggregateExpr> {
    let mut parser = Parser::new(src)?;
    let agg = parser.parse_aggregate()?;
    parser.expect_end()?;
    Ok(agg)
}
