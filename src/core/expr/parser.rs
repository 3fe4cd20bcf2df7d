//! Recursive-descent parser for template strings.
//!
//! A template is literal text mixed with `${...}` spans. Inside a span the
//! grammar is:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | primary
//! primary := number | string | true | false | null
//!          | path | call | '(' expr ')'
//! path    := ['$' '.'] segment ('.' segment)*
//! call    := path '(' [expr (',' expr)*] ')'
//! ```
//!
//! A path segment is an identifier or a bare array index. A call whose name
//! is a single builtin identifier (`int`, `float`, `bool`, `json`, `fresh`)
//! becomes a builtin application and must have exactly one argument.

use serde_json::{Number, Value};

use super::ast::{BinOp, Builtin, Expr, Span, Template};

/// A parse failure with the byte offset into the template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

/// Parse a template string into spans. Text without `${` passes through
/// untouched; a `$` not followed by `{` is literal.
pub(crate) fn parse_template(source: &str) -> Result<Template, ParseError> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut text = String::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b'$' && bytes.get(pos + 1) == Some(&b'{') {
            if !text.is_empty() {
                spans.push(Span::Text(std::mem::take(&mut text)));
            }
            let mut parser = Parser {
                bytes,
                pos: pos + 2,
            };
            parser.skip_ws();
            if parser.peek() == Some(b'}') {
                return Err(ParseError::new("empty interpolation span", pos));
            }
            let expr = parser.parse_expr()?;
            parser.skip_ws();
            match parser.peek() {
                Some(b'}') => {
                    pos = parser.pos + 1;
                    spans.push(Span::Expr(expr));
                }
                Some(_) => {
                    return Err(ParseError::new("expected '}'", parser.pos));
                }
                None => {
                    return Err(ParseError::new("unterminated interpolation span", pos));
                }
            }
        } else {
            let ch_len = utf8_len(bytes[pos]);
            text.push_str(&source[pos..pos + ch_len]);
            pos += ch_len;
        }
    }
    if !text.is_empty() {
        spans.push(Span::Text(text));
    }
    Ok(Template { spans })
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(b'+') => BinOp::Add,
                Some(b'-') => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(b'*') => BinOp::Mul,
                Some(b'/') => BinOp::Div,
                Some(b'%') => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        if self.eat(b'-') {
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(ParseError::new("unexpected end of expression", self.pos)),
            Some(b'(') => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.skip_ws();
                if !self.eat(b')') {
                    return Err(ParseError::new("expected ')'", self.pos));
                }
                Ok(inner)
            }
            Some(b'\'') | Some(b'"') => self.parse_string(),
            Some(b) if b.is_ascii_digit() => self.parse_number(),
            Some(b'$') => self.parse_path_or_call(true),
            Some(b) if is_ident_start(b) => self.parse_path_or_call(false),
            Some(b) => Err(ParseError::new(
                format!("unexpected character '{}'", b as char),
                self.pos,
            )),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        let quote = self.bump().unwrap_or_default();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new("unterminated string literal", start)),
                Some(b) if b == quote => return Ok(Expr::Literal(Value::String(out))),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'\\') => out.push('\\'),
                    Some(b @ (b'\'' | b'"')) => out.push(b as char),
                    Some(b) => {
                        return Err(ParseError::new(
                            format!("unknown escape '\\{}'", b as char),
                            self.pos - 1,
                        ));
                    }
                    None => return Err(ParseError::new("unterminated string literal", start)),
                },
                Some(b) if b < 0x80 => out.push(b as char),
                Some(b) => {
                    // Re-assemble a multi-byte UTF-8 character.
                    let len = utf8_len(b);
                    let begin = self.pos - 1;
                    let end = begin + len;
                    if end > self.bytes.len() {
                        return Err(ParseError::new("unterminated string literal", start));
                    }
                    out.push_str(
                        std::str::from_utf8(&self.bytes[begin..end])
                            .map_err(|_| ParseError::new("invalid UTF-8 in string", begin))?,
                    );
                    self.pos = end;
                }
            }
        }
    }

    fn parse_number(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut float = false;
        if self.peek() == Some(b'.') && matches!(self.bytes.get(self.pos + 1), Some(b) if b.is_ascii_digit())
        {
            float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| ParseError::new("invalid number", start))?;
        if float {
            let parsed: f64 = text
                .parse()
                .map_err(|_| ParseError::new("invalid number", start))?;
            let number =
                Number::from_f64(parsed).ok_or_else(|| ParseError::new("invalid number", start))?;
            Ok(Expr::Literal(Value::Number(number)))
        } else {
            let parsed: i64 = text
                .parse()
                .map_err(|_| ParseError::new("number out of range", start))?;
            Ok(Expr::Literal(Value::Number(Number::from(parsed))))
        }
    }

    fn parse_path_or_call(&mut self, absolute: bool) -> Result<Expr, ParseError> {
        let start = self.pos;
        if absolute {
            self.pos += 1; // '$'
            if !self.eat(b'.') {
                return Err(ParseError::new("expected '.' after '$'", self.pos));
            }
        }
        let mut segments = vec![self.parse_segment()?];
        while self.peek() == Some(b'.') {
            self.pos += 1;
            segments.push(self.parse_segment()?);
        }
        self.skip_ws();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            let args = self.parse_args()?;
            if absolute {
                return Err(ParseError::new("calls cannot be root-anchored", start));
            }
            let name = segments.join(".");
            if segments.len() == 1
                && let Some(builtin) = Builtin::from_name(&name)
            {
                if args.len() != 1 {
                    return Err(ParseError::new(
                        format!("{}() takes exactly one argument", builtin.name()),
                        start,
                    ));
                }
                let mut args = args;
                return Ok(Expr::Builtin {
                    builtin,
                    arg: Box::new(args.remove(0)),
                });
            }
            return Ok(Expr::Call { name, args });
        }
        // Bare keywords are literals, not single-segment paths.
        if !absolute && segments.len() == 1 {
            match segments[0].as_str() {
                "true" => return Ok(Expr::Literal(Value::Bool(true))),
                "false" => return Ok(Expr::Literal(Value::Bool(false))),
                "null" => return Ok(Expr::Literal(Value::Null)),
                _ => {}
            }
        }
        Ok(Expr::Path { absolute, segments })
    }

    fn parse_segment(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some(b) if b.is_ascii_digit() => {
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            Some(b) if is_ident_start(b) => {
                self.pos += 1;
                while matches!(self.peek(), Some(b) if is_ident_continue(b)) {
                    self.pos += 1;
                }
            }
            _ => return Err(ParseError::new("expected path segment", self.pos)),
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(b')') {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b')') {
                return Ok(args);
            }
            return Err(ParseError::new("expected ',' or ')'", self.pos));
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn bare(source: &str) -> Expr {
        let tpl = parse_template(source).unwrap();
        tpl.as_bare().cloned().expect("bare template")
    }

    fn path(segments: &[&str]) -> Expr {
        Expr::Path {
            absolute: false,
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_plain_text_is_one_span() {
        let tpl = parse_template("Hello, world!").unwrap();
        assert_eq!(tpl.spans, vec![Span::Text("Hello, world!".to_string())]);
        assert!(tpl.as_bare().is_none());
    }

    #[test]
    fn test_mixed_template() {
        let tpl = parse_template("Hello, ${name}!").unwrap();
        assert_eq!(
            tpl.spans,
            vec![
                Span::Text("Hello, ".to_string()),
                Span::Expr(path(&["name"])),
                Span::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_bare_span() {
        assert_eq!(bare("${count}"), path(&["count"]));
        // Surrounding text makes it no longer bare.
        assert!(parse_template(" ${count}").unwrap().as_bare().is_none());
    }

    #[test]
    fn test_dollar_without_brace_is_literal() {
        let tpl = parse_template("cost: $5").unwrap();
        assert_eq!(tpl.spans, vec![Span::Text("cost: $5".to_string())]);
    }

    #[test]
    fn test_dotted_and_absolute_paths() {
        assert_eq!(bare("${user.name}"), path(&["user", "name"]));
        assert_eq!(
            bare("${$.app.title}"),
            Expr::Path {
                absolute: true,
                segments: vec!["app".to_string(), "title".to_string()],
            }
        );
        // Numeric segments index arrays.
        assert_eq!(bare("${items.0.label}"), path(&["items", "0", "label"]));
    }

    #[test]
    fn test_literals() {
        assert_eq!(bare("${42}"), Expr::Literal(json!(42)));
        assert_eq!(bare("${2.5}"), Expr::Literal(json!(2.5)));
        assert_eq!(bare("${'hi'}"), Expr::Literal(json!("hi")));
        assert_eq!(bare("${\"hi\"}"), Expr::Literal(json!("hi")));
        assert_eq!(bare("${true}"), Expr::Literal(json!(true)));
        assert_eq!(bare("${null}"), Expr::Literal(Value::Null));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(bare(r"${'a\nb'}"), Expr::Literal(json!("a\nb")));
        assert_eq!(bare(r"${'it\'s'}"), Expr::Literal(json!("it's")));
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = bare("${a + b * 2}");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(path(&["a"])),
                rhs: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(path(&["b"])),
                    rhs: Box::new(Expr::Literal(json!(2))),
                }),
            }
        );
    }

    #[test]
    fn test_parens_and_unary() {
        let expr = bare("${(a + b) * -c}");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Mul,
                lhs: Box::new(Expr::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(path(&["a"])),
                    rhs: Box::new(path(&["b"])),
                }),
                rhs: Box::new(Expr::Neg(Box::new(path(&["c"])))),
            }
        );
    }

    #[test]
    fn test_resolver_call() {
        let expr = bare("${store.load('app', lang)}");
        assert_eq!(
            expr,
            Expr::Call {
                name: "store.load".to_string(),
                args: vec![Expr::Literal(json!("app")), path(&["lang"])],
            }
        );
    }

    #[test]
    fn test_builtin_calls() {
        assert_eq!(
            bare("${int(count)}"),
            Expr::Builtin {
                builtin: Builtin::Int,
                arg: Box::new(path(&["count"])),
            }
        );
        assert_eq!(
            bare("${fresh(rates.usd)}"),
            Expr::Builtin {
                builtin: Builtin::Fresh,
                arg: Box::new(path(&["rates", "usd"])),
            }
        );
    }

    #[test]
    fn test_builtin_arity_checked() {
        let err = parse_template("${int(a, b)}").unwrap_err();
        assert!(err.message.contains("exactly one argument"), "{err}");
        let err = parse_template("${bool()}").unwrap_err();
        assert!(err.message.contains("exactly one argument"), "{err}");
    }

    #[test]
    fn test_dotted_name_is_resolver_not_builtin() {
        // `util.int(...)` is a resolver call even though `int` is a builtin.
        let expr = bare("${util.int(a)}");
        assert!(matches!(expr, Expr::Call { ref name, .. } if name == "util.int"));
    }

    #[test]
    fn test_errors() {
        assert!(parse_template("${}").is_err());
        assert!(parse_template("${a").is_err());
        assert!(parse_template("${a b}").is_err());
        assert!(parse_template("${'open}").is_err());
        assert!(parse_template("${(a}").is_err());
        assert!(parse_template("${$.f(1)}").is_err());
        assert!(parse_template("${?}").is_err());
    }

    #[test]
    fn test_multiple_spans() {
        let tpl = parse_template("${a}-${b}").unwrap();
        assert_eq!(tpl.spans.len(), 3);
    }

    #[test]
    fn test_unicode_text_passes_through() {
        let tpl = parse_template("¡Hola, ${name}!").unwrap();
        assert_eq!(tpl.spans[0], Span::Text("¡Hola, ".to_string()));
    }
}
