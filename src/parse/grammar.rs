use winnow::ascii::{digit1, till_line_ending, Caseless};
use winnow::combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_until, take_while};

use crate::types::{AssignOp, BinaryOp, Expr, Rule, Statement, UnaryOp, Value};

use super::parser::ParsedRules;

const RESERVED: [&str; 7] = ["rule", "when", "then", "salience", "true", "false", "nil"];

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_whitespace()).void(),
            ("//", till_line_ending).void(),
            ("/*", take_until(0.., "*/"), "*/").void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A case-insensitive keyword not followed by an identifier character.
fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<winnow::error::ContextError>> {
    terminated(Caseless(word), not(one_of(is_ident_char)))
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .verify(|name: &str| !RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(name)))
        .parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(expected("closing quote"))
            .parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => s.push(cut_err(escape).parse_next(input)?),
            c => s.push(c),
        }
    }
}

fn escape(input: &mut &str) -> ModalResult<char> {
    alt((
        '"'.value('"'),
        '\\'.value('\\'),
        '\''.value('\''),
        'n'.value('\n'),
        't'.value('\t'),
        'r'.value('\r'),
        '0'.value('\0'),
        delimited(
            "u{",
            take_while(1..=6, |c: char| c.is_ascii_hexdigit()),
            '}',
        )
        .verify_map(|hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)),
    ))
    .context(expected("escape sequence"))
    .parse_next(input)
}

/// Integer or float text with an optional leading minus.
fn number(input: &mut &str) -> ModalResult<Value> {
    let text = (
        opt('-'),
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        let f: f64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Float(f))
    } else {
        let i: i64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Int(i))
    }
}

fn array_literal(input: &mut &str) -> ModalResult<Value> {
    let items: Vec<Value> = preceded(
        '[',
        cut_err(terminated(
            separated(0.., preceded(ws, literal), (ws, ',')),
            (ws, ']'),
        )),
    )
    .parse_next(input)?;
    Ok(Value::Array(items))
}

fn literal(input: &mut &str) -> ModalResult<Value> {
    alt((
        string_literal.map(Value::String),
        keyword("true").value(Value::Bool(true)),
        keyword("false").value(Value::Bool(false)),
        keyword("nil").value(Value::Nil),
        number,
        array_literal,
    ))
    .parse_next(input)
}

// -- Operators --------------------------------------------------------------

fn or_op(input: &mut &str) -> ModalResult<BinaryOp> {
    "||".value(BinaryOp::Or).parse_next(input)
}

fn and_op(input: &mut &str) -> ModalResult<BinaryOp> {
    "&&".value(BinaryOp::And).parse_next(input)
}

fn compare_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        ">=".value(BinaryOp::Gte),
        ">".value(BinaryOp::Gt),
        "<=".value(BinaryOp::Lte),
        "<".value(BinaryOp::Lt),
        "==".value(BinaryOp::Eq),
        "!=".value(BinaryOp::Neq),
    ))
    .parse_next(input)
}

fn additive_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        terminated('+', not('=')).value(BinaryOp::Add),
        terminated('-', not('=')).value(BinaryOp::Sub),
        terminated('|', not(one_of(['|', '=']))).value(BinaryOp::BitOr),
    ))
    .parse_next(input)
}

fn multiplicative_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        terminated('*', not('=')).value(BinaryOp::Mul),
        terminated('/', not('=')).value(BinaryOp::Div),
        '%'.value(BinaryOp::Mod),
        terminated('&', not(one_of(['&', '=']))).value(BinaryOp::BitAnd),
    ))
    .parse_next(input)
}

fn assign_op(input: &mut &str) -> ModalResult<AssignOp> {
    alt((
        "+=".value(AssignOp::Add),
        "-=".value(AssignOp::Sub),
        "*=".value(AssignOp::Mul),
        "/=".value(AssignOp::Div),
        terminated('=', not('=')).value(AssignOp::Set),
    ))
    .parse_next(input)
}

// -- Expressions (precedence: || < && < comparison < + - | < * / % &) -----

fn arguments(input: &mut &str) -> ModalResult<Vec<Expr>> {
    cut_err(terminated(separated(0.., expr, (ws, ',')), (ws, ')')))
        .context(expected("argument list"))
        .parse_next(input)
}

fn call_or_variable(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('(').parse_next(input)?.is_some() {
        let args = arguments(input)?;
        Ok(Expr::Call(name.to_owned(), args))
    } else {
        input.reset(&checkpoint);
        Ok(Expr::Variable(name.to_owned()))
    }
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', cut_err(expr), (ws, cut_err(')'))),
        literal.map(Expr::Constant),
        call_or_variable,
    ))
    .context(expected("expression"))
    .parse_next(input)
}

/// Member access, method calls and indexing, applied left to right.
fn postfix_tail(input: &mut &str, mut base: Expr) -> ModalResult<Expr> {
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let name = cut_err(ident)
                .context(expected("member name"))
                .parse_next(input)?;
            let after_name = input.checkpoint();
            ws.parse_next(input)?;
            base = if opt('(').parse_next(input)?.is_some() {
                let args = arguments(input)?;
                Expr::MethodCall(Box::new(base), name.to_owned(), args)
            } else {
                input.reset(&after_name);
                Expr::Field(Box::new(base), name.to_owned())
            };
        } else if opt('[').parse_next(input)?.is_some() {
            let selector = cut_err(expr).parse_next(input)?;
            (ws, cut_err(']')).parse_next(input)?;
            base = Expr::Index(Box::new(base), Box::new(selector));
        } else {
            input.reset(&checkpoint);
            return Ok(base);
        }
    }
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt('!').parse_next(input)?.is_some() {
        let operand = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
    }
    if let Some(value) = opt(number).parse_next(input)? {
        return postfix_tail(input, Expr::Constant(value));
    }
    if opt('-').parse_next(input)?.is_some() {
        let operand = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
    }
    let base = primary(input)?;
    postfix_tail(input, base)
}

fn fold(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |acc, (op, r)| {
        Expr::Binary(op, Box::new(acc), Box::new(r))
    })
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest = repeat(0.., (preceded(ws, multiplicative_op), cut_err(unary))).parse_next(input)?;
    Ok(fold(first, rest))
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative(input)?;
    let rest = repeat(0.., (preceded(ws, additive_op), cut_err(multiplicative))).parse_next(input)?;
    Ok(fold(first, rest))
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let first = additive(input)?;
    let rest = repeat(0.., (preceded(ws, compare_op), cut_err(additive))).parse_next(input)?;
    Ok(fold(first, rest))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = comparison(input)?;
    let rest = repeat(0.., (preceded(ws, and_op), cut_err(comparison))).parse_next(input)?;
    Ok(fold(first, rest))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest = repeat(0.., (preceded(ws, or_op), cut_err(and_expr))).parse_next(input)?;
    Ok(fold(first, rest))
}

pub(super) fn expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    or_expr(input)
}

// -- Statements -------------------------------------------------------------

fn statement_body(input: &mut &str) -> ModalResult<Statement> {
    let target = expr(input)?;
    ws.parse_next(input)?;
    let statement = match opt(assign_op).parse_next(input)? {
        Some(op) => {
            let value = cut_err(expr)
                .context(expected("assigned value"))
                .parse_next(input)?;
            Statement::Assign { target, op, value }
        }
        None => Statement::Call(target),
    };
    Ok(statement)
}

/// A statement and the text it was written as.
fn statement(input: &mut &str) -> ModalResult<(Statement, String)> {
    ws.parse_next(input)?;
    let (statement, text) = statement_body.with_taken().parse_next(input)?;
    (ws, cut_err(';'))
        .context(expected("';'"))
        .parse_next(input)?;
    Ok((statement, text.trim().to_owned()))
}

// -- Rule definitions -------------------------------------------------------

fn salience_clause(input: &mut &str) -> ModalResult<i32> {
    let text = preceded(
        (keyword("salience"), ws),
        cut_err((opt('-'), digit1).take()).context(expected("salience value")),
    )
    .parse_next(input)?;
    text.parse::<i32>()
        .map_err(|_| ErrMode::from_input(input).cut())
}

fn rule_def(input: &mut &str) -> ModalResult<Rule> {
    ws.parse_next(input)?;
    keyword("rule").parse_next(input)?;
    ws.parse_next(input)?;

    let name = cut_err(ident)
        .context(expected("rule name"))
        .parse_next(input)?;
    ws.parse_next(input)?;
    let description = opt(string_literal).parse_next(input)?;
    ws.parse_next(input)?;
    let salience = opt(salience_clause).parse_next(input)?;

    (ws, cut_err('{'))
        .context(expected("'{'"))
        .parse_next(input)?;
    (ws, cut_err(keyword("when")))
        .context(expected("when"))
        .parse_next(input)?;
    let (condition, condition_text) = cut_err(expr.with_taken())
        .context(expected("condition"))
        .parse_next(input)?;
    (ws, cut_err(keyword("then")))
        .context(expected("then"))
        .parse_next(input)?;
    let statements: Vec<(Statement, String)> = repeat(0.., statement).parse_next(input)?;
    let (actions, action_texts): (Vec<Statement>, Vec<String>) = statements.into_iter().unzip();
    (ws, cut_err('}'))
        .context(expected("'}'"))
        .parse_next(input)?;

    Ok(Rule {
        name: name.to_owned(),
        description: description.unwrap_or_default(),
        salience: salience.unwrap_or(0),
        condition: Some(condition),
        actions,
        condition_text: Some(condition_text.trim().to_owned()),
        action_texts,
    })
}

// -- Top-level parser -------------------------------------------------------

pub(super) fn rules(input: &mut &str) -> ModalResult<ParsedRules> {
    let rules: Vec<Rule> = repeat(0.., rule_def).parse_next(input)?;
    ws.parse_next(input)?;
    Ok(ParsedRules { rules })
}

pub(super) fn standalone_expr(input: &mut &str) -> ModalResult<Expr> {
    let e = expr(input)?;
    ws.parse_next(input)?;
    Ok(e)
}
