use crate::ast::{BinaryOp, Expr, Place, RoutineDef, Stmt, UnaryOp};
use crate::error::RoutineError;
use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "routine.pest"] // relative to src
struct RoutineParser;

type ParseResult<T> = std::result::Result<T, RoutineError>;

/// Parses source that must contain exactly one routine definition.
pub fn parse_definition(source: &str) -> ParseResult<RoutineDef> {
    let mut pairs = RoutineParser::parse(Rule::program, source).map_err(from_pest)?;
    let program = pairs.next().ok_or_else(|| RoutineError::Parse {
        line: 1,
        column: 1,
        message: "empty routine source".to_string(),
    })?;
    let def = program
        .into_inner()
        .find(|p| p.as_rule() == Rule::routine_def)
        .ok_or_else(|| RoutineError::Parse {
            line: 1,
            column: 1,
            message: "expected a `routine name(table, ...) { ... }` definition".to_string(),
        })?;
    build_routine(def)
}

fn from_pest(err: pest::error::Error<Rule>) -> RoutineError {
    let err = err.renamed_rules(describe_rule);
    let (line, column) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    RoutineError::Parse {
        line,
        column,
        message: err.variant.message().into_owned(),
    }
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::ident => "identifier".to_string(),
        Rule::expr => "expression".to_string(),
        Rule::block => "`{`".to_string(),
        Rule::param_list => "parameter list".to_string(),
        Rule::kw_routine => "`routine`".to_string(),
        Rule::assign_op => "`=`".to_string(),
        Rule::cmp_op => "comparison operator".to_string(),
        Rule::add_op | Rule::mul_op => "operator".to_string(),
        Rule::let_stmt
        | Rule::return_stmt
        | Rule::if_stmt
        | Rule::for_stmt
        | Rule::break_stmt
        | Rule::continue_stmt
        | Rule::assign_stmt
        | Rule::expr_stmt => "statement".to_string(),
        other => format!("{other:?}"),
    }
}

fn error_at(pair: &Pair<Rule>, message: impl Into<String>) -> RoutineError {
    let (line, column) = pair.as_span().start_pos().line_col();
    RoutineError::Parse {
        line,
        column,
        message: message.into(),
    }
}

fn unexpected(pair: &Pair<Rule>) -> RoutineError {
    error_at(pair, format!("unexpected `{}`", pair.as_str().trim()))
}

fn is_structural_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_routine
            | Rule::kw_let
            | Rule::kw_return
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_and
            | Rule::kw_or
            | Rule::assign_op
    )
}

/// Inner pairs without the keyword tokens that only mark structure.
fn significant(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner()
        .filter(|p| !is_structural_keyword(p.as_rule()))
}

fn next_pair<'a>(
    parent: &Pair<'a, Rule>,
    inner: &mut impl Iterator<Item = Pair<'a, Rule>>,
    what: &str,
) -> ParseResult<Pair<'a, Rule>> {
    inner
        .next()
        .ok_or_else(|| error_at(parent, format!("missing {what}")))
}

fn build_routine(pair: Pair<Rule>) -> ParseResult<RoutineDef> {
    let parent = pair.clone();
    let mut inner = significant(pair);
    let name = next_pair(&parent, &mut inner, "routine name")?
        .as_str()
        .to_string();
    let mut params = Vec::new();
    let mut body = Vec::new();
    for part in inner {
        match part.as_rule() {
            Rule::param_list => {
                params = part.into_inner().map(|p| p.as_str().to_string()).collect();
            }
            Rule::block => body = build_block(part)?,
            _ => return Err(unexpected(&part)),
        }
    }
    Ok(RoutineDef { name, params, body })
}

fn build_block(pair: Pair<Rule>) -> ParseResult<Vec<Stmt>> {
    pair.into_inner().map(build_stmt).collect()
}

fn build_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let parent = pair.clone();
    match pair.as_rule() {
        Rule::let_stmt => {
            let mut inner = significant(pair);
            let name = next_pair(&parent, &mut inner, "variable name")?
                .as_str()
                .to_string();
            let value = build_expr(next_pair(&parent, &mut inner, "value")?)?;
            Ok(Stmt::Let { name, value })
        }
        Rule::return_stmt => {
            let value = significant(pair).next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::if_stmt => {
            let mut inner = significant(pair);
            let cond = build_expr(next_pair(&parent, &mut inner, "condition")?)?;
            let then = build_block(next_pair(&parent, &mut inner, "block")?)?;
            let otherwise = match inner.next() {
                Some(branch) if branch.as_rule() == Rule::if_stmt => vec![build_stmt(branch)?],
                Some(branch) => build_block(branch)?,
                None => Vec::new(),
            };
            Ok(Stmt::If {
                cond,
                then,
                otherwise,
            })
        }
        Rule::for_stmt => {
            let mut inner = significant(pair);
            let var = next_pair(&parent, &mut inner, "loop variable")?
                .as_str()
                .to_string();
            let iter = build_expr(next_pair(&parent, &mut inner, "loop source")?)?;
            let body = build_block(next_pair(&parent, &mut inner, "loop body")?)?;
            Ok(Stmt::For { var, iter, body })
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::assign_stmt => {
            let mut inner = significant(pair);
            let place = next_pair(&parent, &mut inner, "assignment target")?;
            let mut steps = place.into_inner();
            let name = steps
                .next()
                .map(|p| p.as_str().to_string())
                .ok_or_else(|| error_at(&parent, "missing assignment target"))?;
            let indices = steps
                .map(|step| {
                    let step_parent = step.clone();
                    let mut step_inner = step.into_inner();
                    build_expr(next_pair(&step_parent, &mut step_inner, "index")?)
                })
                .collect::<ParseResult<Vec<_>>>()?;
            let value = build_expr(next_pair(&parent, &mut inner, "value")?)?;
            Ok(Stmt::Assign {
                target: Place { name, indices },
                value,
            })
        }
        Rule::expr_stmt => {
            let mut inner = significant(pair);
            Ok(Stmt::Expr(build_expr(next_pair(
                &parent,
                &mut inner,
                "expression",
            )?)?))
        }
        _ => Err(unexpected(&pair)),
    }
}

fn binary_op(pair: &Pair<Rule>) -> ParseResult<BinaryOp> {
    let normalized = pair.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(match normalized.as_str() {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "in" => BinaryOp::In,
        "not in" => BinaryOp::NotIn,
        _ => return Err(unexpected(pair)),
    })
}

fn fold_logical(pair: Pair<Rule>, op: BinaryOp) -> ParseResult<Expr> {
    let parent = pair.clone();
    let mut operands = significant(pair).map(build_expr);
    let mut acc = operands
        .next()
        .ok_or_else(|| error_at(&parent, "missing operand"))??;
    for rhs in operands {
        acc = Expr::Binary(op, Box::new(acc), Box::new(rhs?));
    }
    Ok(acc)
}

fn fold_arithmetic(pair: Pair<Rule>) -> ParseResult<Expr> {
    let parent = pair.clone();
    let mut inner = pair.into_inner();
    let mut acc = build_expr(next_pair(&parent, &mut inner, "operand")?)?;
    while let Some(op) = inner.next() {
        let op = binary_op(&op)?;
        let rhs = build_expr(next_pair(&parent, &mut inner, "right operand")?)?;
        acc = Expr::Binary(op, Box::new(acc), Box::new(rhs));
    }
    Ok(acc)
}

fn build_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    let parent = pair.clone();
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            build_expr(next_pair(&parent, &mut inner, "expression")?)
        }
        Rule::or_expr => fold_logical(pair, BinaryOp::Or),
        Rule::and_expr => fold_logical(pair, BinaryOp::And),
        Rule::not_expr => {
            let mut inner = pair.into_inner();
            let first = next_pair(&parent, &mut inner, "expression")?;
            if first.as_rule() == Rule::kw_not {
                let operand = build_expr(next_pair(&parent, &mut inner, "operand of `not`")?)?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            } else {
                build_expr(first)
            }
        }
        Rule::comparison | Rule::additive | Rule::multiplicative => fold_arithmetic(pair),
        Rule::unary => {
            let mut negations = 0usize;
            let mut operand = None;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::neg_op => negations += 1,
                    _ => operand = Some(build_expr(part)?),
                }
            }
            let mut expr = operand.ok_or_else(|| error_at(&parent, "missing operand"))?;
            for _ in 0..negations {
                expr = Expr::Unary(UnaryOp::Neg, Box::new(expr));
            }
            Ok(expr)
        }
        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut expr = build_expr(next_pair(&parent, &mut inner, "value")?)?;
            for suffix in inner {
                let suffix_parent = suffix.clone();
                match suffix.as_rule() {
                    Rule::index => {
                        let mut idx = suffix.into_inner();
                        let key = build_expr(next_pair(&suffix_parent, &mut idx, "index")?)?;
                        expr = Expr::Index(Box::new(expr), Box::new(key));
                    }
                    Rule::field => {
                        let mut name = suffix.into_inner();
                        let field = next_pair(&suffix_parent, &mut name, "field name")?;
                        expr = Expr::Field(Box::new(expr), field.as_str().to_string());
                    }
                    _ => return Err(unexpected(&suffix)),
                }
            }
            Ok(expr)
        }
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| error_at(&parent, format!("invalid number `{}`", pair.as_str()))),
        Rule::string => {
            let body = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Str(unescape(body)))
        }
        Rule::kw_true => Ok(Expr::Bool(true)),
        Rule::kw_false => Ok(Expr::Bool(false)),
        Rule::kw_none => Ok(Expr::None),
        Rule::list => Ok(Expr::List(
            pair.into_inner().map(build_expr).collect::<ParseResult<_>>()?,
        )),
        Rule::map => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let entry_parent = entry.clone();
                let mut parts = entry.into_inner();
                let key = next_pair(&entry_parent, &mut parts, "map key")?;
                let key = match key.as_rule() {
                    Rule::string => unescape(key.into_inner().next().map(|p| p.as_str()).unwrap_or("")),
                    _ => key.as_str().to_string(),
                };
                let value = build_expr(next_pair(&entry_parent, &mut parts, "map value")?)?;
                entries.push((key, value));
            }
            Ok(Expr::Map(entries))
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next_pair(&parent, &mut inner, "function name")?
                .as_str()
                .to_string();
            let args = inner.map(build_expr).collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::Call(name, args))
        }
        Rule::ident => Ok(Expr::Var(pair.as_str().to_string())),
        _ => Err(unexpected(&pair)),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
