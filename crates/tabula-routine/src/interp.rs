use crate::ast::{BinaryOp, Expr, Place, RoutineDef, Stmt, UnaryOp};
use crate::builtins;
use crate::error::RoutineError;
use crate::value::{Value, format_number, map_get, map_set, row_cells};
use std::cmp::Ordering;
use std::collections::HashMap;
use tabula_core::Table;

/// Upper bound on executed statements and loop iterations per invocation.
pub const MAX_STEPS: usize = 200_000;

/// Upper bound on the total [`Value::weight`] a single invocation may build.
pub const MAX_ALLOCATION: usize = 4 * 1024 * 1024;

type EvalResult<T> = std::result::Result<T, RoutineError>;

enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'t> {
    table: &'t Table,
    scopes: Vec<HashMap<String, Value>>,
    steps: usize,
    allocated: usize,
}

impl<'t> Interpreter<'t> {
    pub fn new(table: &'t Table) -> Self {
        Self {
            table,
            scopes: Vec::new(),
            steps: 0,
            allocated: 0,
        }
    }

    pub fn run(mut self, def: &RoutineDef, bindings: Vec<(String, Value)>) -> EvalResult<Value> {
        self.scopes.push(bindings.into_iter().collect());
        match self.exec_stmts(&def.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::None),
            Flow::Break => Err(RoutineError::StrayControl("break".to_string())),
            Flow::Continue => Err(RoutineError::StrayControl("continue".to_string())),
        }
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(RoutineError::StepLimit(MAX_STEPS));
        }
        Ok(())
    }

    fn charge(&mut self, units: usize) -> EvalResult<()> {
        self.allocated = self.allocated.saturating_add(units);
        if self.allocated > MAX_ALLOCATION {
            return Err(RoutineError::ResourceLimit(MAX_ALLOCATION));
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        self.scopes.push(HashMap::new());
        let flow = self.exec_stmts(stmts);
        self.scopes.pop();
        flow
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval(value)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Next)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Next)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.exec_block(then)
                } else {
                    self.exec_block(otherwise)
                }
            }
            Stmt::For { var, iter, body } => {
                let source = self.eval(iter)?;
                for item in self.iterate(source)? {
                    self.tick()?;
                    self.scopes.push(HashMap::from([(var.clone(), item)]));
                    let flow = self.exec_stmts(body);
                    self.scopes.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Next | Flow::Continue => {}
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Next)
            }
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| RoutineError::UnknownVariable(name.to_string()))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    /// Plain assignment to an undeclared name declares it in the current scope.
    fn assign(&mut self, target: &Place, value: Value) -> EvalResult<()> {
        let keys = target
            .indices
            .iter()
            .map(|expr| self.eval(expr))
            .collect::<EvalResult<Vec<_>>>()?;
        if keys.is_empty() {
            match self.lookup_mut(&target.name) {
                Some(slot) => *slot = value,
                None => {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(target.name.clone(), value);
                    }
                }
            }
            return Ok(());
        }
        let slot = self
            .lookup_mut(&target.name)
            .ok_or_else(|| RoutineError::UnknownVariable(target.name.clone()))?;
        assign_path(slot, &keys, value)
    }

    fn iterate(&self, source: Value) -> EvalResult<Vec<Value>> {
        match source {
            Value::List(items) => Ok(items),
            Value::Table => Ok((0..self.table.rows.len()).map(Value::Row).collect()),
            Value::Row(idx) => Ok(row_cells(self.table, idx)),
            Value::Map(entries) => Ok(entries.into_iter().map(|(k, _)| Value::Str(k)).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(RoutineError::type_error(format!(
                "cannot iterate over a {}",
                other.type_name()
            ))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item)?;
                    self.charge(value.weight())?;
                    out.push(value);
                }
                Ok(Value::List(out))
            }
            Expr::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    self.charge(key.len().saturating_add(value.weight()))?;
                    map_set(&mut out, key.clone(), value);
                }
                Ok(Value::Map(out))
            }
            Expr::Var(name) => self.lookup(name).cloned(),
            Expr::Field(target, name) => {
                let target = self.eval(target)?;
                self.field(target, name)
            }
            Expr::Index(target, key) => {
                let target = self.eval(target)?;
                let key = self.eval(key)?;
                self.index(target, key)
            }
            Expr::Call(name, args) => self.call(name, args),
            Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!self.eval(operand)?.truthy())),
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(RoutineError::type_error(format!(
                    "cannot negate a {}",
                    other.type_name()
                ))),
            },
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !self.eval(lhs)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if self.eval(lhs)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.truthy()))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                if *op == BinaryOp::Add {
                    self.charge(lhs.weight().saturating_add(rhs.weight()))?;
                }
                self.binary(*op, lhs, rhs)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> EvalResult<Value> {
        if matches!(name, "push" | "append") {
            let [Expr::Var(list_name), item] = args else {
                return Err(RoutineError::Arity {
                    name: name.to_string(),
                    expected: "a list variable and a value (2)".to_string(),
                    found: args.len(),
                });
            };
            let item = self.eval(item)?;
            self.charge(item.weight())?;
            let slot = self
                .lookup_mut(list_name)
                .ok_or_else(|| RoutineError::UnknownVariable(list_name.clone()))?;
            return match slot {
                Value::List(items) => {
                    items.push(item);
                    Ok(Value::None)
                }
                other => Err(RoutineError::type_error(format!(
                    "`{name}` expects a list, found {}",
                    other.type_name()
                ))),
            };
        }
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<EvalResult<Vec<_>>>()?;
        let result = builtins::call(name, values, self.table)?;
        self.charge(result.weight())?;
        Ok(result)
    }

    fn field(&self, target: Value, name: &str) -> EvalResult<Value> {
        match (&target, name) {
            (Value::Table, "title") => Ok(Value::Str(self.table.title.clone())),
            (Value::Table, "header") => Ok(Value::List(
                self.table.header.iter().cloned().map(Value::Str).collect(),
            )),
            (Value::Table, "rows") => Ok(Value::List(
                (0..self.table.rows.len()).map(Value::Row).collect(),
            )),
            (Value::Row(idx), "cells") => Ok(Value::List(row_cells(self.table, *idx))),
            (Value::Row(idx), "index") => Ok(Value::Number(*idx as f64)),
            (Value::Map(entries), key) => map_get(entries, key)
                .cloned()
                .ok_or_else(|| RoutineError::MissingKey(key.to_string())),
            _ => Err(RoutineError::type_error(format!(
                "a {} has no field `{name}`",
                target.type_name()
            ))),
        }
    }

    fn index(&self, target: Value, key: Value) -> EvalResult<Value> {
        match (target, key) {
            (Value::List(items), Value::Number(n)) => {
                let idx = resolve_index(n, items.len())?;
                Ok(items[idx].clone())
            }
            (Value::Str(s), Value::Number(n)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = resolve_index(n, chars.len())?;
                Ok(Value::Str(chars[idx].to_string()))
            }
            (Value::Map(entries), Value::Str(key)) => map_get(&entries, &key)
                .cloned()
                .ok_or(RoutineError::MissingKey(key)),
            (Value::Row(row), Value::Number(n)) => {
                let width = self
                    .table
                    .header
                    .len()
                    .max(self.table.rows.get(row).map_or(0, Vec::len));
                let col = resolve_index(n, width)?;
                Ok(Value::Str(self.table.cell(row, col).to_string()))
            }
            (Value::Row(row), Value::Str(name)) => {
                let col = self
                    .table
                    .column_index(&name)
                    .ok_or(RoutineError::UnknownColumn(name))?;
                Ok(Value::Str(self.table.cell(row, col).to_string()))
            }
            (Value::Table, Value::Number(n)) => {
                let idx = resolve_index(n, self.table.rows.len())?;
                Ok(Value::Row(idx))
            }
            (Value::Table, Value::Str(name)) => self.field(Value::Table, &name),
            (target, key) => Err(RoutineError::type_error(format!(
                "cannot index a {} with a {}",
                target.type_name(),
                key.type_name()
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&lhs, &rhs)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            BinaryOp::In => self.contains(&rhs, &lhs).map(Value::Bool),
            BinaryOp::NotIn => self.contains(&rhs, &lhs).map(|found| Value::Bool(!found)),
            BinaryOp::Add => match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Ok(Value::List(a))
                }
                (a, b) => Err(RoutineError::type_error(format!(
                    "cannot add {} and {}; convert with str() or number() first",
                    a.type_name(),
                    b.type_name()
                ))),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                    return Err(RoutineError::type_error(format!(
                        "arithmetic needs numbers, found {} and {}; use number() on cell text",
                        lhs.type_name(),
                        rhs.type_name()
                    )));
                };
                let (a, b) = (*a, *b);
                match op {
                    BinaryOp::Sub => Ok(Value::Number(a - b)),
                    BinaryOp::Mul => Ok(Value::Number(a * b)),
                    _ if b == 0.0 => Err(RoutineError::DivisionByZero),
                    BinaryOp::Div => Ok(Value::Number(a / b)),
                    _ => Ok(Value::Number(a % b)),
                }
            }
            BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
        }
    }

    fn contains(&self, haystack: &Value, needle: &Value) -> EvalResult<bool> {
        match (haystack, needle) {
            (Value::List(items), needle) => Ok(items.contains(needle)),
            (Value::Str(text), Value::Str(part)) => Ok(text.contains(part.as_str())),
            (Value::Map(entries), Value::Str(key)) => Ok(map_get(entries, key).is_some()),
            (Value::Row(idx), needle) => Ok(row_cells(self.table, *idx).contains(needle)),
            (Value::Table, Value::Str(column)) => Ok(self.table.column_index(column).is_some()),
            (haystack, needle) => Err(RoutineError::type_error(format!(
                "cannot test whether a {} is in a {}",
                needle.type_name(),
                haystack.type_name()
            ))),
        }
    }
}

/// Orders two numbers or two strings; anything else is a type error.
pub(crate) fn compare(lhs: &Value, rhs: &Value) -> EvalResult<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a.total_cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(RoutineError::type_error(format!(
            "cannot compare {} with {}; use number() on cell text",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Negative indices count from the end.
pub(crate) fn resolve_index(n: f64, len: usize) -> EvalResult<usize> {
    if n.fract() != 0.0 {
        return Err(RoutineError::type_error(format!(
            "index {} is not a whole number",
            format_number(n)
        )));
    }
    let raw = n as i64;
    let idx = if raw < 0 { raw + len as i64 } else { raw };
    if idx < 0 || idx >= len as i64 {
        return Err(RoutineError::IndexOutOfRange { index: raw, len });
    }
    Ok(idx as usize)
}

fn assign_path(slot: &mut Value, keys: &[Value], value: Value) -> EvalResult<()> {
    let Some((key, rest)) = keys.split_first() else {
        *slot = value;
        return Ok(());
    };
    match (slot, key) {
        (Value::List(items), Value::Number(n)) => {
            let idx = resolve_index(*n, items.len())?;
            assign_path(&mut items[idx], rest, value)
        }
        (Value::Map(entries), Value::Str(name)) => {
            if rest.is_empty() {
                map_set(entries, name.clone(), value);
                return Ok(());
            }
            let child = entries
                .iter_mut()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| RoutineError::MissingKey(name.clone()))?;
            assign_path(child, rest, value)
        }
        (slot, key) => Err(RoutineError::type_error(format!(
            "cannot assign into a {} with a {} key",
            slot.type_name(),
            key.type_name()
        ))),
    }
}
