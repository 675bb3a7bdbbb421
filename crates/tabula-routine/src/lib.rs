//! A small, table-scoped routine language.
//!
//! A routine is a single definition whose parameter list names the table
//! plus the entities it needs resolved from the question:
//!
//! ```text
//! routine get_driver_details(table, car_number) {
//!     for row in table.rows {
//!         if row["No."] == car_number {
//!             return {"Driver": row["Driver"], "Team": row["Team"]};
//!         }
//!     }
//!     return none;
//! }
//! ```
//!
//! Source is parsed strictly (anything other than exactly one definition is
//! a [`RoutineError::Parse`]) and interpreted over a borrowed [`Table`]; it is
//! never compiled or run as host code.

mod ast;
mod builtins;
mod error;
mod interp;
mod parser;
mod value;

pub use error::RoutineError;
pub use interp::{MAX_ALLOCATION, MAX_STEPS};
pub use value::Value;

use ast::RoutineDef;
use interp::Interpreter;
use tabula_core::{TABLE_PARAM, Table};

/// Documentation for the routine-generation prompt; kept next to the
/// interpreter so the two cannot drift apart.
pub const LANGUAGE_GUIDE: &str = r#"Routine language reference:
- Exactly one definition: routine <name>(table, <param>, ...) { <statements> }
- Statements: let x = <expr>;  x = <expr>;  x[<key>] = <expr>;  if <expr> { } else if <expr> { } else { }
  for <var> in <expr> { }  break;  continue;  return <expr>;  return none;
- Values: "text" or 'text', numbers, true, false, none, [lists], {"key": value} maps.
- Operators: + - * / %  == != < <= > >=  and or not  in  not in
- Table access: table.title, table.header, table.rows; a row is indexed by column name (row["Team"]) or position (row[2]).
  Cells are strings: use number(row["Laps"]) before arithmetic or numeric comparison.
- Functions: len, str, number, int, abs, round, lower, upper, trim, contains, starts_with, ends_with, replace,
  split, join, range, push(list_var, item), column(table, "Col"), filter(table, "Col", value),
  select(rows_or_row, ["Col", ...]), record(row), get(container, key, default), keys, values,
  sum, avg, min, max, count, unique, reverse, sort(list, descending), sort_by(rows, "Col", descending)
- Return a string, a map, or a list of maps. Return none when nothing relevant is found. There is no print."#;

/// A parsed routine: name, declared parameters, and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    def: RoutineDef,
}

impl Routine {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// All parameters in declaration order, `table` included.
    pub fn params(&self) -> &[String] {
        &self.def.params
    }

    /// Parameters other than `table`, in declaration order.
    pub fn extra_params(&self) -> Vec<&str> {
        self.def
            .params
            .iter()
            .map(String::as_str)
            .filter(|p| *p != TABLE_PARAM)
            .collect()
    }

    pub fn signature(&self) -> String {
        format!("{}({})", self.def.name, self.def.params.join(", "))
    }

    /// Runs the routine. `args` bind the extra parameters in declared order.
    ///
    /// Returns `Ok(None)` when the routine returns `none`; strings come back
    /// verbatim and every other value as compact JSON.
    pub fn invoke(&self, table: &Table, args: &[String]) -> Result<Option<String>, RoutineError> {
        let extras = self.extra_params();
        if extras.len() != args.len() {
            return Err(RoutineError::Arity {
                name: self.def.name.clone(),
                expected: extras.len().to_string(),
                found: args.len(),
            });
        }
        let mut bindings = vec![(TABLE_PARAM.to_string(), Value::Table)];
        bindings.extend(
            extras
                .iter()
                .zip(args)
                .map(|(name, arg)| (name.to_string(), Value::Str(arg.clone()))),
        );
        let value = Interpreter::new(table).run(&self.def, bindings)?;
        Ok(render_result(&value, table))
    }
}

fn render_result(value: &Value, table: &Table) -> Option<String> {
    match value {
        Value::None => None,
        Value::Str(s) => Some(s.clone()),
        other => Some(other.to_json(table).to_string()),
    }
}

/// Parses routine source; requires a `table` parameter and unique names.
pub fn parse_routine(source: &str) -> Result<Routine, RoutineError> {
    let def = parser::parse_definition(source)?;
    if !def.params.iter().any(|p| p == TABLE_PARAM) {
        return Err(RoutineError::MissingTable(def.name));
    }
    for (idx, param) in def.params.iter().enumerate() {
        if def.params[..idx].contains(param) {
            return Err(RoutineError::DuplicateParameter(param.clone()));
        }
    }
    Ok(Routine { def })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nascar() -> Table {
        Table::new(
            "2008 NASCAR Craftsman Truck Series",
            ["Rank", "No.", "Driver", "Team", "Laps", "Status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vec![
                ["1", "23", "Johnny Benson", "Bill Davis Racing", "200", "Running"],
                ["2", "33", "Ron Hornaday Jr.", "Kevin Harvick Inc.", "200", "Running"],
                ["3", "5", "Mike Skinner", "Bill Davis Racing", "187", "Accident"],
            ]
            .iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect(),
        )
    }

    #[test]
    fn winner_details_as_json_map() {
        let routine = parse_routine(
            r#"routine get_winner(table) {
                for row in table.rows {
                    if row["Rank"] == "1" {
                        return {"Driver": row["Driver"], "Team": row["Team"]};
                    }
                }
                return none;
            }"#,
        )
        .expect("parse");
        assert!(routine.extra_params().is_empty());
        let out = routine.invoke(&nascar(), &[]).expect("run");
        assert_eq!(
            out.as_deref(),
            Some(r#"{"Driver":"Johnny Benson","Team":"Bill Davis Racing"}"#)
        );
    }

    #[test]
    fn extra_params_bind_in_declared_order() {
        let routine = parse_routine(
            r#"routine lookup(car, table, field) {
                let hits = filter(table, "No.", car);
                if len(hits) == 0 { return none; }
                return hits[0][field];
            }"#,
        )
        .expect("parse");
        assert_eq!(routine.extra_params(), vec!["car", "field"]);
        assert_eq!(routine.signature(), "lookup(car, table, field)");
        let out = routine
            .invoke(&nascar(), &["33".to_string(), "Team".to_string()])
            .expect("run");
        assert_eq!(out.as_deref(), Some("Kevin Harvick Inc."));
        assert_eq!(
            routine.invoke(&nascar(), &["99".to_string(), "Team".to_string()]),
            Ok(None)
        );
    }

    #[test]
    fn aggregation_and_list_building() {
        let routine = parse_routine(
            r#"routine bill_davis(table) {
                let names = [];
                let laps = 0;
                for row in filter(table, "Team", "bill davis racing") {
                    push(names, row["Driver"]);
                    laps = laps + number(row["Laps"]);
                }
                return {"Drivers": names, "Total laps": laps};
            }"#,
        )
        .expect("parse");
        let out = routine.invoke(&nascar(), &[]).expect("run");
        assert_eq!(
            out.as_deref(),
            Some(r#"{"Drivers":["Johnny Benson","Mike Skinner"],"Total laps":387}"#)
        );
    }

    #[test]
    fn unknown_column_is_a_runtime_fault() {
        let routine =
            parse_routine(r#"routine r(table) { return table.rows[0]["Car"]; }"#).expect("parse");
        assert_eq!(
            routine.invoke(&nascar(), &[]),
            Err(RoutineError::UnknownColumn("Car".to_string()))
        );
    }

    #[test]
    fn string_arithmetic_reports_a_type_error() {
        let routine =
            parse_routine(r#"routine r(table) { return table.rows[0]["Laps"] + 1; }"#).expect("parse");
        let err = routine.invoke(&nascar(), &[]).expect_err("type error");
        assert!(matches!(err, RoutineError::Type(_)));
        assert!(err.to_string().contains("number()"));
    }

    #[test]
    fn signature_rules() {
        assert!(matches!(
            parse_routine("routine r(data) { return 1; }"),
            Err(RoutineError::MissingTable(name)) if name == "r"
        ));
        assert!(matches!(
            parse_routine("routine r(table, x, x) { return 1; }"),
            Err(RoutineError::DuplicateParameter(name)) if name == "x"
        ));
        assert!(parse_routine("def f(table):\n    return None").is_err());
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let routine = parse_routine("routine r(table, who) { return who; }").expect("parse");
        assert!(matches!(
            routine.invoke(&nascar(), &[]),
            Err(RoutineError::Arity { found: 0, .. })
        ));
    }

    #[test]
    fn stray_break_and_runaway_loops_fail_cleanly() {
        let stray = parse_routine("routine r(table) { break; }").expect("parse");
        assert!(matches!(
            stray.invoke(&nascar(), &[]),
            Err(RoutineError::StrayControl(_))
        ));

        let runaway = parse_routine(
            "routine r(table) { let n = 0; for a in range(1000) { for b in range(1000) { n = n + 1; } } return n; }",
        )
        .expect("parse");
        assert_eq!(
            runaway.invoke(&nascar(), &[]),
            Err(RoutineError::StepLimit(MAX_STEPS))
        );
    }

    #[test]
    fn oversized_values_hit_the_memory_budget() {
        let huge_range =
            parse_routine("routine r(table) { return len(range(20000000)); }").expect("parse");
        assert_eq!(
            huge_range.invoke(&nascar(), &[]),
            Err(RoutineError::ResourceLimit(MAX_ALLOCATION))
        );

        let doubling = parse_routine(
            r#"routine r(table) {
                let s = "x";
                for i in range(40) { s = s + s; }
                return len(s);
            }"#,
        )
        .expect("parse");
        assert_eq!(
            doubling.invoke(&nascar(), &[]),
            Err(RoutineError::ResourceLimit(MAX_ALLOCATION))
        );

        let growing_list = parse_routine(
            r#"routine r(table) {
                let rows = table.rows;
                for i in range(40) { rows = rows + rows; }
                return len(rows);
            }"#,
        )
        .expect("parse");
        assert_eq!(
            growing_list.invoke(&nascar(), &[]),
            Err(RoutineError::ResourceLimit(MAX_ALLOCATION))
        );

        let blowup = parse_routine(
            r#"routine r(table) { let big = join(range(1000), ","); return len(replace(big, "", big)); }"#,
        )
        .expect("parse");
        assert_eq!(
            blowup.invoke(&nascar(), &[]),
            Err(RoutineError::ResourceLimit(MAX_ALLOCATION))
        );
    }

    #[test]
    fn ordinary_string_building_stays_within_budget() {
        let routine = parse_routine(
            r#"routine r(table) {
                let names = "";
                for row in table.rows { names = names + row["Driver"] + "; "; }
                return names;
            }"#,
        )
        .expect("parse");
        assert_eq!(
            routine.invoke(&nascar(), &[]).expect("run").as_deref(),
            Some("Johnny Benson; Ron Hornaday Jr.; Mike Skinner; ")
        );
    }

    #[test]
    fn falling_off_the_end_returns_none() {
        let routine = parse_routine("routine r(table) { let x = 1; }").expect("parse");
        assert_eq!(routine.invoke(&nascar(), &[]), Ok(None));
    }
}
