//! # Interactive Shell
//!
//! Reads statements until a `;` terminator, runs each against a shared
//! session, and prints the result array. `exit` quits; Ctrl-D ends input.

use std::rc::Rc;
use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::config::Config;
use crate::database::Database;
use crate::functions::Registry;
use crate::loader::HttpLoader;
use crate::pipeline::Runner;
use crate::value::{Record, Value};

/// Interactive command line over one shared session catalog.
pub struct Repl {
    config: Config,
    db: Rc<Database>,
    funcs: Rc<Registry>,
    loader: Rc<HttpLoader>,
}

impl Repl {
    pub fn new(config: Config) -> Self {
        let loader = Rc::new(HttpLoader::new(Duration::from_secs(
            config.loader.timeout_secs,
        )));
        Repl {
            config,
            db: Rc::new(Database::new()),
            funcs: Rc::new(Registry::with_builtins()),
            loader,
        }
    }

    /// Run one statement against the shared session and return its rows.
    pub fn execute(&self, statement: &str) -> crate::error::Result<Vec<Record>> {
        let mut runner = Runner::with_parts(
            statement,
            Rc::clone(&self.db),
            Rc::clone(&self.funcs),
            Rc::clone(&self.loader) as Rc<dyn crate::loader::RecordLoader>,
        )?;
        runner.run()?;
        Ok(runner.results().to_vec())
    }

    /// The interactive loop. Statements may span lines; a trailing `;`
    /// submits.
    pub fn run_loop(&self) -> anyhow::Result<()> {
        println!("Welcome to FlowQuery! Type \"exit\" to quit.");
        println!("End statements with \";\" to execute. Multi-line input supported.");

        let mut editor = DefaultEditor::new()?;
        'outer: loop {
            let mut lines: Vec<String> = Vec::new();
            let statement = loop {
                let prompt = if lines.is_empty() {
                    &self.config.repl.prompt
                } else {
                    &self.config.repl.continuation_prompt
                };
                match editor.readline(prompt) {
                    Ok(line) => {
                        if line.trim() == "exit" {
                            break 'outer;
                        }
                        lines.push(line);
                        let combined = lines.join("\n");
                        if combined.trim_end().ends_with(';') {
                            break combined;
                        }
                    }
                    Err(ReadlineError::Interrupted) => continue 'outer,
                    Err(ReadlineError::Eof) => break 'outer,
                    Err(e) => return Err(e.into()),
                }
            };

            let statement = statement.trim().trim_end_matches(';');
            if statement.is_empty() {
                continue;
            }
            let _ = editor.add_history_entry(statement);

            match self.execute(statement) {
                Ok(rows) => println!("{}", format_results(&rows)),
                Err(e) => println!("Error: {e}"),
            }
        }

        println!("Exiting FlowQuery.");
        Ok(())
    }
}

/// Render a result set as a JSON array, one record per line.
pub fn format_results(rows: &[Record]) -> String {
    let mut out = String::from("[");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("\n  ");
        out.push_str(&Value::Map(row.clone()).to_json().to_string());
    }
    if !rows.is_empty() {
        out.push('\n');
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results() {
        let mut row = Record::new();
        row.insert("x".to_string(), Value::Int(1));
        let rendered = format_results(&[row]);
        assert_eq!(rendered, "[\n  {\"x\":1}\n]");
        assert_eq!(format_results(&[]), "[]");
    }

    #[test]
    fn test_execute_shares_session() {
        let repl = Repl::new(Config::default());
        repl.execute(
            "CREATE VIRTUAL (:ReplPerson) AS { UNWIND [{id: 1}] AS r RETURN r.id AS id }",
        )
        .unwrap();
        let rows = repl.execute("MATCH (p:ReplPerson) RETURN p.id AS id").unwrap();
        assert_eq!(rows.len(), 1);
    }
}
