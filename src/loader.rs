//! # Record Loaders
//!
//! `LOAD {JSON|CSV|TEXT} FROM <url> [POST <body>] [HEADERS <map>]` hands
//! the pipeline a sequence of records. The contract is format-agnostic:
//! given a URL and an optional POST body, yield records. The HTTP
//! implementation blocks at the fetch, the engine's only I/O suspension
//! point besides virtual-handle materialisation.

use std::time::Duration;

use tracing::debug;

use crate::ast::LoadFormat;
use crate::error::{Error, Result};
use crate::value::{Record, Value};

/// A source of records for LOAD operations.
pub trait RecordLoader {
    fn load(
        &self,
        format: LoadFormat,
        url: &str,
        post: Option<&Value>,
        headers: Option<&Value>,
    ) -> Result<Vec<Value>>;
}

/// Options for decoding CSV payloads. The first row is treated as the
/// header unless disabled; quoted fields may contain separators and
/// doubled quotes.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    pub has_header: bool,
    pub quote_char: char,
    pub trim_whitespace: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            has_header: true,
            quote_char: '"',
            trim_whitespace: true,
        }
    }
}

/// HTTP loader backed by a blocking client.
pub struct HttpLoader {
    client: reqwest::blocking::Client,
    csv_options: CsvOptions,
}

impl HttpLoader {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        HttpLoader {
            client,
            csv_options: CsvOptions::default(),
        }
    }

    pub fn with_csv_options(mut self, options: CsvOptions) -> Self {
        self.csv_options = options;
        self
    }

    fn fetch(
        &self,
        url: &str,
        post: Option<&Value>,
        headers: Option<&Value>,
    ) -> Result<String> {
        debug!(url, post = post.is_some(), "loading");
        let mut request = match post {
            Some(body) => self.client.post(url).json(&body.to_json()),
            None => self.client.get(url),
        };
        if let Some(Value::Map(map)) = headers {
            for (name, value) in map {
                request = request.header(name.as_str(), value.to_string());
            }
        }
        let response = request
            .send()
            .map_err(|e| Error::Load(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Load(format!("{url}: HTTP {status}")));
        }
        response
            .text()
            .map_err(|e| Error::Load(format!("{url}: {e}")))
    }
}

impl RecordLoader for HttpLoader {
    fn load(
        &self,
        format: LoadFormat,
        url: &str,
        post: Option<&Value>,
        headers: Option<&Value>,
    ) -> Result<Vec<Value>> {
        let body = self.fetch(url, post, headers)?;
        decode_payload(format, &body, &self.csv_options)
    }
}

/// Decode a fetched payload into records: a JSON array yields its
/// elements, any other JSON document is a single record; CSV yields one
/// map per data row; TEXT yields one string per line.
pub fn decode_payload(
    format: LoadFormat,
    body: &str,
    csv_options: &CsvOptions,
) -> Result<Vec<Value>> {
    match format {
        LoadFormat::Json => {
            let parsed: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| Error::Load(format!("invalid JSON payload: {e}")))?;
            Ok(match Value::from_json(&parsed) {
                Value::List(items) => items,
                single => vec![single],
            })
        }
        LoadFormat::Csv => decode_csv(body, csv_options),
        LoadFormat::Text => Ok(body
            .lines()
            .map(|line| Value::String(line.to_string()))
            .collect()),
    }
}

fn decode_csv(body: &str, options: &CsvOptions) -> Result<Vec<Value>> {
    let mut rows = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        rows.push(split_csv_line(line, options));
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let header: Vec<String> = if options.has_header {
        rows.remove(0)
    } else {
        (0..rows[0].len()).map(|i| format!("col{i}")).collect()
    };

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Record::new();
        for (i, column) in header.iter().enumerate() {
            let raw = row.get(i).cloned().unwrap_or_default();
            record.insert(column.clone(), parse_csv_field(&raw));
        }
        records.push(Value::Map(record));
    }
    Ok(records)
}

fn split_csv_line(line: &str, options: &CsvOptions) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == options.quote_char {
                // Doubled quote inside a quoted field is a literal quote.
                if chars.peek() == Some(&options.quote_char) {
                    chars.next();
                    field.push(options.quote_char);
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == options.quote_char {
            in_quotes = true;
        } else if c == options.delimiter {
            fields.push(finish_field(&mut field, options));
        } else {
            field.push(c);
        }
    }
    fields.push(finish_field(&mut field, options));
    fields
}

fn finish_field(field: &mut String, options: &CsvOptions) -> String {
    let out = if options.trim_whitespace {
        field.trim().to_string()
    } else {
        field.clone()
    };
    field.clear();
    out
}

/// Content-based typing for CSV fields: integers, floats and booleans are
/// recognised, everything else stays a string.
fn parse_csv_field(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
