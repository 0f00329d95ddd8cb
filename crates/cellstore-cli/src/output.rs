use console::style;
use serde::Serialize;
use std::fmt::Display;
use tabled::{settings::Style, Table, Tabled};

/// Output format mode
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Human
            },
        }
    }

    pub fn success(&self, message: impl Display) {
        self.status(Status::Success, message);
    }

    pub fn info(&self, message: impl Display) {
        self.status(Status::Info, message);
    }

    pub fn warning(&self, message: impl Display) {
        self.status(Status::Warning, message);
    }

    pub fn error(&self, message: impl Display) {
        self.status(Status::Error, message);
    }

    /// In JSON mode stdout only carries the result document; status goes
    /// to stderr.
    fn status(&self, status: Status, message: impl Display) {
        match self.format {
            OutputFormat::Human => {
                let glyph = match status {
                    Status::Success => style("✓").green().bold(),
                    Status::Info => style("ℹ").blue().bold(),
                    Status::Warning => style("⚠").yellow().bold(),
                    Status::Error => style("✗").red().bold(),
                };
                match status {
                    Status::Success | Status::Info => println!("{} {}", glyph, message),
                    Status::Warning | Status::Error => eprintln!("{} {}", glyph, message),
                }
            }
            OutputFormat::Json => {
                let value = serde_json::json!({
                    "status": status.label(),
                    "message": message.to_string(),
                });
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                );
            }
        }
    }

    /// Rows as a table, or as a JSON array
    pub fn table<T: Tabled + Serialize>(&self, data: Vec<T>) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Human => {
                if data.is_empty() {
                    println!("{}", style("(no data)").dim());
                } else {
                    let mut table = Table::new(data);
                    table.with(Style::rounded());
                    println!("{}", table);
                }
            }
            OutputFormat::Json => self.result(data)?,
        }
        Ok(())
    }

    /// Raw JSON regardless of format
    pub fn data<T: Serialize>(&self, data: &T) -> anyhow::Result<()> {
        let json_str = serde_json::to_string_pretty(data)?;
        println!("{}", json_str);
        Ok(())
    }

    pub fn result<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Human => {
                self.data(&data)?;
            }
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "status": "success",
                    "data": data,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }

    pub fn kv(&self, key: impl Display, value: impl Display) {
        if let OutputFormat::Human = self.format {
            println!("{}: {}", style(key).bold(), value);
        }
    }

    pub fn section(&self, title: impl Display) {
        if let OutputFormat::Human = self.format {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

#[derive(Debug, Clone, Copy)]
enum Status {
    Success,
    Info,
    Warning,
    Error,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Info => "info",
            Status::Warning => "warning",
            Status::Error => "error",
        }
    }
}
