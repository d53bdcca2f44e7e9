use std::io::{self, Write};

use serde::Serialize;

use crate::aggregate::{Aggregates, CollectionUpdate};
use crate::coordinator::ServeAction;
use crate::domain::Record;
use crate::refill::RefillReport;

#[derive(Debug, Serialize)]
pub struct GetOutput<'a> {
    pub action: ServeAction,
    pub generation: u64,
    pub total: usize,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub records: &'a [Record],
}

#[derive(Debug, Serialize)]
pub struct FilterOutput<'a> {
    pub matched: usize,
    pub records: Vec<&'a Record>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_get(result: &GetOutput<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_filter(result: &FilterOutput<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &Aggregates) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(result: &RefillReport) -> io::Result<()> {
        Self::print_json(result)
    }

    /// One compact line per update so the stream can be piped.
    pub fn print_update(update: &CollectionUpdate) -> io::Result<()> {
        let json = serde_json::to_string(update).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
