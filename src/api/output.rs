use std::io::Write;

use tabwriter::TabWriter;

#[cfg(feature = "color")]
use colored::Colorize;

use crate::{
    common::{
        data::{Diff, DiffResult, FieldDiff, HttpRequest},
        util::{abbreviate, title_case},
    },
    server::{near_miss::NearMiss, stub::StubMapping},
};

const MAX_VALUE_CHARS: usize = 80;

/// Renders the near misses of an unmatched request, e.g. as the body of the 404 response.
pub trait NearMissFormatter: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn format(&self, request: &HttpRequest, near_misses: &[NearMiss<StubMapping>]) -> String;
}

/// Human readable tables, one per near miss, followed by a line diff for every field that
/// carries one.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextNearMissFormatter;

impl NearMissFormatter for PlainTextNearMissFormatter {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn format(&self, request: &HttpRequest, near_misses: &[NearMiss<StubMapping>]) -> String {
        render_plain_text(request, near_misses)
            .unwrap_or_else(|err| format!("Request was not matched: {}\n", err))
    }
}

fn render_plain_text(
    request: &HttpRequest,
    near_misses: &[NearMiss<StubMapping>],
) -> std::io::Result<String> {
    let mut tw = TabWriter::new(vec![]);

    writeln!(tw, "Request was not matched")?;
    writeln!(tw, "{}", "=".repeat(23))?;
    writeln!(tw, "{}", request.summary())?;
    writeln!(tw)?;

    if near_misses.is_empty() {
        writeln!(tw, "No stubs are registered.")?;
    }

    for (idx, near_miss) in near_misses.iter().enumerate() {
        write_header(&mut tw, idx, near_miss)?;

        writeln!(tw, "Field\tOperator\tExpected\tActual\t")?;
        for row in &near_miss.diff {
            write_row(&mut tw, row)?;
        }

        for row in near_miss.diff.iter().filter(|d| !d.is_exact_match) {
            if let Some(diff) = &row.diff {
                writeln!(tw)?;
                writeln!(tw, "Diff ({}):", row.field)?;
                write_diff(&mut tw, diff)?;
            }
        }

        writeln!(tw)?;
    }

    tw.flush()?;
    let bytes = tw
        .into_inner()
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    Ok(remove_trailing_linebreak(String::from_utf8_lossy(&bytes).to_string()))
}

fn write_header<W: Write>(tw: &mut W, idx: usize, near_miss: &NearMiss<StubMapping>) -> std::io::Result<()> {
    let label = match &near_miss.stub.name {
        Some(name) => format!("{} ({})", name, near_miss.stub.id),
        None => near_miss.stub.id.to_string(),
    };

    writeln!(tw, "{}", "-".repeat(60))?;
    writeln!(
        tw,
        "{} : {} {} (distance {:.3})",
        idx + 1,
        title_case("closest stub"),
        label,
        near_miss.distance
    )?;
    writeln!(tw, "{}", "-".repeat(60))
}

fn write_row<W: Write>(tw: &mut W, row: &FieldDiff) -> std::io::Result<()> {
    let actual = row.actual.as_deref().unwrap_or("<absent>");
    let marker = if row.is_exact_match { "" } else { "<<<<< no match" };

    writeln!(
        tw,
        "{}\t[{}]\t{}\t{}\t{}",
        row.field,
        row.operator,
        single_line(&row.expected),
        single_line(actual),
        marker
    )
}

fn single_line(value: &str) -> String {
    abbreviate(&value.replace('\n', "\\n"), MAX_VALUE_CHARS)
}

fn write_diff<W: Write>(tw: &mut W, diff: &DiffResult) -> std::io::Result<()> {
    for change in &diff.differences {
        match change {
            Diff::Same(text) => writeln!(tw, "   | {}", text.trim_end())?,
            Diff::Add(text) => {
                #[cfg(feature = "color")]
                writeln!(tw, "+++| {}", text.trim_end().green())?;
                #[cfg(not(feature = "color"))]
                writeln!(tw, "+++| {}", text.trim_end())?;
            }
            Diff::Rem(text) => {
                #[cfg(feature = "color")]
                writeln!(tw, "---| {}", text.trim_end().red())?;
                #[cfg(not(feature = "color"))]
                writeln!(tw, "---| {}", text.trim_end())?;
            }
        }
    }

    Ok(())
}

fn remove_trailing_linebreak(mut s: String) -> String {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
    s.push('\n');
    s
}

/// The near misses as a JSON document, for clients that render them on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNearMissFormatter;

impl NearMissFormatter for JsonNearMissFormatter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn format(&self, request: &HttpRequest, near_misses: &[NearMiss<StubMapping>]) -> String {
        let document = serde_json::json!({
            "request": request,
            "nearMisses": near_misses,
        });

        document.to_string()
    }
}
