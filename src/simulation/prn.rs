//! Reader for the simulator's columnar `.prn` result files.

use crate::core::SimulationError;
use indexmap::IndexMap;

/// Parse a `.prn` table into upper-cased column name -> values.
///
/// Accepts comma or whitespace delimiters. Reading stops at the `End of Xyce` footer.
pub fn parse_prn(text: &str) -> Result<IndexMap<String, Vec<f64>>, SimulationError> {
    let fail = |msg: String| SimulationError::OutputParseFailure(msg);
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| fail("result file is empty".into()))?;
    let names: Vec<String> = split_fields(header)
        .map(|f| f.to_ascii_uppercase())
        .collect();
    if names.len() < 2 {
        return Err(fail(format!("unexpected header '{}'", header)));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    for (row, line) in lines.enumerate() {
        if line.to_ascii_lowercase().starts_with("end of") {
            break;
        }
        let fields: Vec<&str> = split_fields(line).collect();
        if fields.len() != names.len() {
            return Err(fail(format!(
                "row {} has {} fields, header has {}",
                row + 1,
                fields.len(),
                names.len()
            )));
        }
        for (column, field) in columns.iter_mut().zip(&fields) {
            let value = field
                .parse::<f64>()
                .map_err(|_| fail(format!("row {}: '{}' is not a number", row + 1, field)))?;
            column.push(value);
        }
    }

    if columns[0].is_empty() {
        return Err(fail("result file has no data rows".into()));
    }

    Ok(names.into_iter().zip(columns).collect())
}

/// Fields split on commas or whitespace, keeping `V(2,3)`-style names whole.
fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    let mut depth = 0i32;
    line.split(move |c: char| {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        depth == 0 && (c == ',' || c.is_whitespace())
    })
    .map(str::trim)
    .filter(|f| !f.is_empty())
}

/// Column lookup ignoring case and whitespace.
pub fn column<'a>(table: &'a IndexMap<String, Vec<f64>>, name: &str) -> Option<&'a [f64]> {
    let wanted: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    table.get(&wanted).map(Vec::as_slice)
}
