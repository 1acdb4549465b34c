use regex::Regex;
use std::sync::OnceLock;

/// Minimum number of cells for a line to count as a table row
const MIN_COLUMNS: usize = 2;

/// A table recovered from the layout of extracted page text
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Number of rows including the header
    pub fn row_count(&self) -> usize {
        self.rows.len() + 1
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Render with right-aligned columns, header first
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell.chars().count());
                }
            }
        }

        std::iter::once(&self.header)
            .chain(self.rows.iter())
            .map(|row| {
                row.iter()
                    .zip(widths.iter())
                    .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn cell_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"\t+| {2,}").expect("cell separator pattern is valid"))
}

/// Split a line into cells on tabs or runs of two or more spaces
fn split_cells(line: &str) -> Vec<String> {
    cell_separator()
        .split(line.trim())
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

/// Find tables in page text: runs of consecutive lines with the same number of cells
pub fn detect_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let cells = split_cells(line);

        let continues_block = cells.len() >= MIN_COLUMNS
            && block.first().map_or(true, |first| first.len() == cells.len());

        if continues_block {
            block.push(cells);
            continue;
        }

        flush_block(&mut block, &mut tables);
        if cells.len() >= MIN_COLUMNS {
            block.push(cells);
        }
    }
    flush_block(&mut block, &mut tables);

    tables
}

fn flush_block(block: &mut Vec<Vec<String>>, tables: &mut Vec<Table>) {
    if block.len() >= 2 {
        let mut rows = std::mem::take(block);
        let header = rows.remove(0);
        tables.push(Table { header, rows });
    }
    block.clear();
}
