/// Plain-text table printed on the console.
pub struct Table {
    title: String,
    widths: Vec<usize>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(title: &str, columns: &[(&str, usize)]) -> Self {
        Table {
            title: title.to_string(),
            widths: columns.iter().map(|(_, width)| *width).collect(),
            header: columns.iter().map(|(name, _)| name.to_string()).collect(),
            rows: vec![],
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn line(&self, cells: &[String]) -> String {
        let cells: Vec<String> = cells
            .iter()
            .zip(&self.widths)
            .map(|(cell, width)| format!("{:<width$}", truncate(cell, *width), width = width))
            .collect();
        format!("\r {}", cells.join(" | ").trim_end())
    }

    /// Lines start with `\r` so the table renders while the terminal is in raw mode.
    pub fn render(&self) -> String {
        let total = self.widths.iter().sum::<usize>() + 3 * self.widths.len().saturating_sub(1) + 2;
        let mut lines = vec![format!("\r\t{}", self.title), self.line(&self.header)];
        lines.push(format!("\r{}", "-".repeat(total)));
        lines.extend(self.rows.iter().map(|row| self.line(row)));
        lines.join("\n")
    }
}

/// Cuts `text` to at most `width` characters, marking the cut with `...`.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
