/// Render an aligned plain-text table. Cells wider than their share of
/// `max_width` are truncated with `…`.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>], max_width: Option<usize>) -> String {
    let mut widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            rows.iter()
                .filter_map(|row| row.get(index))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
                .max(header.chars().count())
        })
        .collect();

    if let Some(max_width) = max_width {
        shrink_widest(&mut widths, max_width);
    }

    let header_line = join_cells(headers.iter().copied(), &widths);
    let divider = "-".repeat(header_line.chars().count());
    let mut lines = vec![header_line, divider];
    for row in rows {
        let cells = (0..headers.len()).map(|i| row.get(i).map_or("-", String::as_str));
        lines.push(join_cells(cells, &widths));
    }
    lines.join("\n")
}

fn join_cells<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| format!("{:<width$}", truncate(cell, width)))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

/// Narrow the widest column until the table fits, keeping every column at
/// least 6 characters wide.
fn shrink_widest(widths: &mut [usize], max_width: usize) {
    let separators = widths.len().saturating_sub(1) * 2;
    loop {
        let total: usize = widths.iter().sum::<usize>() + separators;
        if total <= max_width {
            return;
        }
        let Some((index, widest)) = widths
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(_, width)| *width)
        else {
            return;
        };
        if widest <= 6 {
            return;
        }
        widths[index] = (widest - (total - max_width)).max(6);
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{kept}…")
}
