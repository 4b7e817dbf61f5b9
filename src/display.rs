//! Terminal UI display using ratatui.

use crate::consumer::{ConsumerState, PlotBoard};
use crate::plots::{PlotSet, Series, SeriesColor};
use num_format::{Locale, ToFormattedString};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

/// Terminal colour for a palette entry
pub fn series_color(color: SeriesColor) -> Color {
    match color {
        SeriesColor::Blue => Color::Blue,
        SeriesColor::Green => Color::Green,
        SeriesColor::Silver => Color::Gray,
        SeriesColor::Pink => Color::LightMagenta,
        SeriesColor::LightBlue => Color::LightBlue,
        SeriesColor::Red => Color::Red,
        SeriesColor::DarkGray => Color::DarkGray,
        SeriesColor::LightGreen => Color::LightGreen,
    }
}

/// Thousands-separated count
pub fn format_count(n: u64) -> String {
    n.to_formatted_string(&Locale::en)
}

/// Short label for an axis or readout value
pub fn format_value(v: f64) -> String {
    let magnitude = v.abs();
    if magnitude != 0.0 && (magnitude >= 1e6 || magnitude < 1e-3) {
        format!("{:.3e}", v)
    } else if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}

pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 2 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 2).collect();
        format!("{}..", head)
    }
}

/// Render the run status line
pub fn render_status(f: &mut Frame, area: Rect, board: &PlotBoard, script_name: &str) {
    let (state, color) = match board.state {
        ConsumerState::Waiting => ("waiting for first report", Color::Yellow),
        ConsumerState::Active => ("running", Color::Green),
        ConsumerState::Done if board.error.is_some() => ("failed", Color::Red),
        ConsumerState::Done => ("finished", Color::Cyan),
    };

    let mut spans = vec![
        Span::styled(" Run ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("{}: ", truncate_str(script_name, 40))),
        Span::styled(state, Style::default().fg(color)),
        Span::raw(format!("  Samples: {}", format_count(board.samples))),
    ];
    if let Some(axis) = board.plots.as_ref().and_then(PlotSet::axis) {
        spans.push(Span::raw(format!("  Axis: {}", axis)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render one chart per series, stacked vertically
pub fn render_plots(f: &mut Frame, area: Rect, board: &PlotBoard) {
    let plots = match board.plots.as_ref() {
        Some(plots) if !plots.series().is_empty() => plots,
        _ => {
            render_placeholder(f, area, board);
            return;
        }
    };

    let series = plots.series();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, series.len() as u32); series.len()])
        .split(area);

    let axis = plots.axis().unwrap_or_default();
    for (s, chunk) in series.iter().zip(chunks.iter()) {
        render_series(f, *chunk, axis, s);
    }
}

fn render_placeholder(f: &mut Frame, area: Rect, board: &PlotBoard) {
    let block = Block::default()
        .title(" Plots ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));
    let text = match &board.error {
        Some(msg) => Span::styled(msg.clone(), Style::default().fg(Color::Red)),
        None => Span::styled(
            "No samples yet",
            Style::default().fg(Color::DarkGray),
        ),
    };
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn render_series(f: &mut Frame, area: Rect, axis: &str, series: &Series) {
    let color = series_color(series.color);
    let title = match series.last() {
        Some((_, y)) => format!(" {} = {} ", series.name, format_value(y)),
        None => format!(" {} ", series.name),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let Some([x0, x1, y0, y1]) = series.bounds() else {
        f.render_widget(block, area);
        return;
    };

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&series.points);

    let label_style = Style::default().fg(Color::Gray);
    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(
            Axis::default()
                .title(axis)
                .style(label_style)
                .bounds([x0, x1])
                .labels([format_value(x0), format_value(x1)]),
        )
        .y_axis(
            Axis::default()
                .style(label_style)
                .bounds([y0, y1])
                .labels([format_value(y0), format_value(y1)]),
        );
    f.render_widget(chart, area);
}

/// Render help bar at the bottom
pub fn render_help_bar(f: &mut Frame, area: Rect, pending_stop: bool, status: Option<&str>, run_active: bool) {
    let (text, style) = if pending_stop {
        (
            " Stop the running script? Press Y to confirm, any other key to cancel ".to_string(),
            Style::default().fg(Color::Black).bg(Color::Yellow),
        )
    } else if let Some(msg) = status {
        (
            format!(" {} ", msg),
            Style::default().fg(Color::White).bg(Color::Blue),
        )
    } else if run_active {
        (
            " q: Quit | s: Stop run ".to_string(),
            Style::default().fg(Color::Black).bg(Color::Gray),
        )
    } else {
        (
            " q: Quit ".to_string(),
            Style::default().fg(Color::Black).bg(Color::Gray),
        )
    };

    let paragraph = Paragraph::new(text).style(style);
    f.render_widget(paragraph, area);
}
