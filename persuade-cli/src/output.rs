//! Table rendering for learning statistics

use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use persuade_core::LearningStatistics;

pub fn statistics_table(stats: &LearningStatistics) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Strategy").fg(Color::Cyan),
        Cell::new("Attempts").fg(Color::Cyan),
        Cell::new("Successes").fg(Color::Cyan),
        Cell::new("Rate").fg(Color::Cyan),
        Cell::new("Revenue").fg(Color::Cyan),
    ]);

    for row in &stats.strategies {
        let mut name = Cell::new(row.strategy.as_str());
        if stats.best_strategy == Some(row.strategy) {
            name = name.fg(Color::Green);
        }
        table.add_row(vec![
            name,
            Cell::new(row.attempts).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.successes)).set_alignment(CellAlignment::Right),
            Cell::new(format_rate(row.success_rate)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.revenue)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn print_statistics(stats: &LearningStatistics) {
    println!("{}", statistics_table(stats));
    println!();
    println!(
        "Total: {} attempts, {:.2} successes ({}), revenue {:.2}",
        stats.total_attempts,
        stats.total_successes,
        format_rate(stats.overall_success_rate),
        stats.total_revenue
    );
    println!(
        "Best: {}  Worst: {}",
        stats.best_strategy.map_or("-", |s| s.as_str()),
        stats.worst_strategy.map_or("-", |s| s.as_str())
    );
    println!(
        "Exploration: {} after {} selections",
        format_rate(stats.exploration_rate),
        stats.selections
    );
}

pub fn format_rate(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}
