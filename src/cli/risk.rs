use super::ui;
use crate::core::risk::RiskReport;
use crate::engine::Engine;
use anyhow::Result;
use comfy_table::Cell;

pub fn render(report: &RiskReport) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Weight (%)"),
        ui::header_cell("Volatility"),
        ui::header_cell("Tail"),
        ui::header_cell("Correlation"),
        ui::header_cell("Tier"),
    ]);
    for asset in &report.assets {
        table.add_row(vec![
            Cell::new(&asset.id),
            ui::format_optional_cell(Some(asset.weight * 100.0), |w| format!("{w:.2}%")),
            ui::format_optional_cell(asset.volatility, |v| format!("{v:.3}")),
            ui::format_optional_cell(asset.tail, |t| (if t { "active" } else { "-" }).to_string()),
            ui::format_optional_cell(asset.correlation, |c| format!("{c:.2}")),
            Cell::new(asset.liquidity_tier),
        ]);
    }
    table.to_string()
}

pub async fn run(
    engine: &Engine,
    ids: &[String],
    values: &[f64],
    currency: Option<&str>,
    days: u32,
) -> Result<()> {
    let currency = currency.unwrap_or(engine.default_currency()).to_lowercase();

    let spinner = ui::new_spinner("Scoring portfolio");
    let report = engine.risk(ids, values, &currency, days).await;
    spinner.finish_and_clear();
    let report = report?;

    println!("{}", render(&report));
    ui::print_separator();
    let score = report
        .score
        .map_or_else(|| "N/A".to_string(), |s| format!("{s:.3}"));
    println!(
        "{} {}  {}",
        ui::style_text("Composite score:", ui::StyleType::TotalLabel),
        ui::style_text(&score, ui::StyleType::TotalValue),
        ui::style_text(&format!("allocation {}", report.allocation_hash), ui::StyleType::Subtle)
    );
    Ok(())
}
