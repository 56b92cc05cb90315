use super::ui;
use crate::core::price::ConsensusBatch;
use crate::engine::Engine;
use anyhow::Result;
use comfy_table::Cell;

pub fn render(batch: &ConsensusBatch, currency: &str) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell(&format!("Price ({currency})")),
        ui::header_cell("24h Ago"),
        ui::header_cell("24h Change"),
        ui::header_cell("Quality"),
        ui::header_cell("Data"),
    ]);

    for row in &batch.rows {
        table.add_row(vec![
            Cell::new(&row.id),
            ui::format_optional_cell(row.price, |p| format!("{p:.4}")),
            ui::format_optional_cell(row.price_24h_ago, |p| format!("{p:.4}")),
            ui::change_cell(row.pct_24h),
            ui::format_optional_cell(row.price.map(|_| row.quality), |q| format!("{q:.2}")),
            ui::freshness_cell(row.stale),
        ]);
    }
    table.to_string()
}

pub async fn run(engine: &Engine, ids: &[String], currency: Option<&str>) -> Result<()> {
    let currency = currency.unwrap_or(engine.default_currency()).to_lowercase();

    let spinner = ui::new_spinner("Fetching prices");
    let batch = engine.prices(ids, &currency).await;
    spinner.finish_and_clear();

    println!("{}", render(&batch, &currency));
    println!(
        "{}",
        ui::style_text(
            &format!("Updated {}", ui::format_time(batch.updated_at)),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}
