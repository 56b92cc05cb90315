use super::ui;
use crate::core::history::Resolution;
use crate::core::price::Interval;
use crate::engine::Engine;
use anyhow::Result;
use comfy_table::Cell;

pub fn render(resolution: &Resolution) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Time"),
        ui::header_cell(&format!("Price ({})", resolution.series.currency)),
    ]);
    for point in &resolution.series.points {
        table.add_row(vec![
            Cell::new(ui::format_time(point.t)),
            ui::format_optional_cell(Some(point.p), |p| format!("{p:.4}")),
        ]);
    }
    table.to_string()
}

pub async fn run(
    engine: &Engine,
    id: &str,
    currency: Option<&str>,
    days: u32,
    interval: Interval,
    verbose_path: bool,
) -> Result<()> {
    let currency = currency.unwrap_or(engine.default_currency()).to_lowercase();

    let spinner = ui::new_spinner("Resolving history");
    let resolution = engine.history(id, &currency, days, interval).await;
    spinner.finish_and_clear();

    let series = &resolution.series;
    println!(
        "\n{} {} {}d {}",
        ui::style_text(&series.id, ui::StyleType::Title),
        series.currency,
        days,
        interval
    );
    if series.points.is_empty() {
        println!(
            "{}",
            ui::style_text(
                series.error.as_deref().unwrap_or("no data"),
                ui::StyleType::Error
            )
        );
    } else {
        println!("{}", render(&resolution));
    }
    if series.stale {
        println!("{}", ui::style_text("Served from last good copy", ui::StyleType::Error));
    }
    if verbose_path {
        println!(
            "{}",
            ui::style_text(&format!("Stages: {:?}", resolution.path), ui::StyleType::Subtle)
        );
        for note in &resolution.notes {
            println!("{}", ui::style_text(note, ui::StyleType::Subtle));
        }
    }
    Ok(())
}
