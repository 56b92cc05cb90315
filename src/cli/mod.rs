pub mod history;
pub mod prices;
pub mod risk;
pub mod setup;
pub mod ui;
