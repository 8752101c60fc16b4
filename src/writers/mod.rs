pub mod forecast_writer;
pub mod view_builder;

pub use forecast_writer::ForecastWriter;
pub use view_builder::ViewBuilder;
