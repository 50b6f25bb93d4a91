pub mod cache;
pub mod client;
pub mod proxy;
pub mod types;

pub use client::WeatherError;
pub use proxy::WeatherProxy;
pub use types::{CityMatch, CombinedWeather};
