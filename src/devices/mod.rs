//! Resources of the microgrid and their capability models.

/// Stationary battery storage model.
pub mod battery;
/// Upstream grid connection.
pub mod external;
/// Consumer demand profiles.
pub mod load;
/// Solar photovoltaic generation model.
pub mod solar;
pub mod types;
/// Irradiance and temperature generator.
pub mod weather;

// Re-export the main types for convenience
pub use battery::Battery;
pub use external::ExternalSource;
pub use load::{Load, LoadProfile};
pub use solar::{SolarArray, SolarModel};
pub use types::{CapabilityProvider, NegotiationResponder, Tickable};
pub use weather::{WeatherHandle, WeatherModel, WeatherParams};
