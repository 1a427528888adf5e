use crate::bus::message::Irradiance;

/// Irradiance at standard test conditions (W/m²).
const STC_IRRADIANCE: f64 = 1000.0;
/// Cell temperature at standard test conditions (°C).
const STC_CELL_TEMP: f64 = 25.0;
/// Cell heating above ambient per W/m² of irradiance (NOCT 45 °C model).
const CELL_HEATING_PER_WM2: f64 = 25.0 / 800.0;

/// How a producer turns weather into output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolarModel {
    /// PV array: rated output scaled by irradiance with a temperature derating.
    Array {
        /// Output at 1000 W/m² and 25 °C cell temperature (kW).
        kw_peak: f64,
        /// Power temperature coefficient per °C (typically -0.004).
        temp_coeff: f64,
    },
    /// Fixed output regardless of weather.
    Constant { kw: f64 },
}

/// A producer reporting output whenever a weather observation arrives.
///
/// # Examples
///
/// ```
/// use microgrid_twin::bus::message::Irradiance;
/// use microgrid_twin::devices::solar::{SolarArray, SolarModel};
///
/// let pv = SolarArray::new(SolarModel::Array { kw_peak: 100.0, temp_coeff: 0.0 });
/// let kw = pv.production_kw(Irradiance { g: 500.0, t: 20.0 });
/// assert!((kw - 50.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct SolarArray {
    pub model: SolarModel,
}

impl SolarArray {
    pub fn new(model: SolarModel) -> Self {
        Self { model }
    }

    /// Production estimate in kW for one weather observation. Never negative.
    pub fn production_kw(&self, obs: Irradiance) -> f64 {
        match self.model {
            SolarModel::Constant { kw } => kw.max(0.0),
            SolarModel::Array {
                kw_peak,
                temp_coeff,
            } => {
                let g = obs.g.max(0.0);
                let cell_temp = obs.t + CELL_HEATING_PER_WM2 * g;
                let derate = (1.0 + temp_coeff * (cell_temp - STC_CELL_TEMP)).max(0.0);
                (kw_peak * g / STC_IRRADIANCE * derate).max(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(coeff: f64) -> SolarArray {
        SolarArray::new(SolarModel::Array {
            kw_peak: 100.0,
            temp_coeff: coeff,
        })
    }

    #[test]
    fn no_output_at_night() {
        let pv = array(-0.004);
        assert_eq!(pv.production_kw(Irradiance { g: 0.0, t: 10.0 }), 0.0);
        assert_eq!(pv.production_kw(Irradiance { g: -5.0, t: 10.0 }), 0.0);
    }

    #[test]
    fn hot_cells_produce_less() {
        let pv = array(-0.004);
        let cool = pv.production_kw(Irradiance { g: 800.0, t: 0.0 });
        let hot = pv.production_kw(Irradiance { g: 800.0, t: 35.0 });
        assert!(hot < cool);
    }

    #[test]
    fn rated_output_at_stc() {
        // Cell at 25 °C requires ambient 25 - 31.25 at 1000 W/m².
        let pv = array(-0.004);
        let kw = pv.production_kw(Irradiance {
            g: 1000.0,
            t: 25.0 - 31.25,
        });
        assert!((kw - 100.0).abs() < 1e-9);
    }

    #[test]
    fn constant_ignores_weather() {
        let pv = SolarArray::new(SolarModel::Constant { kw: 80.0 });
        assert_eq!(pv.production_kw(Irradiance { g: 0.0, t: 0.0 }), 80.0);
    }
}
