use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::{EngineError, Result};
use crate::core::types::{
    subsidence_token, CostFactors, CurveKey, Exposure, FloodType, Scenario, SocioPathway, UnitInfo,
};

// A missing record is always DataUnavailable, never a silent default.
pub trait ImpactStore {
    fn unit_info(&self, unit: &str) -> Result<UnitInfo>;

    // Impacts aligned with the catalog return periods.
    fn impact_curve(
        &self,
        unit: &str,
        flood: FloodType,
        exposure: Exposure,
        key: &CurveKey,
    ) -> Result<Vec<f64>>;

    fn asset_value(&self, unit: &str, exposure: Exposure, socio: SocioPathway, year: u16)
        -> Result<f64>;

    // Modelled protection, expressed as a return period.
    fn protection_default(
        &self,
        unit: &str,
        flood: FloodType,
        subsidence: bool,
        scenario: Scenario,
    ) -> Result<f64>;

    // Every unit sharing a unit type, sorted by name.
    fn peer_units(&self, unit_type: &str) -> Result<Vec<String>>;

    fn construction_dimension(
        &self,
        unit: &str,
        model: &str,
        scenario: Scenario,
        ref_year: u16,
        start_rp: f64,
        end_rp: f64,
    ) -> Result<f64>;

    fn cost_factors(&self, unit: &str) -> Result<CostFactors>;
}

pub fn dimension_label(
    model: &str,
    scenario: Scenario,
    ref_year: u16,
    start_rp: f64,
    end_rp: f64,
) -> String {
    let spec = scenario.spec();
    format!(
        "{}_{}_{}_{}_{:05}_{:05}",
        spec.climate.token(),
        model,
        spec.socio.token(),
        ref_year,
        start_rp.round() as u32,
        end_rp.round() as u32
    )
}

#[derive(Debug, Clone, Deserialize)]
struct UnitRecord {
    name: String,
    unit_type: String,
    ppp_rate: f64,
    construction_index: f64,
    #[serde(default)]
    curves: HashMap<String, HashMap<String, HashMap<String, Vec<f64>>>>,
    #[serde(default)]
    assets: HashMap<String, HashMap<String, HashMap<String, f64>>>,
    #[serde(default)]
    protection: HashMap<String, HashMap<String, HashMap<String, f64>>>,
    #[serde(default)]
    construction_dimensions: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct StoreDocument {
    units: Vec<UnitRecord>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    units: HashMap<String, UnitRecord>,
}

impl MemoryStore {
    pub fn from_json(text: &str) -> Result<Self> {
        let document: StoreDocument = serde_json::from_str(text)
            .map_err(|e| EngineError::invalid_parameters(format!("bad store document: {e}")))?;
        let mut units = HashMap::new();
        for record in document.units {
            units.insert(record.name.clone(), record);
        }
        Ok(MemoryStore { units })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_parameters(format!("cannot read {}: {e}", path.display()))
        })?;
        MemoryStore::from_json(&text)
    }

    fn record(&self, unit: &str) -> Result<&UnitRecord> {
        self.units.get(unit).ok_or_else(|| {
            EngineError::data_unavailable(unit, "unit is not in the store")
        })
    }
}

impl ImpactStore for MemoryStore {
    fn unit_info(&self, unit: &str) -> Result<UnitInfo> {
        let record = self.record(unit)?;
        Ok(UnitInfo {
            name: record.name.clone(),
            unit_type: record.unit_type.clone(),
        })
    }

    fn impact_curve(
        &self,
        unit: &str,
        flood: FloodType,
        exposure: Exposure,
        key: &CurveKey,
    ) -> Result<Vec<f64>> {
        let record = self.record(unit)?;
        let column = key.column_label();
        record
            .curves
            .get(flood.label())
            .and_then(|by_exposure| by_exposure.get(exposure.label()))
            .and_then(|columns| columns.get(&column))
            .cloned()
            .ok_or_else(|| {
                EngineError::data_unavailable(
                    unit,
                    format!("no {} {} curve {column}", flood.label(), exposure.label()),
                )
            })
    }

    fn asset_value(
        &self,
        unit: &str,
        exposure: Exposure,
        socio: SocioPathway,
        year: u16,
    ) -> Result<f64> {
        let record = self.record(unit)?;
        record
            .assets
            .get(exposure.label())
            .and_then(|by_socio| by_socio.get(socio.token()))
            .and_then(|by_year| by_year.get(&year.to_string()))
            .copied()
            .ok_or_else(|| {
                EngineError::data_unavailable(
                    unit,
                    format!(
                        "no {} asset value for {} in {year}",
                        exposure.label(),
                        socio.token()
                    ),
                )
            })
    }

    fn protection_default(
        &self,
        unit: &str,
        flood: FloodType,
        subsidence: bool,
        scenario: Scenario,
    ) -> Result<f64> {
        let record = self.record(unit)?;
        record
            .protection
            .get(flood.label())
            .and_then(|by_sub| by_sub.get(subsidence_token(subsidence)))
            .and_then(|by_scenario| by_scenario.get(scenario.spec().abbrev))
            .copied()
            .ok_or_else(|| {
                EngineError::data_unavailable(
                    unit,
                    format!(
                        "no {} {} protection default for {}",
                        flood.label(),
                        subsidence_token(subsidence),
                        scenario.label()
                    ),
                )
            })
    }

    fn peer_units(&self, unit_type: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .units
            .values()
            .filter(|record| record.unit_type == unit_type)
            .map(|record| record.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn construction_dimension(
        &self,
        unit: &str,
        model: &str,
        scenario: Scenario,
        ref_year: u16,
        start_rp: f64,
        end_rp: f64,
    ) -> Result<f64> {
        let record = self.record(unit)?;
        let label = dimension_label(model, scenario, ref_year, start_rp, end_rp);
        record
            .construction_dimensions
            .get(&label)
            .copied()
            .ok_or_else(|| {
                EngineError::data_unavailable(unit, format!("no construction dimension {label}"))
            })
    }

    fn cost_factors(&self, unit: &str) -> Result<CostFactors> {
        let record = self.record(unit)?;
        Ok(CostFactors {
            ppp_rate: record.ppp_rate,
            construction_index: record.construction_index,
        })
    }
}
