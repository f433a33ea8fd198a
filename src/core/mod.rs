mod cache;
mod cba;
mod curve;
mod error;
mod risk;
mod store;
mod types;

pub use cache::{CacheEntry, MemoryCache, ResultCache, cache_key, get_or_compute};
pub use cba::{analyze_cba, cba_defaults};
pub use curve::{LinearCurve, linspace, nan_max, nan_mean, nan_min, zero_non_finite};
pub use error::{EngineError, Result};
pub use risk::{assess_risk, expected_annual_impact, transfer_or_keep, transferred_protection};
pub use store::{ImpactStore, MemoryStore, dimension_label};
pub use types::{
    AnnualCbaRow, CbaAnalysis, CbaDefaults, CbaInputs, CbaMeta, ClimatePathway, CostFactors,
    CurveKey, Exposure, FloodType, ModelCatalog, RiskAssessment, RiskInputs, RiskMeta, RiskYearRow,
    Scenario, ScenarioSpec, SocioPathway, UnitInfo, subsidence_token,
};
