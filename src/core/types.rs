use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloodType {
    Riverine,
    Coastal,
}

impl FloodType {
    pub fn label(self) -> &'static str {
        match self {
            FloodType::Riverine => "riverine",
            FloodType::Coastal => "coastal",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Exposure {
    #[serde(rename = "popexp")]
    Population,
    #[serde(rename = "gdpexp")]
    Gdp,
    #[serde(rename = "urban_damage_v2")]
    UrbanDamage,
}

impl Exposure {
    pub fn label(self) -> &'static str {
        match self {
            Exposure::Population => "popexp",
            Exposure::Gdp => "gdpexp",
            Exposure::UrbanDamage => "urban_damage_v2",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    #[serde(rename = "business as usual")]
    BusinessAsUsual,
    #[serde(rename = "pessimistic")]
    Pessimistic,
    #[serde(rename = "optimistic", alias = "rcp4p5")]
    Optimistic,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ClimatePathway {
    #[serde(rename = "histor")]
    Historical,
    #[serde(rename = "rcp4p5")]
    Rcp4p5,
    #[serde(rename = "rcp8p5")]
    Rcp8p5,
}

impl ClimatePathway {
    pub fn token(self) -> &'static str {
        match self {
            ClimatePathway::Historical => "histor",
            ClimatePathway::Rcp4p5 => "rcp4p5",
            ClimatePathway::Rcp8p5 => "rcp8p5",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocioPathway {
    Base,
    Ssp2,
    Ssp3,
}

impl SocioPathway {
    pub fn token(self) -> &'static str {
        match self {
            SocioPathway::Base => "base",
            SocioPathway::Ssp2 => "ssp2",
            SocioPathway::Ssp3 => "ssp3",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScenarioSpec {
    pub climate: ClimatePathway,
    pub socio: SocioPathway,
    pub abbrev: &'static str,
}

impl Scenario {
    pub fn spec(self) -> ScenarioSpec {
        match self {
            Scenario::BusinessAsUsual => ScenarioSpec {
                climate: ClimatePathway::Rcp8p5,
                socio: SocioPathway::Ssp2,
                abbrev: "bau",
            },
            Scenario::Pessimistic => ScenarioSpec {
                climate: ClimatePathway::Rcp8p5,
                socio: SocioPathway::Ssp3,
                abbrev: "pes",
            },
            Scenario::Optimistic => ScenarioSpec {
                climate: ClimatePathway::Rcp4p5,
                socio: SocioPathway::Ssp2,
                abbrev: "opt",
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Scenario::BusinessAsUsual => "business as usual",
            Scenario::Pessimistic => "pessimistic",
            Scenario::Optimistic => "optimistic",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CurveKey {
    pub climate: ClimatePathway,
    pub model: String,
    pub socio: SocioPathway,
    pub subsidence: bool,
    pub year: u16,
}

impl CurveKey {
    pub fn new(
        climate: ClimatePathway,
        model: &str,
        socio: SocioPathway,
        subsidence: bool,
        year: u16,
    ) -> Self {
        CurveKey {
            climate,
            model: model.to_string(),
            socio,
            subsidence,
            year,
        }
    }

    // Store column label, e.g. rcp8p5_nr_ssp2_wtsub_2030.
    pub fn column_label(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.climate.token(),
            self.model,
            self.socio.token(),
            subsidence_token(self.subsidence),
            self.year
        )
    }
}

pub fn subsidence_token(subsidence: bool) -> &'static str {
    if subsidence { "wtsub" } else { "nosub" }
}

#[derive(Clone, Debug)]
pub struct ModelCatalog {
    pub riverine_models: Vec<String>,
    pub coastal_models: Vec<String>,
    pub snapshot_years: Vec<u16>,
    pub return_periods: Vec<f64>,
    pub rp_infinite: f64,
    pub horizon_cap: u16,
    pub fully_protected_units: Vec<String>,
    pub max_protection: f64,
}

impl ModelCatalog {
    pub fn standard() -> Self {
        ModelCatalog {
            riverine_models: ["gf", "ha", "ip", "mi", "nr"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            coastal_models: ["95", "50", "05"].iter().map(|m| m.to_string()).collect(),
            snapshot_years: vec![2010, 2030, 2050, 2080],
            return_periods: vec![2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0],
            rp_infinite: 1e5,
            horizon_cap: 2100,
            fully_protected_units: [
                "Netherlands",
                "Drenthe, Netherlands",
                "Flevoland, Netherlands",
                "Friesland, Netherlands",
                "Gelderland, Netherlands",
                "Groningen, Netherlands",
                "IJsselmeer, Netherlands",
                "Limburg, Netherlands",
                "Noord-Brabant, Netherlands",
                "Noord-Holland, Netherlands",
                "Overijssel, Netherlands",
                "Utrecht, Netherlands",
                "Zeeland, Netherlands",
                "Zeeuwse meren, Netherlands",
                "Zuid-Holland, Netherlands",
            ]
            .iter()
            .map(|u| u.to_string())
            .collect(),
            max_protection: 1000.0,
        }
    }

    pub fn models(&self, flood: FloodType) -> &[String] {
        match flood {
            FloodType::Riverine => &self.riverine_models,
            FloodType::Coastal => &self.coastal_models,
        }
    }

    pub fn historical_model(&self, flood: FloodType) -> &'static str {
        match flood {
            FloodType::Riverine => "wt",
            FloodType::Coastal => "95",
        }
    }

    pub fn fully_protected(&self, unit_name: &str) -> bool {
        self.fully_protected_units.iter().any(|u| u == unit_name)
    }

    pub fn min_return_period(&self) -> f64 {
        self.return_periods[0]
    }

    pub fn max_return_period(&self) -> f64 {
        self.return_periods[self.return_periods.len() - 1]
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        ModelCatalog::standard()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskInputs {
    pub unit: String,
    pub flood: FloodType,
    pub exposure: Exposure,
    pub scenario: Scenario,
    pub sub_scenario: bool,
    pub existing_prot: Option<f64>,
}

impl RiskInputs {
    // Riverine tables carry no subsidence variant.
    pub fn effective_subsidence(&self) -> bool {
        match self.flood {
            FloodType::Riverine => false,
            FloodType::Coastal => self.sub_scenario,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CbaInputs {
    pub unit: String,
    pub scenario: Scenario,
    pub existing_prot: Option<f64>,
    pub prot_fut: Option<f64>,
    pub implementation_start: u16,
    pub implementation_end: u16,
    pub infrastructure_life: u16,
    pub benefits_start: u16,
    pub ref_year: u16,
    pub estimated_costs: Option<f64>,
    pub discount_rate: f64,
    pub om_costs: f64,
    pub user_urb_cost: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CostFactors {
    pub ppp_rate: f64,
    pub construction_index: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub unit_type: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RiskMeta {
    pub flood: FloodType,
    pub geogunit_name: String,
    pub geogunit_type: String,
    #[serde(rename = "Scenario")]
    pub scenario: Scenario,
    #[serde(rename = "Exposure")]
    pub exposure: Exposure,
    #[serde(rename = "Average Protection")]
    pub average_protection: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RiskYearRow {
    #[serde(rename = "index")]
    pub year: u16,
    #[serde(rename = "Annual_Damage_Avg")]
    pub annual_damage_avg: f64,
    #[serde(rename = "Annual_Damage_Min")]
    pub annual_damage_min: Option<f64>,
    #[serde(rename = "Annual_Damage_Max")]
    pub annual_damage_max: Option<f64>,
    #[serde(rename = "Asset_Value")]
    pub asset_value: f64,
    #[serde(rename = "Flood_Protection")]
    pub flood_protection: f64,
    #[serde(rename = "Percent_Damage_Avg")]
    pub percent_damage_avg: Option<f64>,
    #[serde(rename = "Percent_Damage_Min")]
    pub percent_damage_min: Option<f64>,
    #[serde(rename = "Percent_Damage_Max")]
    pub percent_damage_max: Option<f64>,
    #[serde(rename = "CC_Driver_Avg")]
    pub cc_driver_avg: f64,
    #[serde(rename = "CC_Driver_Min")]
    pub cc_driver_min: Option<f64>,
    #[serde(rename = "CC_Driver_Max")]
    pub cc_driver_max: Option<f64>,
    #[serde(rename = "Soc_Driver")]
    pub soc_driver: f64,
    #[serde(rename = "Sub_Driver")]
    pub sub_driver: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RiskAssessment {
    pub meta: RiskMeta,
    pub rows: Vec<RiskYearRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CbaMeta {
    pub geogunit_name: String,
    pub geogunit_type: String,
    pub scenario: Scenario,
    pub average_protection: f64,
    pub starting_protection: f64,
    pub future_protection: f64,
    pub reference_year: u16,
    pub implementation_start: u16,
    pub implementation_end: u16,
    pub infrastructure_lifespan: u16,
    pub estimated_costs: Option<f64>,
    pub benefits_start: u16,
    pub discount: f64,
    pub om: f64,
    pub gdp_costs: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnualCbaRow {
    pub year: u16,
    pub pop_costs_avg: f64,
    pub pop_costs_min: f64,
    pub pop_costs_max: f64,
    pub gdp_costs_avg: f64,
    pub gdp_costs_min: f64,
    pub gdp_costs_max: f64,
    pub urb_benefits_avg: f64,
    pub urb_benefits_min: f64,
    pub urb_benefits_max: f64,
    pub pop_benefits_avg: f64,
    pub pop_benefits_min: f64,
    pub pop_benefits_max: f64,
    pub gdp_benefits_avg: f64,
    pub gdp_benefits_min: f64,
    pub gdp_benefits_max: f64,
    pub prot_present_avg: Option<f64>,
    pub prot_present_min: Option<f64>,
    pub prot_present_max: Option<f64>,
    pub prot_future_avg: Option<f64>,
    pub prot_future_min: Option<f64>,
    pub prot_future_max: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CbaAnalysis {
    pub meta: CbaMeta,
    pub rows: Vec<AnnualCbaRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CbaDefaults {
    pub existing_prot: f64,
    #[serde(rename = "existing_prot_r")]
    pub existing_prot_rounded: f64,
    pub prot_fut: f64,
    pub estimated_costs: f64,
}
