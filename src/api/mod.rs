use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::{
    AnnualCbaRow, CbaAnalysis, CbaInputs, CbaMeta, CurveKey, EngineError, Exposure, FloodType,
    ImpactStore, MemoryCache, MemoryStore, ModelCatalog, Result, RiskAssessment, RiskInputs,
    RiskYearRow, Scenario, analyze_cba, assess_risk, cache_key, cba_defaults, get_or_compute,
};

const IMPL_COST_DISPLAY_DIVISOR: f64 = 10.1;

const RISK_TABLE_COLUMNS: &[&str] = &[
    "index",
    "Annual_Damage_Avg",
    "Asset_Value",
    "Percent_Damage_Avg",
    "Flood_Protection",
];

const ANNUAL_FLOOD_COLUMNS: &[&str] = &[
    "index",
    "Annual_Damage_Avg",
    "Annual_Damage_Min",
    "Annual_Damage_Max",
    "Percent_Damage_Avg",
    "Percent_Damage_Min",
    "Percent_Damage_Max",
];

const FLOOD_DRIVERS_COLUMNS: &[&str] = &[
    "index",
    "Annual_Damage_Avg",
    "Annual_Damage_Min",
    "Annual_Damage_Max",
    "Percent_Damage_Avg",
    "Percent_Damage_Min",
    "Percent_Damage_Max",
    "CC_Driver_Avg",
    "CC_Driver_Min",
    "CC_Driver_Max",
    "Soc_Driver",
    "Sub_Driver",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFlood {
    Riverine,
    Coastal,
}

impl From<CliFlood> for FloodType {
    fn from(value: CliFlood) -> Self {
        match value {
            CliFlood::Riverine => FloodType::Riverine,
            CliFlood::Coastal => FloodType::Coastal,
        }
    }
}

impl From<FloodType> for CliFlood {
    fn from(value: FloodType) -> Self {
        match value {
            FloodType::Riverine => CliFlood::Riverine,
            FloodType::Coastal => CliFlood::Coastal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliExposure {
    Population,
    Gdp,
    UrbanDamage,
}

impl From<CliExposure> for Exposure {
    fn from(value: CliExposure) -> Self {
        match value {
            CliExposure::Population => Exposure::Population,
            CliExposure::Gdp => Exposure::Gdp,
            CliExposure::UrbanDamage => Exposure::UrbanDamage,
        }
    }
}

impl From<Exposure> for CliExposure {
    fn from(value: Exposure) -> Self {
        match value {
            Exposure::Population => CliExposure::Population,
            Exposure::Gdp => CliExposure::Gdp,
            Exposure::UrbanDamage => CliExposure::UrbanDamage,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliScenario {
    BusinessAsUsual,
    Pessimistic,
    Optimistic,
}

impl From<CliScenario> for Scenario {
    fn from(value: CliScenario) -> Self {
        match value {
            CliScenario::BusinessAsUsual => Scenario::BusinessAsUsual,
            CliScenario::Pessimistic => Scenario::Pessimistic,
            CliScenario::Optimistic => Scenario::Optimistic,
        }
    }
}

impl From<Scenario> for CliScenario {
    fn from(value: Scenario) -> Self {
        match value {
            Scenario::BusinessAsUsual => CliScenario::BusinessAsUsual,
            Scenario::Pessimistic => CliScenario::Pessimistic,
            Scenario::Optimistic => CliScenario::Optimistic,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "floodrisk",
    version,
    about = "Flood risk and adaptation cost-benefit analysis over precomputed hazard curves"
)]
pub struct Cli {
    #[arg(
        long,
        help = "JSON document with per-unit hazard curves, assets and cost factors"
    )]
    data: PathBuf,
    #[arg(
        long,
        default_value = "warn",
        help = "Tracing filter, e.g. info or floodrisk=debug"
    )]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Assess flood risk and its drivers for one geographic unit")]
    Risk(RiskArgs),
    #[command(about = "Price a protection upgrade against the damages it avoids")]
    Cba(CbaArgs),
    #[command(about = "Suggested starting parameters for the investment analysis")]
    Defaults(DefaultsArgs),
}

#[derive(Args, Clone, Debug)]
struct RiskArgs {
    #[arg(long, help = "Geographic unit to assess")]
    unit: String,
    #[arg(long, value_enum, default_value_t = CliFlood::Riverine)]
    flood: CliFlood,
    #[arg(long, value_enum, default_value_t = CliExposure::UrbanDamage)]
    exposure: CliExposure,
    #[arg(long, value_enum, default_value_t = CliScenario::BusinessAsUsual)]
    scenario: CliScenario,
    #[arg(long, help = "Apply the subsidence scenario to coastal hazards")]
    sub_scenario: bool,
    #[arg(
        long,
        help = "Override the modelled existing protection (a return period)"
    )]
    existing_prot: Option<f64>,
    #[arg(
        long,
        default_value = "table",
        help = "Widget to render: table, annual_flood, flood_drivers, benchmark or lp_curve"
    )]
    widget: String,
}

impl RiskArgs {
    fn to_inputs(&self) -> RiskInputs {
        RiskInputs {
            unit: self.unit.clone(),
            flood: self.flood.into(),
            exposure: self.exposure.into(),
            scenario: self.scenario.into(),
            sub_scenario: self.sub_scenario,
            existing_prot: self.existing_prot,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CbaArgs {
    #[arg(long, help = "Geographic unit to analyse")]
    unit: String,
    #[arg(long, value_enum, default_value_t = CliScenario::BusinessAsUsual)]
    scenario: CliScenario,
    #[arg(
        long,
        help = "Existing protection as a return period; defaults to the modelled level"
    )]
    existing_prot: Option<f64>,
    #[arg(
        long,
        help = "Target protection standard; defaults to the next canonical return period"
    )]
    prot_fut: Option<f64>,
    #[arg(long, default_value_t = 2020)]
    implementation_start: u16,
    #[arg(long, default_value_t = 2040)]
    implementation_end: u16,
    #[arg(long, default_value_t = 80, help = "Infrastructure lifetime in years")]
    infrastructure_life: u16,
    #[arg(
        long,
        default_value_t = 2020,
        help = "First year the raised standard pays out"
    )]
    benefits_start: u16,
    #[arg(
        long,
        default_value_t = 2050,
        help = "Snapshot year the dike dimensions are priced against"
    )]
    ref_year: u16,
    #[arg(
        long,
        help = "Construction cost preview carried into the response metadata"
    )]
    estimated_costs: Option<f64>,
    #[arg(long, default_value_t = 0.05)]
    discount_rate: f64,
    #[arg(
        long,
        default_value_t = 0.01,
        help = "Annual operation and maintenance rate"
    )]
    om_costs: f64,
    #[arg(
        long,
        help = "Construction cost per unit dike in millions; defaults to the local cost index"
    )]
    user_urb_cost: Option<f64>,
    #[arg(
        long,
        default_value = "table",
        help = "Widget to render: table, annual_costs, net_benefits, impl_cost, maintenance, flood_prot or export"
    )]
    widget: String,
}

impl CbaArgs {
    fn to_inputs(&self) -> CbaInputs {
        CbaInputs {
            unit: self.unit.clone(),
            scenario: self.scenario.into(),
            existing_prot: self.existing_prot,
            prot_fut: self.prot_fut,
            implementation_start: self.implementation_start,
            implementation_end: self.implementation_end,
            infrastructure_life: self.infrastructure_life,
            benefits_start: self.benefits_start,
            ref_year: self.ref_year,
            estimated_costs: self.estimated_costs,
            discount_rate: self.discount_rate,
            om_costs: self.om_costs,
            user_urb_cost: self.user_urb_cost,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct DefaultsArgs {
    #[arg(long, help = "Geographic unit to look up")]
    unit: String,
    #[arg(long, value_enum, default_value_t = CliFlood::Riverine)]
    flood: CliFlood,
    #[arg(long, help = "Apply the subsidence scenario to coastal hazards")]
    sub_scenario: bool,
    #[arg(long, value_enum, default_value_t = CliScenario::BusinessAsUsual)]
    scenario: CliScenario,
}

fn default_risk_args(unit: String) -> RiskArgs {
    RiskArgs {
        unit,
        flood: CliFlood::Riverine,
        exposure: CliExposure::UrbanDamage,
        scenario: CliScenario::BusinessAsUsual,
        sub_scenario: false,
        existing_prot: None,
        widget: "table".to_string(),
    }
}

fn default_cba_args(unit: String) -> CbaArgs {
    CbaArgs {
        unit,
        scenario: CliScenario::BusinessAsUsual,
        existing_prot: None,
        prot_fut: None,
        implementation_start: 2020,
        implementation_end: 2040,
        infrastructure_life: 80,
        benefits_start: 2020,
        ref_year: 2050,
        estimated_costs: None,
        discount_rate: 0.05,
        om_costs: 0.01,
        user_urb_cost: None,
        widget: "table".to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskPayload {
    geogunit_unique_name: Option<String>,
    flood: Option<FloodType>,
    exposure: Option<Exposure>,
    scenario: Option<Scenario>,
    sub_scenario: Option<bool>,
    existing_prot: Option<f64>,
}

// Partial payloads merge over the CLI defaults.
pub fn risk_inputs_from_payload(payload: RiskPayload) -> Result<RiskInputs> {
    let Some(unit) = payload.geogunit_unique_name else {
        return Err(EngineError::invalid_parameters(
            "the geogunitUniqueName field is required",
        ));
    };
    let mut args = default_risk_args(unit);
    if let Some(v) = payload.flood {
        args.flood = v.into();
    }
    if let Some(v) = payload.exposure {
        args.exposure = v.into();
    }
    if let Some(v) = payload.scenario {
        args.scenario = v.into();
    }
    if let Some(v) = payload.sub_scenario {
        args.sub_scenario = v;
    }
    if let Some(v) = payload.existing_prot {
        args.existing_prot = Some(v);
    }
    Ok(args.to_inputs())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CbaPayload {
    geogunit_unique_name: Option<String>,
    scenario: Option<Scenario>,
    existing_prot: Option<f64>,
    prot_fut: Option<f64>,
    implementation_start: Option<u16>,
    implementation_end: Option<u16>,
    infrastructure_life: Option<u16>,
    benefits_start: Option<u16>,
    ref_year: Option<u16>,
    estimated_costs: Option<f64>,
    discount_rate: Option<f64>,
    om_costs: Option<f64>,
    user_urb_cost: Option<f64>,
}

pub fn cba_inputs_from_payload(payload: CbaPayload) -> Result<CbaInputs> {
    let Some(unit) = payload.geogunit_unique_name else {
        return Err(EngineError::invalid_parameters(
            "the geogunitUniqueName field is required",
        ));
    };
    let mut args = default_cba_args(unit);
    if let Some(v) = payload.scenario {
        args.scenario = v.into();
    }
    if let Some(v) = payload.existing_prot {
        args.existing_prot = Some(v);
    }
    if let Some(v) = payload.prot_fut {
        args.prot_fut = Some(v);
    }
    if let Some(v) = payload.implementation_start {
        args.implementation_start = v;
    }
    if let Some(v) = payload.implementation_end {
        args.implementation_end = v;
    }
    if let Some(v) = payload.infrastructure_life {
        args.infrastructure_life = v;
    }
    if let Some(v) = payload.benefits_start {
        args.benefits_start = v;
    }
    if let Some(v) = payload.ref_year {
        args.ref_year = v;
    }
    if let Some(v) = payload.estimated_costs {
        args.estimated_costs = Some(v);
    }
    if let Some(v) = payload.discount_rate {
        args.discount_rate = v;
    }
    if let Some(v) = payload.om_costs {
        args.om_costs = v;
    }
    if let Some(v) = payload.user_urb_cost {
        args.user_urb_cost = Some(v);
    }
    Ok(args.to_inputs())
}

// Every parameter the analysis depends on goes into the key.
pub fn cba_cache_key(inputs: &CbaInputs) -> String {
    cache_key(&[
        ("geogunit_unique_name", Some(inputs.unit.clone())),
        ("existing_prot", inputs.existing_prot.map(|v| v.to_string())),
        ("scenario", Some(inputs.scenario.label().to_string())),
        ("prot_fut", inputs.prot_fut.map(|v| v.to_string())),
        (
            "implementation_start",
            Some(inputs.implementation_start.to_string()),
        ),
        (
            "implementation_end",
            Some(inputs.implementation_end.to_string()),
        ),
        (
            "infrastructure_life",
            Some(inputs.infrastructure_life.to_string()),
        ),
        ("benefits_start", Some(inputs.benefits_start.to_string())),
        ("ref_year", Some(inputs.ref_year.to_string())),
        (
            "estimated_costs",
            inputs.estimated_costs.map(|v| v.to_string()),
        ),
        ("discount_rate", Some(inputs.discount_rate.to_string())),
        ("om_costs", Some(inputs.om_costs.to_string())),
        ("user_urb_cost", inputs.user_urb_cost.map(|v| v.to_string())),
    ])
}

pub fn defaults_cache_key(
    unit: &str,
    flood: FloodType,
    sub_scenario: bool,
    scenario: Scenario,
) -> String {
    cache_key(&[
        ("geogunit_unique_name", Some(unit.to_string())),
        ("flood", Some(flood.label().to_string())),
        ("sub_scenario", Some(sub_scenario.to_string())),
        ("scenario", Some(scenario.label().to_string())),
    ])
}

// The export widget carries no chart type and serializes without the field.
#[derive(Debug, Serialize)]
pub struct WidgetResponse {
    #[serde(rename = "widgetId")]
    pub widget_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    pub meta: Value,
    pub data: Value,
}

#[derive(Debug, Serialize)]
struct CbaSummaryRow {
    bcr: f64,
    #[serde(rename = "avoidedPop")]
    avoided_pop: f64,
    #[serde(rename = "avoidedGdp")]
    avoided_gdp: f64,
}

#[derive(Debug, Serialize)]
struct SeriesRow {
    year: u16,
    c: &'static str,
    value: f64,
}

#[derive(Debug, Serialize)]
struct YearValueRow {
    year: u16,
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BenchmarkRow {
    id: String,
    year: u16,
    #[serde(rename = "type")]
    kind: &'static str,
    value: Option<f64>,
    prot: f64,
}

#[derive(Debug, Serialize)]
struct LpCurveRow {
    c: String,
    year: u16,
    y: f64,
    x: f64,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::computation_failure(format!("cannot serialize response: {e}")))
}

fn meta_with_axis(meta: &CbaMeta, y_axis_title: &str) -> Result<Value> {
    let mut value = to_json(meta)?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "yAxisTitle".to_string(),
            Value::String(y_axis_title.to_string()),
        );
    }
    Ok(value)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

pub fn cba_widget(analysis: &CbaAnalysis, widget: &str) -> Result<WidgetResponse> {
    match widget {
        "table" => cba_summary_table(analysis),
        "annual_costs" => cba_annual_costs(analysis),
        "net_benefits" => cba_net_benefits(analysis),
        "impl_cost" => cba_implementation_cost(analysis),
        "maintenance" => cba_maintenance_cost(analysis),
        "flood_prot" => cba_flood_protection(analysis),
        "export" => cba_export(analysis),
        other => Err(EngineError::invalid_parameters(format!(
            "no cba widget named {other}"
        ))),
    }
}

fn cba_summary_table(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let rows = &analysis.rows;
    let impl_end = analysis.meta.implementation_end;
    let costs: f64 = rows.iter().map(|r| r.gdp_costs_avg).sum();
    let benefits: f64 = rows.iter().map(|r| r.urb_benefits_avg).sum();
    let avoided_after_build = |column: fn(&AnnualCbaRow) -> f64| {
        rows.iter()
            .filter(|r| r.year >= impl_end)
            .map(column)
            .sum::<f64>()
            .round()
    };
    let summary = CbaSummaryRow {
        bcr: round_to(costs / benefits, 5),
        avoided_pop: avoided_after_build(|r| r.pop_benefits_avg),
        avoided_gdp: avoided_after_build(|r| r.gdp_benefits_avg),
    };
    Ok(WidgetResponse {
        widget_id: "table".to_string(),
        chart_type: Some("table".to_string()),
        meta: to_json(&analysis.meta)?,
        data: to_json(&[summary])?,
    })
}

fn cba_annual_costs(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let mut data = Vec::with_capacity(analysis.rows.len() * 2);
    for row in &analysis.rows {
        data.push(SeriesRow {
            year: row.year,
            c: "Benefits",
            value: row.urb_benefits_avg,
        });
    }
    for row in &analysis.rows {
        data.push(SeriesRow {
            year: row.year,
            c: "Costs",
            value: row.gdp_costs_avg,
        });
    }
    Ok(WidgetResponse {
        widget_id: "annual_costs".to_string(),
        chart_type: Some("multi-line".to_string()),
        meta: meta_with_axis(&analysis.meta, "Cost and Benefits ($)")?,
        data: to_json(&data)?,
    })
}

fn cba_net_benefits(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let mut cum_benefits = 0.0;
    let mut cum_costs = 0.0;
    let mut data = Vec::with_capacity(analysis.rows.len());
    for row in &analysis.rows {
        cum_benefits += row.urb_benefits_avg;
        cum_costs += row.gdp_costs_avg;
        data.push(YearValueRow {
            year: row.year,
            value: Some(cum_benefits - cum_costs),
        });
    }
    Ok(WidgetResponse {
        widget_id: "net_benefits".to_string(),
        chart_type: Some("bar".to_string()),
        meta: meta_with_axis(&analysis.meta, "Cumulative Net Benefits ($)")?,
        data: to_json(&data)?,
    })
}

fn cba_implementation_cost(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let meta = &analysis.meta;
    let first_year = match analysis.rows.first() {
        Some(row) => row.year,
        None => {
            return Err(EngineError::computation_failure(
                "the annual frame is empty",
            ));
        }
    };
    let scale = 1.0 + meta.discount;
    let mut data = Vec::with_capacity(analysis.rows.len());
    for row in &analysis.rows {
        let value = if row.year >= meta.implementation_end {
            0.0
        } else {
            let exponent = i32::from(row.year) - i32::from(first_year) + 1;
            row.gdp_costs_avg * scale.powi(exponent) / IMPL_COST_DISPLAY_DIVISOR
        };
        data.push(YearValueRow {
            year: row.year,
            value: Some(value),
        });
    }
    Ok(WidgetResponse {
        widget_id: "impl_cost".to_string(),
        chart_type: Some("bar".to_string()),
        meta: meta_with_axis(meta, "Implementation Cost ($)")?,
        data: to_json(&data)?,
    })
}

// Maintenance grows with the cumulative spend over the build years, then
// holds flat for the rest of the lifetime, discounted back to present.
fn cba_maintenance_cost(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let meta = &analysis.meta;
    let build_years = i32::from(meta.implementation_end) - i32::from(meta.implementation_start);
    let completed_cost = analysis
        .rows
        .iter()
        .find(|r| r.year == meta.implementation_end)
        .map(|r| r.gdp_costs_avg)
        .ok_or_else(|| {
            EngineError::computation_failure("the completion year is missing from the annual frame")
        })?;
    let scale = 1.0 + meta.discount;
    let cost = completed_cost * scale.powi(build_years);
    let per_build_year = cost / f64::from(build_years);

    let mut series = Vec::with_capacity(analysis.rows.len());
    let mut cumulative = 0.0;
    for _ in 0..build_years {
        cumulative += per_build_year;
        series.push(cumulative * meta.om);
    }
    let hold = series.last().copied().unwrap_or(0.0);
    while series.len() < analysis.rows.len() {
        series.push(hold);
    }

    let mut data = Vec::with_capacity(analysis.rows.len());
    for (row, maintenance) in analysis.rows.iter().zip(&series) {
        let exponent = i32::from(row.year) - i32::from(meta.implementation_start) + 1;
        data.push(YearValueRow {
            year: row.year,
            value: Some(maintenance / scale.powi(exponent)),
        });
    }
    Ok(WidgetResponse {
        widget_id: "maintenance".to_string(),
        chart_type: Some("bar".to_string()),
        meta: meta_with_axis(meta, "Operation & Maintenance Cost($)")?,
        data: to_json(&data)?,
    })
}

fn cba_flood_protection(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    let meta = &analysis.meta;
    let mut data = Vec::with_capacity(analysis.rows.len());
    for row in &analysis.rows {
        // Present level until benefits start, target level once construction
        // is done, a gap while the works are in progress.
        let value = if row.year <= meta.benefits_start {
            row.prot_present_avg
        } else if row.year >= meta.implementation_end {
            row.prot_future_avg
        } else {
            None
        };
        data.push(YearValueRow {
            year: row.year,
            value,
        });
    }
    Ok(WidgetResponse {
        widget_id: "flood_prot".to_string(),
        chart_type: Some("line".to_string()),
        meta: meta_with_axis(meta, "Protection level (Return period)")?,
        data: to_json(&data)?,
    })
}

fn cba_export(analysis: &CbaAnalysis) -> Result<WidgetResponse> {
    Ok(WidgetResponse {
        widget_id: String::new(),
        chart_type: None,
        meta: to_json(&analysis.meta)?,
        data: to_json(&analysis.rows)?,
    })
}

// Most widgets are column views over the finished assessment; benchmark and
// lp_curve go back to the store for peer and curve data.
pub fn risk_widget(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &RiskInputs,
    assessment: &RiskAssessment,
    widget: &str,
) -> Result<WidgetResponse> {
    let data = match widget {
        "table" => select_columns(&assessment.rows, RISK_TABLE_COLUMNS)?,
        "annual_flood" => select_columns(&assessment.rows, ANNUAL_FLOOD_COLUMNS)?,
        "flood_drivers" => select_columns(&assessment.rows, FLOOD_DRIVERS_COLUMNS)?,
        "benchmark" => benchmark_rows(store, catalog, inputs, assessment)?,
        "lp_curve" => lp_curve_rows(store, catalog, inputs)?,
        other => {
            return Err(EngineError::invalid_parameters(format!(
                "no risk widget named {other}"
            )));
        }
    };
    Ok(WidgetResponse {
        widget_id: widget.to_string(),
        chart_type: Some(widget.to_string()),
        meta: to_json(&assessment.meta)?,
        data,
    })
}

fn select_columns(rows: &[RiskYearRow], columns: &[&str]) -> Result<Value> {
    let mut data = Vec::with_capacity(rows.len());
    for row in rows {
        let full = to_json(row)?;
        let mut record = serde_json::Map::new();
        if let Some(map) = full.as_object() {
            for &column in columns {
                if let Some(value) = map.get(column) {
                    record.insert(column.to_string(), value.clone());
                }
            }
        }
        data.push(Value::Object(record));
    }
    Ok(Value::Array(data))
}

// Default-protection assessments for every peer, melted into percentage rows
// followed by total-damage rows. Peers without data are left out rather than
// failing the whole widget.
fn benchmark_rows(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &RiskInputs,
    assessment: &RiskAssessment,
) -> Result<Value> {
    let peers = store.peer_units(&assessment.meta.geogunit_type)?;
    let mut assessments = Vec::with_capacity(peers.len());
    for peer in peers {
        let peer_inputs = RiskInputs {
            unit: peer.clone(),
            existing_prot: None,
            ..inputs.clone()
        };
        match assess_risk(store, catalog, &peer_inputs) {
            Ok(peer_assessment) => assessments.push((peer, peer_assessment)),
            Err(e) => debug!(
                unit = peer.as_str(),
                error = %e,
                "skipping peer without benchmark data"
            ),
        }
    }

    let mut data = Vec::new();
    for kind in ["per", "tot"] {
        for &year in &catalog.snapshot_years {
            for (peer, peer_assessment) in &assessments {
                let Some(row) = peer_assessment.rows.iter().find(|r| r.year == year) else {
                    continue;
                };
                data.push(BenchmarkRow {
                    id: peer.clone(),
                    year,
                    kind,
                    value: if kind == "per" {
                        row.percent_damage_avg
                    } else {
                        Some(row.annual_damage_avg)
                    },
                    prot: row.flood_protection,
                });
            }
        }
    }
    to_json(&data)
}

// One point series per model and future snapshot year, under the scenario's
// full pathway combination.
fn lp_curve_rows(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &RiskInputs,
) -> Result<Value> {
    let spec = inputs.scenario.spec();
    let subsidence = inputs.effective_subsidence();
    let mut data = Vec::new();
    for model in catalog.models(inputs.flood) {
        for &year in &catalog.snapshot_years[1..] {
            let key = CurveKey::new(spec.climate, model, spec.socio, subsidence, year);
            let impacts = store.impact_curve(&inputs.unit, inputs.flood, inputs.exposure, &key)?;
            for (rp, impact) in catalog.return_periods.iter().zip(&impacts) {
                data.push(LpCurveRow {
                    c: model.clone(),
                    year,
                    y: *impact,
                    x: *rp,
                });
            }
        }
    }
    to_json(&data)
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn execute(&self) -> Result<String> {
        debug!(data = %self.data.display(), "loading the hazard store");
        let store = MemoryStore::from_path(&self.data)?;
        let catalog = ModelCatalog::standard();
        let cache = MemoryCache::new();
        match &self.command {
            Command::Risk(args) => {
                let inputs = args.to_inputs();
                let assessment = assess_risk(&store, &catalog, &inputs)?;
                render(&risk_widget(
                    &store,
                    &catalog,
                    &inputs,
                    &assessment,
                    &args.widget,
                )?)
            }
            Command::Cba(args) => {
                let inputs = args.to_inputs();
                let analysis = get_or_compute(&cache, &cba_cache_key(&inputs), || {
                    analyze_cba(&store, &catalog, &inputs)
                })?;
                render(&cba_widget(&analysis, &args.widget)?)
            }
            Command::Defaults(args) => {
                let flood = FloodType::from(args.flood);
                let scenario = Scenario::from(args.scenario);
                let key = defaults_cache_key(&args.unit, flood, args.sub_scenario, scenario);
                let defaults = get_or_compute(&cache, &key, || {
                    cba_defaults(
                        &store,
                        &catalog,
                        &args.unit,
                        flood,
                        args.sub_scenario,
                        scenario,
                    )
                })?;
                render(&defaults)
            }
        }
    }
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::computation_failure(format!("cannot render response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_meta() -> CbaMeta {
        CbaMeta {
            geogunit_name: "Testland".to_string(),
            geogunit_type: "country".to_string(),
            scenario: Scenario::BusinessAsUsual,
            average_protection: 10.0,
            starting_protection: 10.0,
            future_protection: 100.0,
            reference_year: 2030,
            implementation_start: 2020,
            implementation_end: 2022,
            infrastructure_lifespan: 4,
            estimated_costs: None,
            benefits_start: 2020,
            discount: 0.0,
            om: 0.01,
            gdp_costs: 1.0e6,
        }
    }

    fn sample_row(year: u16) -> AnnualCbaRow {
        AnnualCbaRow {
            year,
            pop_costs_avg: 2.0,
            pop_costs_min: 2.0,
            pop_costs_max: 2.0,
            gdp_costs_avg: 2.0,
            gdp_costs_min: 2.0,
            gdp_costs_max: 2.0,
            urb_benefits_avg: 6.0,
            urb_benefits_min: 5.0,
            urb_benefits_max: 7.0,
            pop_benefits_avg: 1.4,
            pop_benefits_min: 1.0,
            pop_benefits_max: 2.0,
            gdp_benefits_avg: 2.6,
            gdp_benefits_min: 2.0,
            gdp_benefits_max: 3.0,
            prot_present_avg: Some(10.0),
            prot_present_min: Some(10.0),
            prot_present_max: Some(10.0),
            prot_future_avg: Some(100.0),
            prot_future_min: Some(100.0),
            prot_future_max: Some(100.0),
        }
    }

    fn sample_analysis() -> CbaAnalysis {
        CbaAnalysis {
            meta: sample_meta(),
            rows: (2020..=2024).map(sample_row).collect(),
        }
    }

    fn rows_of(widget: &WidgetResponse) -> Vec<Value> {
        widget.data.as_array().expect("data is an array").clone()
    }

    #[test]
    fn summary_table_rounds_the_benefit_cost_ratio() {
        // Costs sum to 10 against 30 of benefits, so the ratio is one third
        // rounded to five decimals; the avoided sums cover 2022 onwards.
        let widget = cba_widget(&sample_analysis(), "table").unwrap();
        assert_eq!(widget.widget_id, "table");
        assert_eq!(widget.chart_type.as_deref(), Some("table"));
        let rows = rows_of(&widget);
        assert_eq!(rows.len(), 1);
        assert_approx(rows[0]["bcr"].as_f64().unwrap(), 0.33333);
        assert_approx(rows[0]["avoidedPop"].as_f64().unwrap(), 4.0);
        assert_approx(rows[0]["avoidedGdp"].as_f64().unwrap(), 8.0);
        assert!(widget.meta.get("yAxisTitle").is_none());
        assert_eq!(widget.meta["geogunitName"].as_str().unwrap(), "Testland");
    }

    #[test]
    fn degenerate_summary_serializes_the_ratio_as_null() {
        let mut analysis = sample_analysis();
        for row in &mut analysis.rows {
            row.urb_benefits_avg = 0.0;
            row.gdp_costs_avg = 0.0;
        }
        let widget = cba_widget(&analysis, "table").unwrap();
        let rows = rows_of(&widget);
        assert!(rows[0]["bcr"].is_null());
    }

    #[test]
    fn annual_cost_rows_put_benefits_before_costs() {
        let widget = cba_widget(&sample_analysis(), "annual_costs").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("multi-line"));
        assert_eq!(
            widget.meta["yAxisTitle"].as_str().unwrap(),
            "Cost and Benefits ($)"
        );
        let rows = rows_of(&widget);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0]["year"].as_u64().unwrap(), 2020);
        assert_eq!(rows[0]["c"].as_str().unwrap(), "Benefits");
        assert_approx(rows[0]["value"].as_f64().unwrap(), 6.0);
        assert_eq!(rows[4]["c"].as_str().unwrap(), "Benefits");
        assert_eq!(rows[5]["year"].as_u64().unwrap(), 2020);
        assert_eq!(rows[5]["c"].as_str().unwrap(), "Costs");
        assert_approx(rows[5]["value"].as_f64().unwrap(), 2.0);
    }

    #[test]
    fn net_benefit_rows_accumulate_the_running_difference() {
        let widget = cba_widget(&sample_analysis(), "net_benefits").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("bar"));
        assert_eq!(
            widget.meta["yAxisTitle"].as_str().unwrap(),
            "Cumulative Net Benefits ($)"
        );
        let rows = rows_of(&widget);
        for (i, row) in rows.iter().enumerate() {
            // Each year adds 6 of benefit against 2 of cost.
            assert_approx(row["value"].as_f64().unwrap(), 4.0 * (i as f64 + 1.0));
        }
    }

    #[test]
    fn implementation_cost_stops_at_the_completion_year() {
        let widget = cba_widget(&sample_analysis(), "impl_cost").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("bar"));
        let rows = rows_of(&widget);
        assert_approx(rows[0]["value"].as_f64().unwrap(), 2.0 / 10.1);
        assert_approx(rows[1]["value"].as_f64().unwrap(), 2.0 / 10.1);
        assert_approx(rows[2]["value"].as_f64().unwrap(), 0.0);
        assert_approx(rows[4]["value"].as_f64().unwrap(), 0.0);

        let mut analysis = sample_analysis();
        analysis.meta.discount = 0.05;
        let widget = cba_widget(&analysis, "impl_cost").unwrap();
        let rows = rows_of(&widget);
        // The second build year compounds two steps from the pre-start base.
        assert_approx(
            rows[1]["value"].as_f64().unwrap(),
            2.0 * 1.05f64.powi(2) / 10.1,
        );
    }

    #[test]
    fn maintenance_costs_accumulate_during_the_build_then_hold() {
        let mut analysis = sample_analysis();
        for row in &mut analysis.rows {
            row.gdp_costs_avg = 200.0;
        }
        let widget = cba_widget(&analysis, "maintenance").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("bar"));
        assert_eq!(
            widget.meta["yAxisTitle"].as_str().unwrap(),
            "Operation & Maintenance Cost($)"
        );
        // Two build years of 100 each: cumulative spend 100 then 200, at a
        // 1% rate that is 1 then 2, held flat afterwards, undiscounted.
        let rows = rows_of(&widget);
        let expected = [1.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(rows.len(), expected.len());
        for (row, want) in rows.iter().zip(expected) {
            assert_approx(row["value"].as_f64().unwrap(), want);
        }

        let mut analysis = analysis.clone();
        analysis.meta.om = 0.02;
        let widget = cba_widget(&analysis, "maintenance").unwrap();
        let rows = rows_of(&widget);
        assert_approx(rows[0]["value"].as_f64().unwrap(), 2.0);
        assert_approx(rows[4]["value"].as_f64().unwrap(), 4.0);
    }

    #[test]
    fn protection_widget_blanks_the_construction_gap() {
        let widget = cba_widget(&sample_analysis(), "flood_prot").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("line"));
        assert_eq!(
            widget.meta["yAxisTitle"].as_str().unwrap(),
            "Protection level (Return period)"
        );
        let rows = rows_of(&widget);
        assert_approx(rows[0]["value"].as_f64().unwrap(), 10.0);
        assert!(rows[1]["value"].is_null());
        assert_approx(rows[2]["value"].as_f64().unwrap(), 100.0);
        assert_approx(rows[4]["value"].as_f64().unwrap(), 100.0);
    }

    #[test]
    fn export_widget_returns_the_whole_frame_unkeyed() {
        let widget = cba_widget(&sample_analysis(), "export").unwrap();
        assert_eq!(widget.widget_id, "");
        assert!(widget.chart_type.is_none());
        let serialized = serde_json::to_value(&widget).unwrap();
        assert!(serialized.get("chart_type").is_none());
        let rows = rows_of(&widget);
        assert_eq!(rows.len(), 5);
        assert!(rows[0].get("pop_costs_avg").is_some());
        assert!(rows[0].get("prot_present_avg").is_some());
    }

    #[test]
    fn unknown_widget_names_are_invalid() {
        let err = cba_widget(&sample_analysis(), "pie").unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
        assert!(err.to_string().contains("pie"));
    }

    #[test]
    fn cba_payload_merges_over_cli_defaults() {
        let payload: CbaPayload = serde_json::from_str(
            r#"{
                "geogunitUniqueName": "Testland",
                "protFut": 500.0,
                "scenario": "rcp4p5",
                "discountRate": 0.03
            }"#,
        )
        .unwrap();
        let inputs = cba_inputs_from_payload(payload).unwrap();
        assert_eq!(inputs.unit, "Testland");
        assert_eq!(inputs.prot_fut, Some(500.0));
        assert_eq!(inputs.scenario, Scenario::Optimistic);
        assert_approx(inputs.discount_rate, 0.03);
        assert_eq!(inputs.implementation_end, 2040);
        assert_eq!(inputs.infrastructure_life, 80);
        assert_approx(inputs.om_costs, 0.01);
        assert_eq!(inputs.existing_prot, None);
    }

    #[test]
    fn payloads_require_the_unit_name() {
        let err = cba_inputs_from_payload(CbaPayload::default()).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
        assert!(err.to_string().contains("geogunitUniqueName"));
        let err = risk_inputs_from_payload(RiskPayload::default()).unwrap_err();
        assert!(err.to_string().contains("geogunitUniqueName"));
    }

    #[test]
    fn risk_payload_parses_wire_labels() {
        let payload: RiskPayload = serde_json::from_str(
            r#"{
                "geogunitUniqueName": "Testland",
                "flood": "coastal",
                "exposure": "gdpexp",
                "subScenario": true,
                "existingProt": 25.0
            }"#,
        )
        .unwrap();
        let inputs = risk_inputs_from_payload(payload).unwrap();
        assert_eq!(inputs.flood, FloodType::Coastal);
        assert_eq!(inputs.exposure, Exposure::Gdp);
        assert!(inputs.sub_scenario);
        assert_eq!(inputs.existing_prot, Some(25.0));
        assert_eq!(inputs.scenario, Scenario::BusinessAsUsual);
    }

    #[test]
    fn cache_keys_sort_parameters_by_name() {
        let inputs = default_cba_args("Testland".to_string()).to_inputs();
        assert_eq!(
            cba_cache_key(&inputs),
            "2020_0.05_null_null_Testland_2040_2020_80_0.01_null_2050_business as usual_null"
        );
        assert_eq!(
            defaults_cache_key(
                "Testland",
                FloodType::Riverine,
                false,
                Scenario::BusinessAsUsual
            ),
            "riverine_Testland_business as usual_false"
        );
    }

    #[test]
    fn cli_parses_long_flags_with_defaults() {
        let cli = Cli::try_parse_from([
            "floodrisk",
            "--data",
            "fixtures.json",
            "cba",
            "--unit",
            "Testland",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "warn");
        let Command::Cba(args) = &cli.command else {
            panic!("expected the cba subcommand");
        };
        assert_eq!(args.unit, "Testland");
        assert_eq!(args.implementation_start, 2020);
        assert_eq!(args.implementation_end, 2040);
        assert_eq!(args.infrastructure_life, 80);
        assert_approx(args.discount_rate, 0.05);
        assert_eq!(args.widget, "table");

        let cli = Cli::try_parse_from([
            "floodrisk",
            "--data",
            "fixtures.json",
            "--log-level",
            "debug",
            "risk",
            "--unit",
            "Testland",
            "--flood",
            "coastal",
            "--sub-scenario",
            "--widget",
            "lp_curve",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "debug");
        let Command::Risk(args) = &cli.command else {
            panic!("expected the risk subcommand");
        };
        assert_eq!(args.flood, CliFlood::Coastal);
        assert!(args.sub_scenario);
        assert_eq!(args.widget, "lp_curve");
    }

    fn widget_store() -> MemoryStore {
        let country = |name: &str, protection: f64| {
            json!({
                "name": name,
                "unit_type": "country",
                "ppp_rate": 1.0,
                "construction_index": 1.0,
                "curves": {
                    "riverine": {
                        "urban_damage_v2": {
                            "histor_wt_base_nosub_2010": [0.0, 10.0, 20.0],
                            "rcp8p5_aa_base_nosub_2030": [0.0, 10.0, 20.0],
                            "histor_wt_ssp2_nosub_2030": [0.0, 15.0, 30.0],
                            "rcp8p5_aa_ssp2_nosub_2030": [0.0, 20.0, 40.0]
                        }
                    }
                },
                "assets": {
                    "urban_damage_v2": {"ssp2": {"2010": 100.0, "2030": 200.0}}
                },
                "protection": {"riverine": {"nosub": {"bau": protection}}}
            })
        };
        let document = json!({
            "units": [
                country("Aland", 2.0),
                country("Bland", 10.0),
                {
                    "name": "Cland",
                    "unit_type": "country",
                    "ppp_rate": 1.0,
                    "construction_index": 1.0
                },
                {
                    "name": "Port Town",
                    "unit_type": "city",
                    "ppp_rate": 1.0,
                    "construction_index": 1.0
                }
            ]
        })
        .to_string();
        MemoryStore::from_json(&document).unwrap()
    }

    fn widget_catalog() -> ModelCatalog {
        ModelCatalog {
            riverine_models: vec!["aa".to_string()],
            coastal_models: vec!["95".to_string()],
            snapshot_years: vec![2010, 2030],
            return_periods: vec![2.0, 10.0, 100.0],
            rp_infinite: 1e5,
            horizon_cap: 2100,
            fully_protected_units: vec!["Netherlands".to_string()],
            max_protection: 1000.0,
        }
    }

    fn widget_inputs() -> RiskInputs {
        RiskInputs {
            unit: "Aland".to_string(),
            flood: FloodType::Riverine,
            exposure: Exposure::UrbanDamage,
            scenario: Scenario::BusinessAsUsual,
            sub_scenario: false,
            existing_prot: None,
        }
    }

    fn widget_assessment() -> RiskAssessment {
        assess_risk(&widget_store(), &widget_catalog(), &widget_inputs()).unwrap()
    }

    #[test]
    fn risk_table_keeps_the_headline_columns() {
        let store = widget_store();
        let catalog = widget_catalog();
        let inputs = widget_inputs();
        let assessment = widget_assessment();
        let widget = risk_widget(&store, &catalog, &inputs, &assessment, "table").unwrap();
        assert_eq!(widget.widget_id, "table");
        assert_eq!(widget.chart_type.as_deref(), Some("table"));
        assert_approx(widget.meta["Average Protection"].as_f64().unwrap(), 2.0);
        assert_eq!(
            widget.meta["Scenario"].as_str().unwrap(),
            "business as usual"
        );
        let rows = rows_of(&widget);
        assert_eq!(rows.len(), 2);
        let record = rows[0].as_object().unwrap();
        assert_eq!(record.len(), 5);
        assert!(record.contains_key("index"));
        assert!(record.contains_key("Flood_Protection"));
        assert!(!record.contains_key("CC_Driver_Avg"));
    }

    #[test]
    fn flood_driver_rows_carry_the_attribution_columns() {
        let store = widget_store();
        let catalog = widget_catalog();
        let inputs = widget_inputs();
        let assessment = widget_assessment();
        let widget = risk_widget(&store, &catalog, &inputs, &assessment, "flood_drivers").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("flood_drivers"));
        let rows = rows_of(&widget);
        let record = rows[1].as_object().unwrap();
        assert_eq!(record.len(), 12);
        assert!(record.contains_key("Sub_Driver"));
        assert!(record.contains_key("CC_Driver_Max"));
    }

    #[test]
    fn benchmark_lines_up_peers_of_the_same_type() {
        let store = widget_store();
        let catalog = widget_catalog();
        let inputs = widget_inputs();
        let assessment = widget_assessment();
        let widget = risk_widget(&store, &catalog, &inputs, &assessment, "benchmark").unwrap();
        let rows = rows_of(&widget);
        // Two peers with data, two years, a percentage and a total block;
        // the city and the unit without curves stay out.
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| {
            let id = r["id"].as_str().unwrap();
            id == "Aland" || id == "Bland"
        }));

        assert_eq!(rows[0]["id"].as_str().unwrap(), "Aland");
        assert_eq!(rows[0]["year"].as_u64().unwrap(), 2010);
        assert_eq!(rows[0]["type"].as_str().unwrap(), "per");
        assert_approx(rows[0]["prot"].as_f64().unwrap(), 2.0);
        assert_eq!(rows[1]["id"].as_str().unwrap(), "Bland");
        assert_approx(rows[1]["prot"].as_f64().unwrap(), 10.0);

        assert_eq!(rows[4]["type"].as_str().unwrap(), "tot");
        assert_eq!(rows[4]["year"].as_u64().unwrap(), 2010);
        // Total damage for Aland 2010 with protection 2 on the [2, 10, 100]
        // axis integrates to 3.5498.
        assert!((rows[4]["value"].as_f64().unwrap() - 3.5498).abs() < 1e-3);
    }

    #[test]
    fn lp_curve_plots_future_total_curves() {
        let store = widget_store();
        let catalog = widget_catalog();
        let inputs = widget_inputs();
        let assessment = widget_assessment();
        let widget = risk_widget(&store, &catalog, &inputs, &assessment, "lp_curve").unwrap();
        assert_eq!(widget.chart_type.as_deref(), Some("lp_curve"));
        let rows = rows_of(&widget);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["c"].as_str().unwrap(), "aa");
        assert_eq!(rows[0]["year"].as_u64().unwrap(), 2030);
        assert_approx(rows[0]["x"].as_f64().unwrap(), 2.0);
        assert_approx(rows[0]["y"].as_f64().unwrap(), 0.0);
        assert_approx(rows[1]["x"].as_f64().unwrap(), 10.0);
        assert_approx(rows[1]["y"].as_f64().unwrap(), 20.0);
        assert_approx(rows[2]["x"].as_f64().unwrap(), 100.0);
        assert_approx(rows[2]["y"].as_f64().unwrap(), 40.0);
    }

    #[test]
    fn unknown_risk_widgets_are_invalid() {
        let store = widget_store();
        let catalog = widget_catalog();
        let inputs = widget_inputs();
        let assessment = widget_assessment();
        let err = risk_widget(&store, &catalog, &inputs, &assessment, "sankey").unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
    }
}
