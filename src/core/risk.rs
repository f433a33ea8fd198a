use tracing::debug;

use crate::core::curve::{LinearCurve, linspace, nan_max, nan_mean, nan_min, zero_non_finite};
use crate::core::error::{EngineError, Result};
use crate::core::store::ImpactStore;
use crate::core::types::{
    ClimatePathway, CurveKey, Exposure, FloodType, ModelCatalog, RiskAssessment, RiskInputs,
    RiskMeta, RiskYearRow, Scenario, SocioPathway,
};

const GRID_POINTS: usize = 10_000;
const SHARE_EPSILON: f64 = 1e-9;

// The tail at rp_infinite repeats the last impact; the resampled grid is
// zeroed above the exceedance probability 1/protection before the trapezoid
// integration. Zero protection zeroes nothing and yields the full integral.
pub fn expected_annual_impact(
    impacts: &[f64],
    rps: &[f64],
    protection: f64,
    rp_infinite: f64,
) -> Result<f64> {
    if impacts.len() != rps.len() {
        return Err(EngineError::invalid_parameters(format!(
            "impact curve has {} values for {} return periods",
            impacts.len(),
            rps.len()
        )));
    }
    if rps.is_empty() {
        return Err(EngineError::invalid_parameters(
            "impact curve has no return periods",
        ));
    }
    if rps[0] <= 0.0 || rps.iter().any(|rp| !rp.is_finite()) {
        return Err(EngineError::invalid_parameters(
            "return periods must be finite and positive",
        ));
    }
    for pair in rps.windows(2) {
        if pair[1] <= pair[0] {
            return Err(EngineError::invalid_parameters(
                "return periods must be strictly increasing",
            ));
        }
    }
    if impacts.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::invalid_parameters(
            "impact values must be finite",
        ));
    }
    if !rp_infinite.is_finite() || rp_infinite <= rps[rps.len() - 1] {
        return Err(EngineError::invalid_parameters(
            "the infinite return period must exceed the largest curve return period",
        ));
    }
    if !protection.is_finite() || protection < 0.0 {
        return Err(EngineError::invalid_parameters(
            "protection must be a non-negative return period",
        ));
    }

    let (probs, values) = repeat_last_tail(impacts, rps, rp_infinite);
    let curve = LinearCurve::new(probs, values)?;

    let grid = linspace(1.0 / rp_infinite, 1.0 / rps[0], GRID_POINTS);
    let cutoff = 1.0 / protection;
    let resampled: Vec<f64> = grid
        .iter()
        .map(|&p| if p > cutoff { 0.0 } else { curve.value_clamped(p) })
        .collect();

    let mut total = 0.0;
    for i in 1..grid.len() {
        total += (resampled[i - 1] + resampled[i]) * 0.5 * (grid[i] - grid[i - 1]);
    }
    Ok(total)
}

// Ascending probability axis; the appended rp_infinite point comes first.
fn repeat_last_tail(impacts: &[f64], rps: &[f64], rp_infinite: f64) -> (Vec<f64>, Vec<f64>) {
    let n = rps.len();
    let mut probs = Vec::with_capacity(n + 1);
    let mut values = Vec::with_capacity(n + 1);
    probs.push(1.0 / rp_infinite);
    values.push(impacts[n - 1]);
    for i in (0..n).rev() {
        probs.push(1.0 / rps[i]);
        values.push(impacts[i]);
    }
    (probs, values)
}

// The return period at which the target curve reaches the impact the
// reference curve has at the given protection. None when the target is
// identically zero and carries no signal to invert.
pub fn transferred_protection(
    rps: &[f64],
    reference: &[f64],
    target: &[f64],
    protection: f64,
) -> Result<Option<f64>> {
    if reference.len() != rps.len() || target.len() != rps.len() {
        return Err(EngineError::invalid_parameters(
            "transfer curves must match the return period axis",
        ));
    }
    if target.iter().sum::<f64>() == 0.0 {
        return Ok(None);
    }
    let reference_curve = LinearCurve::new(rps.to_vec(), reference.to_vec())?;
    let impact = reference_curve.value_clamped(protection);
    let target_curve = LinearCurve::new(rps.to_vec(), target.to_vec())?;
    Ok(Some(target_curve.invert_at(impact)?))
}

// An uninvertible target keeps the original protection.
pub fn transfer_or_keep(
    rps: &[f64],
    reference: &[f64],
    target: &[f64],
    protection: f64,
) -> Result<f64> {
    Ok(transferred_protection(rps, reference, target, protection)?.unwrap_or(protection))
}

// Caller override first, then the full-protection cap, then the modelled
// default from the store.
pub(crate) fn resolve_protection(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    unit: &str,
    display_name: &str,
    flood: FloodType,
    subsidence: bool,
    scenario: Scenario,
    override_prot: Option<f64>,
) -> Result<f64> {
    let protection = match override_prot {
        Some(p) => p,
        None if catalog.fully_protected(display_name) => catalog.max_protection,
        None => store.protection_default(unit, flood, subsidence, scenario)?,
    };
    if !protection.is_finite() || protection < 0.0 {
        return Err(EngineError::invalid_parameters(
            "existing protection must be a non-negative return period",
        ));
    }
    Ok(protection)
}

struct ChannelDamages {
    cc: f64,
    soc: f64,
    sub: f64,
    tot: f64,
    protection: f64,
}

struct YearStats {
    tot_avg: f64,
    tot_min: f64,
    tot_max: f64,
    cc_avg: f64,
    cc_min: f64,
    cc_max: f64,
    soc_avg: f64,
    sub_avg: f64,
    prot_avg: f64,
}

pub fn assess_risk(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &RiskInputs,
) -> Result<RiskAssessment> {
    debug!(
        unit = inputs.unit.as_str(),
        flood = inputs.flood.label(),
        scenario = inputs.scenario.label(),
        "assessing flood risk"
    );

    let info = store.unit_info(&inputs.unit)?;
    let spec = inputs.scenario.spec();
    let subsidence = inputs.effective_subsidence();
    let rps = &catalog.return_periods;
    let histor = catalog.historical_model(inputs.flood);

    let prot_present = resolve_protection(
        store,
        catalog,
        &inputs.unit,
        &info.name,
        inputs.flood,
        subsidence,
        inputs.scenario,
        inputs.existing_prot,
    )?;

    let base_key = CurveKey::new(
        ClimatePathway::Historical,
        histor,
        SocioPathway::Base,
        subsidence,
        catalog.snapshot_years[0],
    );
    let urb_2010 =
        store.impact_curve(&inputs.unit, inputs.flood, Exposure::UrbanDamage, &base_key)?;
    let dam_2010 = store.impact_curve(&inputs.unit, inputs.flood, inputs.exposure, &base_key)?;
    let tot_2010 =
        expected_annual_impact(&dam_2010, rps, prot_present, catalog.rp_infinite)?;

    let mut rows = Vec::with_capacity(catalog.snapshot_years.len());
    let assets_2010 =
        store.asset_value(&inputs.unit, inputs.exposure, spec.socio, catalog.snapshot_years[0])?;
    rows.push(RiskYearRow {
        year: catalog.snapshot_years[0],
        annual_damage_avg: tot_2010,
        annual_damage_min: None,
        annual_damage_max: None,
        asset_value: assets_2010,
        flood_protection: prot_present,
        percent_damage_avg: percent_damage(tot_2010, assets_2010),
        percent_damage_min: None,
        percent_damage_max: None,
        cc_driver_avg: 0.0,
        cc_driver_min: None,
        cc_driver_max: None,
        soc_driver: 0.0,
        sub_driver: 0.0,
    });

    for &year in &catalog.snapshot_years[1..] {
        let mut channels = Vec::new();
        for model in catalog.models(inputs.flood) {
            channels.push(model_damages(
                store, catalog, inputs, model, histor, spec.climate, spec.socio, subsidence,
                year, &urb_2010, prot_present,
            )?);
        }
        let stats = ensemble_stats(&channels);
        let assets =
            store.asset_value(&inputs.unit, inputs.exposure, spec.socio, year)?;
        rows.push(attributed_row(year, &stats, tot_2010, subsidence, assets));
    }

    Ok(RiskAssessment {
        meta: RiskMeta {
            flood: inputs.flood,
            geogunit_name: info.name,
            geogunit_type: info.unit_type,
            scenario: inputs.scenario,
            exposure: inputs.exposure,
            average_protection: prot_present,
        },
        rows,
    })
}

// Every channel shares the protection transferred through the urban hazard
// change for this model and year.
fn model_damages(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &RiskInputs,
    model: &str,
    histor: &str,
    climate: ClimatePathway,
    socio: SocioPathway,
    subsidence: bool,
    year: u16,
    urb_2010: &[f64],
    prot_present: f64,
) -> Result<ChannelDamages> {
    let rps = &catalog.return_periods;
    let urb_key = CurveKey::new(climate, model, SocioPathway::Base, subsidence, year);
    let urb_year =
        store.impact_curve(&inputs.unit, inputs.flood, Exposure::UrbanDamage, &urb_key)?;
    let protection = transferred_protection(rps, urb_2010, &urb_year, prot_present)?;
    let effective = protection.unwrap_or(0.0);

    let fetch = |climate, model: &str, socio| {
        store.impact_curve(
            &inputs.unit,
            inputs.flood,
            inputs.exposure,
            &CurveKey::new(climate, model, socio, subsidence, year),
        )
    };
    let cc_curve = fetch(climate, model, SocioPathway::Base)?;
    let soc_curve = fetch(ClimatePathway::Historical, histor, socio)?;
    let tot_curve = fetch(climate, model, socio)?;

    let cc = expected_annual_impact(&cc_curve, rps, effective, catalog.rp_infinite)?;
    let soc = expected_annual_impact(&soc_curve, rps, effective, catalog.rp_infinite)?;
    let tot = expected_annual_impact(&tot_curve, rps, effective, catalog.rp_infinite)?;
    let sub = if subsidence {
        let sub_curve = fetch(ClimatePathway::Historical, histor, SocioPathway::Base)?;
        expected_annual_impact(&sub_curve, rps, effective, catalog.rp_infinite)?
    } else {
        0.0
    };

    Ok(ChannelDamages {
        cc,
        soc,
        sub,
        tot,
        protection: protection.unwrap_or(f64::NAN),
    })
}

fn ensemble_stats(channels: &[ChannelDamages]) -> YearStats {
    let tot: Vec<f64> = channels.iter().map(|c| c.tot).collect();
    let cc: Vec<f64> = channels.iter().map(|c| c.cc).collect();
    let soc: Vec<f64> = channels.iter().map(|c| c.soc).collect();
    let sub: Vec<f64> = channels.iter().map(|c| c.sub).collect();
    let prot: Vec<f64> = channels.iter().map(|c| c.protection).collect();
    YearStats {
        tot_avg: nan_mean(&tot),
        tot_min: nan_min(&tot),
        tot_max: nan_max(&tot),
        cc_avg: nan_mean(&cc),
        cc_min: nan_min(&cc),
        cc_max: nan_max(&cc),
        soc_avg: nan_mean(&soc),
        sub_avg: nan_mean(&sub),
        prot_avg: nan_mean(&prot),
    }
}

// Driver diffs pointing against the sign of the total change clamp to zero;
// each driver then takes its clamped share of the total change, with a small
// epsilon guarding an all-zero denominator.
fn attributed_row(
    year: u16,
    stats: &YearStats,
    tot_2010: f64,
    subsidence: bool,
    assets: f64,
) -> RiskYearRow {
    let tot_diff = stats.tot_avg - tot_2010;
    let clamp = |d: f64| if tot_diff > 0.0 { d.max(0.0) } else { d.min(0.0) };

    let cc_diff_avg = clamp(stats.cc_avg - tot_2010);
    let cc_diff_min = clamp(stats.cc_min - tot_2010);
    let cc_diff_max = clamp(stats.cc_max - tot_2010);
    let soc_diff = clamp(stats.soc_avg - tot_2010);
    let sub_diff = if subsidence {
        clamp(stats.sub_avg - tot_2010)
    } else {
        0.0
    };

    let cc_share =
        |cc_diff: f64| cc_diff / (cc_diff + soc_diff + sub_diff + SHARE_EPSILON) * tot_diff;
    let denom = cc_diff_avg + soc_diff + sub_diff + SHARE_EPSILON;
    let soc_share = soc_diff / denom * tot_diff;
    let sub_share = sub_diff / denom * tot_diff;

    RiskYearRow {
        year,
        annual_damage_avg: zero_non_finite(stats.tot_avg),
        annual_damage_min: Some(zero_non_finite(stats.tot_min)),
        annual_damage_max: Some(zero_non_finite(stats.tot_max)),
        asset_value: assets,
        flood_protection: zero_non_finite(stats.prot_avg),
        percent_damage_avg: percent_damage(stats.tot_avg, assets),
        percent_damage_min: percent_damage(stats.tot_min, assets),
        percent_damage_max: percent_damage(stats.tot_max, assets),
        cc_driver_avg: zero_non_finite(cc_share(cc_diff_avg)),
        cc_driver_min: Some(zero_non_finite(cc_share(cc_diff_min))),
        cc_driver_max: Some(zero_non_finite(cc_share(cc_diff_max))),
        soc_driver: zero_non_finite(soc_share),
        sub_driver: zero_non_finite(sub_share),
    }
}

// Undefined when the damage exceeds the asset base.
fn percent_damage(impact: f64, assets: f64) -> Option<f64> {
    if assets < impact {
        return None;
    }
    let pct = impact / assets * 100.0;
    if pct.is_finite() { Some(pct) } else { None }
}
