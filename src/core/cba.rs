use tracing::debug;

use crate::core::curve::{linspace, nan_max, nan_mean, nan_min};
use crate::core::error::{EngineError, Result};
use crate::core::risk::{expected_annual_impact, resolve_protection, transfer_or_keep};
use crate::core::store::ImpactStore;
use crate::core::types::{
    AnnualCbaRow, CbaAnalysis, CbaDefaults, CbaInputs, CbaMeta, ClimatePathway, CurveKey,
    Exposure, FloodType, ModelCatalog, Scenario, SocioPathway,
};

const WALK_CANDIDATES: usize = 999;
const STANDARD_COST_FACTOR: f64 = 7e6;
const USER_COST_FACTOR: f64 = 1e6;

pub fn analyze_cba(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &CbaInputs,
) -> Result<CbaAnalysis> {
    debug!(
        unit = inputs.unit.as_str(),
        scenario = inputs.scenario.label(),
        "running cost-benefit analysis"
    );
    validate_window(catalog, inputs)?;

    let info = store.unit_info(&inputs.unit)?;
    let flood = FloodType::Riverine;
    let rps = &catalog.return_periods;

    let prot_pres = resolve_protection(
        store,
        catalog,
        &inputs.unit,
        &info.name,
        flood,
        false,
        inputs.scenario,
        inputs.existing_prot,
    )?;
    let prot_fut = match inputs.prot_fut {
        Some(p) => p,
        None => rps
            .iter()
            .copied()
            .find(|rp| *rp >= prot_pres)
            .unwrap_or_else(|| catalog.max_return_period()),
    };
    let ref_idx = catalog
        .snapshot_years
        .iter()
        .position(|&y| y == inputs.ref_year)
        .ok_or_else(|| {
            EngineError::invalid_parameters(format!(
                "reference year {} is not a snapshot year",
                inputs.ref_year
            ))
        })?;

    let time_series: Vec<u16> =
        (inputs.implementation_start..=inputs.implementation_start + inputs.infrastructure_life)
            .collect();
    let discounts: Vec<f64> = (1..=time_series.len())
        .map(|k| (1.0 + inputs.discount_rate).powi(k as i32))
        .collect();
    let ramp = benefit_ramp(inputs.benefits_start, inputs.implementation_end, &time_series);
    let starting_rp = nearest_return_period(rps, prot_pres);

    let mut runs = Vec::new();
    for model in catalog.models(flood) {
        debug!(model = model.as_str(), "evaluating climate model");
        let curves = load_model_curves(store, catalog, inputs, model)?;
        let present = impact_trajectories(&curves, catalog, &time_series, prot_pres, 0)?;
        let future = impact_trajectories(&curves, catalog, &time_series, prot_fut, ref_idx)?;
        let prot_present = protection_trajectory(&curves, catalog, &present.snapshot_urb, &time_series)?;
        let prot_future = protection_trajectory(&curves, catalog, &future.snapshot_urb, &time_series)?;

        let construction =
            construction_cost(store, inputs, model, starting_rp, prot_fut)?;
        let costs = discounted_cost_series(
            construction,
            inputs.implementation_start,
            inputs.implementation_end,
            inputs.om_costs,
            &time_series,
            &discounts,
        );
        let (urb_benefits, pop_benefits, gdp_benefits) =
            benefit_series(&present, &future, &ramp, &discounts);

        runs.push(ModelRun {
            urb_benefits,
            pop_benefits,
            gdp_benefits,
            costs,
            prot_present,
            prot_future,
            construction,
        });
    }

    let mut rows = ensemble_rows(&runs, &time_series);
    apply_degenerate_zeroing(&mut rows);

    let construction_avg =
        runs.iter().map(|r| r.construction).sum::<f64>() / runs.len() as f64;
    Ok(CbaAnalysis {
        meta: CbaMeta {
            geogunit_name: info.name,
            geogunit_type: info.unit_type,
            scenario: inputs.scenario,
            average_protection: prot_pres,
            starting_protection: starting_rp,
            future_protection: prot_fut,
            reference_year: inputs.ref_year,
            implementation_start: inputs.implementation_start,
            implementation_end: inputs.implementation_end,
            infrastructure_lifespan: inputs.infrastructure_life,
            estimated_costs: inputs.estimated_costs,
            benefits_start: inputs.benefits_start,
            discount: inputs.discount_rate,
            om: inputs.om_costs,
            gdp_costs: construction_avg,
        },
        rows,
    })
}

// A unit with no modelled protection defaults to unprotected rather than
// failing.
pub fn cba_defaults(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    unit: &str,
    flood: FloodType,
    sub_scenario: bool,
    scenario: Scenario,
) -> Result<CbaDefaults> {
    let info = store.unit_info(unit)?;
    let existing = if catalog.fully_protected(&info.name) {
        catalog.max_protection
    } else {
        store
            .protection_default(unit, flood, sub_scenario, scenario)
            .map(f64::trunc)
            .unwrap_or(0.0)
    };
    let rounded = catalog
        .return_periods
        .iter()
        .copied()
        .find(|rp| *rp >= existing)
        .unwrap_or_else(|| catalog.max_return_period());
    let factors = store.cost_factors(unit)?;
    Ok(CbaDefaults {
        existing_prot: existing,
        existing_prot_rounded: rounded,
        prot_fut: rounded,
        estimated_costs: factors.construction_index * 7.0,
    })
}

fn validate_window(catalog: &ModelCatalog, inputs: &CbaInputs) -> Result<()> {
    if inputs.implementation_end <= inputs.implementation_start {
        return Err(EngineError::invalid_parameters(
            "implementation must end after it starts",
        ));
    }
    if inputs.benefits_start >= inputs.implementation_end {
        return Err(EngineError::invalid_parameters(
            "benefits must start before implementation ends",
        ));
    }
    let start = i32::from(inputs.implementation_start);
    let life = i32::from(inputs.infrastructure_life);
    let last_snapshot =
        i32::from(catalog.snapshot_years[catalog.snapshot_years.len() - 1]);
    let life_min = last_snapshot - start;
    let life_max = i32::from(catalog.horizon_cap) - start;
    if life < life_min || life > life_max {
        return Err(EngineError::invalid_parameters(format!(
            "the infrastructure lifetime ({life}) must be between {life_min} and {life_max}",
        )));
    }
    if inputs.implementation_end > inputs.implementation_start + inputs.infrastructure_life {
        return Err(EngineError::invalid_parameters(
            "implementation must finish within the infrastructure lifetime",
        ));
    }
    if !inputs.discount_rate.is_finite() || inputs.discount_rate < 0.0 {
        return Err(EngineError::invalid_parameters(
            "discount rate must be non-negative",
        ));
    }
    if !inputs.om_costs.is_finite() || inputs.om_costs < 0.0 {
        return Err(EngineError::invalid_parameters(
            "operation and maintenance rate must be non-negative",
        ));
    }
    Ok(())
}

struct ModelRun {
    urb_benefits: Vec<f64>,
    pop_benefits: Vec<f64>,
    gdp_benefits: Vec<f64>,
    costs: Vec<f64>,
    prot_present: Vec<f64>,
    prot_future: Vec<f64>,
    construction: f64,
}

struct ModelCurves {
    cc: Vec<Vec<f64>>,
    urb: Vec<Vec<f64>>,
    pop: Vec<Vec<f64>>,
    gdp: Vec<Vec<f64>>,
}

struct ImpactTrajectories {
    snapshot_urb: Vec<f64>,
    annual_urb: Vec<f64>,
    annual_pop: Vec<f64>,
    annual_gdp: Vec<f64>,
}

fn load_model_curves(
    store: &dyn ImpactStore,
    catalog: &ModelCatalog,
    inputs: &CbaInputs,
    model: &str,
) -> Result<ModelCurves> {
    let flood = FloodType::Riverine;
    let spec = inputs.scenario.spec();
    let histor = catalog.historical_model(flood);
    let first_year = catalog.snapshot_years[0];

    let base_key =
        CurveKey::new(ClimatePathway::Historical, histor, SocioPathway::Base, false, first_year);
    let urb_first =
        store.impact_curve(&inputs.unit, flood, Exposure::UrbanDamage, &base_key)?;
    let mut curves = ModelCurves {
        cc: vec![urb_first.clone()],
        urb: vec![urb_first],
        pop: vec![store.impact_curve(&inputs.unit, flood, Exposure::Population, &base_key)?],
        gdp: vec![store.impact_curve(&inputs.unit, flood, Exposure::Gdp, &base_key)?],
    };

    for &year in &catalog.snapshot_years[1..] {
        let climate_key = CurveKey::new(spec.climate, model, SocioPathway::Base, false, year);
        let total_key = CurveKey::new(spec.climate, model, spec.socio, false, year);
        curves.cc.push(store.impact_curve(
            &inputs.unit,
            flood,
            Exposure::UrbanDamage,
            &climate_key,
        )?);
        curves.urb.push(store.impact_curve(
            &inputs.unit,
            flood,
            Exposure::UrbanDamage,
            &total_key,
        )?);
        curves.pop.push(store.impact_curve(
            &inputs.unit,
            flood,
            Exposure::Population,
            &total_key,
        )?);
        curves.gdp.push(store.impact_curve(&inputs.unit, flood, Exposure::Gdp, &total_key)?);
    }
    Ok(curves)
}

// The protection standard is valid at reference_idx and transferred to the
// other snapshot years through the climate-only hazard change.
fn impact_trajectories(
    curves: &ModelCurves,
    catalog: &ModelCatalog,
    time_series: &[u16],
    protection: f64,
    reference_idx: usize,
) -> Result<ImpactTrajectories> {
    let rps = &catalog.return_periods;
    let reference = &curves.cc[reference_idx];
    let count = catalog.snapshot_years.len();
    let mut urb = Vec::with_capacity(count);
    let mut pop = Vec::with_capacity(count);
    let mut gdp = Vec::with_capacity(count);
    for i in 0..count {
        let prot_i = transfer_or_keep(rps, reference, &curves.cc[i], protection)?;
        urb.push(expected_annual_impact(&curves.urb[i], rps, prot_i, catalog.rp_infinite)?);
        pop.push(expected_annual_impact(&curves.pop[i], rps, prot_i, catalog.rp_infinite)?);
        gdp.push(expected_annual_impact(&curves.gdp[i], rps, prot_i, catalog.rp_infinite)?);
    }
    let years: Vec<f64> = catalog.snapshot_years.iter().map(|&y| f64::from(y)).collect();
    Ok(ImpactTrajectories {
        annual_urb: densify(&years, &urb, time_series),
        annual_pop: densify(&years, &pop, time_series),
        annual_gdp: densify(&years, &gdp, time_series),
        snapshot_urb: urb,
    })
}

// The protection implied by each snapshot's urban damage. A year with zero
// observed damage has no reconstructible protection and yields a NaN knot.
fn protection_trajectory(
    curves: &ModelCurves,
    catalog: &ModelCatalog,
    snapshot_urb: &[f64],
    time_series: &[u16],
) -> Result<Vec<f64>> {
    let rps = &catalog.return_periods;
    let candidates = linspace(
        catalog.min_return_period(),
        catalog.max_return_period(),
        WALK_CANDIDATES,
    );
    let mut knots = Vec::with_capacity(snapshot_urb.len());
    for (i, &observed) in snapshot_urb.iter().enumerate() {
        if observed == 0.0 {
            knots.push(f64::NAN);
            continue;
        }
        knots.push(reconstructed_protection(
            &curves.urb[i],
            rps,
            observed,
            catalog.rp_infinite,
            &candidates,
        )?);
    }
    let years: Vec<f64> = catalog.snapshot_years.iter().map(|&y| f64::from(y)).collect();
    Ok(densify(&years, &knots, time_series))
}

// Walks the candidates in ascending order; the first one whose expected
// impact moves away from the observed damage again is the answer.
fn reconstructed_protection(
    impacts: &[f64],
    rps: &[f64],
    observed: f64,
    rp_infinite: f64,
    candidates: &[f64],
) -> Result<f64> {
    let mut chosen = candidates[candidates.len() - 1];
    let mut check = 1e25_f64;
    for &candidate in candidates {
        let test_impact = expected_annual_impact(impacts, rps, candidate, rp_infinite)?;
        let diff = (observed - test_impact).abs();
        chosen = candidate;
        if diff > check {
            break;
        }
        check = diff;
    }
    Ok(chosen)
}

// Construction spreads uniformly over the build years; maintenance accrues
// on the cumulatively built stock and holds at full from completion on.
fn discounted_cost_series(
    total_cost: f64,
    implementation_start: u16,
    implementation_end: u16,
    om_rate: f64,
    time_series: &[u16],
    discounts: &[f64],
) -> Vec<f64> {
    let build_years = usize::from(implementation_end - implementation_start);
    let annual_build = total_cost / build_years as f64;
    let mut horizon = vec![0.0; time_series.len()];
    let mut cumulative = 0.0;
    for slot in horizon.iter_mut().take(build_years) {
        cumulative += annual_build;
        *slot = annual_build + cumulative * om_rate;
    }
    let full_maintenance = cumulative * om_rate;
    for slot in horizon.iter_mut().skip(build_years) {
        *slot = full_maintenance;
    }
    horizon
        .iter()
        .zip(discounts)
        .map(|(cost, discount)| cost / discount)
        .collect()
}

// Zero before benefits start, one from completion onwards, linear between.
fn benefit_ramp(benefits_start: u16, implementation_end: u16, time_series: &[u16]) -> Vec<f64> {
    let x0 = f64::from(benefits_start);
    let x1 = f64::from(implementation_end);
    time_series
        .iter()
        .map(|&year| ((f64::from(year) - x0) / (x1 - x0)).clamp(0.0, 1.0))
        .collect()
}

// The present-minus-future gap clamps non-negative and scales by the ramp.
// Monetary benefits are discounted; avoided population exposure is not.
fn benefit_series(
    present: &ImpactTrajectories,
    future: &ImpactTrajectories,
    ramp: &[f64],
    discounts: &[f64],
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = ramp.len();
    let mut urb = Vec::with_capacity(n);
    let mut pop = Vec::with_capacity(n);
    let mut gdp = Vec::with_capacity(n);
    for t in 0..n {
        let urb_diff = (present.annual_urb[t] - future.annual_urb[t]).max(0.0);
        let pop_diff = (present.annual_pop[t] - future.annual_pop[t]).max(0.0);
        let gdp_diff = (present.annual_gdp[t] - future.annual_gdp[t]).max(0.0);
        urb.push(ramp[t] * urb_diff / discounts[t]);
        pop.push(ramp[t] * pop_diff);
        gdp.push(ramp[t] * gdp_diff / discounts[t]);
    }
    (urb, pop, gdp)
}

fn construction_cost(
    store: &dyn ImpactStore,
    inputs: &CbaInputs,
    model: &str,
    start_rp: f64,
    end_rp: f64,
) -> Result<f64> {
    let dimension = store.construction_dimension(
        &inputs.unit,
        model,
        inputs.scenario,
        inputs.ref_year,
        start_rp,
        end_rp,
    )?;
    match inputs.user_urb_cost {
        Some(user_cost) => Ok(dimension * user_cost * USER_COST_FACTOR),
        None => {
            let factors = store.cost_factors(&inputs.unit)?;
            Ok(dimension * factors.ppp_rate * factors.construction_index * STANDARD_COST_FACTOR)
        }
    }
}

fn nearest_return_period(rps: &[f64], protection: f64) -> f64 {
    let mut nearest = rps[0];
    for &rp in rps {
        if (rp - protection).abs() < (nearest - protection).abs() {
            nearest = rp;
        }
    }
    nearest
}

// A NaN knot poisons its segments, but an exact knot hit still returns the
// knot value itself.
fn densify(xs: &[f64], ys: &[f64], targets: &[u16]) -> Vec<f64> {
    targets
        .iter()
        .map(|&target| {
            let x = f64::from(target);
            let n = xs.len();
            if x < xs[0] {
                return ys[0] + (x - xs[0]) * (ys[1] - ys[0]) / (xs[1] - xs[0]);
            }
            if x > xs[n - 1] {
                return ys[n - 1] + (x - xs[n - 1]) * (ys[n - 1] - ys[n - 2]) / (xs[n - 1] - xs[n - 2]);
            }
            let mut hi = 1;
            while xs[hi] < x {
                hi += 1;
            }
            if x == xs[hi] {
                return ys[hi];
            }
            let lo = hi - 1;
            if x == xs[lo] {
                return ys[lo];
            }
            let t = (x - xs[lo]) / (xs[hi] - xs[lo]);
            ys[lo] + t * (ys[hi] - ys[lo])
        })
        .collect()
}

fn finite_or_none(value: f64) -> Option<f64> {
    if value.is_finite() { Some(value) } else { None }
}

fn ensemble_rows(runs: &[ModelRun], time_series: &[u16]) -> Vec<AnnualCbaRow> {
    (0..time_series.len())
        .map(|t| {
            let costs: Vec<f64> = runs.iter().map(|r| r.costs[t]).collect();
            let urb: Vec<f64> = runs.iter().map(|r| r.urb_benefits[t]).collect();
            let pop: Vec<f64> = runs.iter().map(|r| r.pop_benefits[t]).collect();
            let gdp: Vec<f64> = runs.iter().map(|r| r.gdp_benefits[t]).collect();
            let prot_p: Vec<f64> = runs.iter().map(|r| r.prot_present[t]).collect();
            let prot_f: Vec<f64> = runs.iter().map(|r| r.prot_future[t]).collect();
            AnnualCbaRow {
                year: time_series[t],
                pop_costs_avg: nan_mean(&costs),
                pop_costs_min: nan_min(&costs),
                pop_costs_max: nan_max(&costs),
                gdp_costs_avg: nan_mean(&costs),
                gdp_costs_min: nan_min(&costs),
                gdp_costs_max: nan_max(&costs),
                urb_benefits_avg: nan_mean(&urb),
                urb_benefits_min: nan_min(&urb),
                urb_benefits_max: nan_max(&urb),
                pop_benefits_avg: nan_mean(&pop),
                pop_benefits_min: nan_min(&pop),
                pop_benefits_max: nan_max(&pop),
                gdp_benefits_avg: nan_mean(&gdp),
                gdp_benefits_min: nan_min(&gdp),
                gdp_benefits_max: nan_max(&gdp),
                prot_present_avg: finite_or_none(nan_mean(&prot_p)),
                prot_present_min: finite_or_none(nan_min(&prot_p)),
                prot_present_max: finite_or_none(nan_max(&prot_p)),
                prot_future_avg: finite_or_none(nan_mean(&prot_f)),
                prot_future_min: finite_or_none(nan_min(&prot_f)),
                prot_future_max: finite_or_none(nan_max(&prot_f)),
            }
        })
        .collect()
}

// Either degenerate side zeroes the other: no avoided urban damages zeroes
// the cost columns, no costs zeroes the benefit columns.
fn apply_degenerate_zeroing(rows: &mut [AnnualCbaRow]) {
    let benefit_sum: f64 = rows.iter().map(|r| r.urb_benefits_avg).sum();
    if benefit_sum == 0.0 {
        for row in rows.iter_mut() {
            row.pop_costs_avg = 0.0;
            row.pop_costs_min = 0.0;
            row.pop_costs_max = 0.0;
            row.gdp_costs_avg = 0.0;
            row.gdp_costs_min = 0.0;
            row.gdp_costs_max = 0.0;
        }
        return;
    }
    let cost_sum: f64 = rows.iter().map(|r| r.gdp_costs_avg).sum();
    if cost_sum == 0.0 {
        for row in rows.iter_mut() {
            row.urb_benefits_avg = 0.0;
            row.urb_benefits_min = 0.0;
            row.urb_benefits_max = 0.0;
            row.pop_benefits_avg = 0.0;
            row.pop_benefits_min = 0.0;
            row.pop_benefits_max = 0.0;
            row.gdp_benefits_avg = 0.0;
            row.gdp_benefits_min = 0.0;
            row.gdp_benefits_max = 0.0;
        }
    }
}
