//! Parameter-set expansion.
//!
//! Turns a generator's declared axes into the ordered list of concrete
//! parameter tuples. Expansion is a pure function of the declarations (and
//! the PRNG seed for random axes): two freezes of the same input produce
//! identical tuples in identical order.

use rand::{rngs::StdRng, Rng, SeedableRng};

use canary_core::{ParamMap, ParamValue};

use crate::generator::{Axis, CenterSpec, Generator};

/// Expand a generator into parameter maps, one per future case, in
/// deterministic order.
///
/// Axes combine by lexicographic cartesian product in declaration order:
/// the first axis varies slowest. Zipped, centered, and random axes each
/// contribute their point list as a single axis.
pub fn expand(generator: &Generator) -> Vec<ParamMap> {
    let axes: Vec<Vec<Vec<(String, ParamValue)>>> =
        generator.axes.iter().map(axis_points).collect();

    if axes.is_empty() {
        return vec![ParamMap::new()];
    }

    let mut maps = Vec::new();
    let mut indices = vec![0usize; axes.len()];
    if axes.iter().any(|a| a.is_empty()) {
        return maps;
    }
    loop {
        let mut map = ParamMap::new();
        for (axis, &i) in axes.iter().zip(&indices) {
            for (name, value) in &axis[i] {
                map.insert(name.clone(), value.clone());
            }
        }
        maps.push(map);

        // Odometer increment, last axis fastest.
        let mut pos = axes.len();
        loop {
            if pos == 0 {
                return maps;
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < axes[pos].len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

/// Aggregate the parameters of a multi-instance base case: for each name,
/// in declaration order, the tuple of that name's values over `expansions`.
pub fn aggregate(expansions: &[ParamMap]) -> ParamMap {
    let mut agg = ParamMap::new();
    let Some(first) = expansions.first() else {
        return agg;
    };
    for (name, _) in first.iter() {
        let values: Vec<ParamValue> = expansions
            .iter()
            .filter_map(|m| m.get(name).cloned())
            .collect();
        agg.insert_tuple(name, values);
    }
    agg
}

/// The ordered point list of one axis. Each point is a set of
/// name→value bindings applied together.
fn axis_points(axis: &Axis) -> Vec<Vec<(String, ParamValue)>> {
    match axis {
        Axis::Product {
            name,
            values,
            autotype,
        } => values
            .iter()
            .map(|v| vec![(name.clone(), maybe_autotype(v, *autotype))])
            .collect(),

        Axis::Zipped {
            names,
            tuples,
            autotype,
        } => tuples
            .iter()
            .map(|tuple| {
                names
                    .iter()
                    .zip(tuple)
                    .map(|(n, v)| (n.clone(), maybe_autotype(v, *autotype)))
                    .collect()
            })
            .collect(),

        Axis::Centered { names, specs } => centered_points(names, specs),

        Axis::Random {
            names,
            ranges,
            samples,
            seed,
        } => random_points(names, ranges, *samples, *seed),
    }
}

fn maybe_autotype(v: &ParamValue, autotype: bool) -> ParamValue {
    match v {
        ParamValue::Str(s) if autotype => ParamValue::autotype(s),
        other => other.clone(),
    }
}

/// The origin, then for each name independently `steps` points on each
/// side (negative side outward-in, then positive side inward-out); the
/// other names stay at their centers. Total points: `1 + 2·steps·k`.
fn centered_points(names: &[String], specs: &[CenterSpec]) -> Vec<Vec<(String, ParamValue)>> {
    let integral = specs
        .iter()
        .all(|s| s.center.fract() == 0.0 && s.delta.fract() == 0.0);
    let value = |x: f64| {
        if integral {
            ParamValue::Int(x as i64)
        } else {
            ParamValue::Float(x)
        }
    };
    let origin: Vec<(String, ParamValue)> = names
        .iter()
        .zip(specs)
        .map(|(n, s)| (n.clone(), value(s.center)))
        .collect();

    let mut points = vec![origin.clone()];
    for (i, spec) in specs.iter().enumerate() {
        let offsets = (1..=spec.steps)
            .rev()
            .map(|k| -(k as f64))
            .chain((1..=spec.steps).map(|k| k as f64));
        for mult in offsets {
            let mut point = origin.clone();
            point[i].1 = value(spec.center + mult * spec.delta);
            points.push(point);
        }
    }
    points
}

/// `samples` tuples of uniform draws, one per name, from a PRNG seeded by
/// the directive. Draw order is sample-major then name-major, which pins
/// the sequence for a given seed.
fn random_points(
    names: &[String],
    ranges: &[(f64, f64)],
    samples: u32,
    seed: u64,
) -> Vec<Vec<(String, ParamValue)>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..samples)
        .map(|_| {
            names
                .iter()
                .zip(ranges)
                .map(|(n, &(lo, hi))| {
                    let v = if hi > lo { rng.random_range(lo..hi) } else { lo };
                    (n.clone(), ParamValue::Float(v))
                })
                .collect()
        })
        .collect()
}
