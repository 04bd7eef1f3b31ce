//! Mote placement for generated wireless sensor networks.
//!
//! Every layout holds the root (id 0) at the origin, `n` sensors and one malicious mote (id `n + 1`),
//! sorted by id.

use std::f64::consts::PI;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::experiment::params::SimulationParams;

const DENSITY_FACTOR: i64 = 3;
const MAX_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MoteKind {
    Root,
    Sensor,
    Malicious,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mote {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: MoteKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Mote {
    fn new(id: usize, kind: MoteKind, x: f64, y: f64) -> Self {
        Self { id, kind, x, y, z: 0.0 }
    }

    fn distance(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

/// Runs the generation algorithm named in `params`.
pub fn generate<R: Rng>(params: &SimulationParams, rng: &mut R) -> Vec<Mote> {
    match params.wsn_gen_algo.as_str() {
        "grid" => grid(params, rng),
        _ => quadrants(params, rng),
    }
}

/// Fills rings of growing radius around the root, one sensor per angular sector.
pub fn quadrants<R: Rng>(params: &SimulationParams, rng: &mut R) -> Vec<Mote> {
    let n = params.n.max(0);
    let (min_range, max_range, tx_range) = (params.min_range, params.max_range, params.tx_range);
    let mut motes = vec![Mote::new(0, MoteKind::Root, 0.0, 0.0)];
    let mut ids: Vec<usize> = (1..=n as usize).collect();
    ids.shuffle(rng);

    let (mut rings, mut capacity) = (1u32, 0i64);
    while capacity <= n {
        capacity += DENSITY_FACTOR * 2i64.pow(rings);
        rings += 1;
    }
    let mut range_inc = tx_range.min(max_range / f64::from(rings - 1));
    let mut placed = 0i64;
    for ring in 1..rings {
        let in_ring = (DENSITY_FACTOR * 2i64.pow(ring)).min(n - placed);
        if in_ring <= 0 {
            break;
        }
        let angle_inc = 360 / in_ring;
        let ring = f64::from(ring);
        let low = (((ring - 0.7) * range_inc) as i64).max(min_range as i64);
        let high = (((ring - 0.1) * range_inc) as i64).min(max_range as i64).max(low);
        for sector in 0..in_ring {
            let angle_min = ((sector as f64 + 0.25) * angle_inc as f64) as i64;
            let angle_max = ((sector as f64 + 0.75) * angle_inc as f64) as i64;
            let (mut x, mut y) = (0.0, 0.0);
            for _ in 0..MAX_ATTEMPTS {
                let angle = rng.gen_range(angle_min..=angle_max) as f64 * PI / 180.0;
                let range = rng.gen_range(low..=high) as f64;
                x = range * angle.cos();
                y = range * angle.sin();
                let nearest = motes.iter().map(|m| m.distance(x, y)).fold(f64::INFINITY, f64::min);
                if min_range < nearest && nearest < 0.9 * tx_range {
                    break;
                }
            }
            motes.push(Mote::new(ids[placed as usize], MoteKind::Sensor, x, y));
            placed += 1;
        }
        if placed == n {
            break;
        }
        range_inc *= 0.75;
    }
    finish(motes, min_range)
}

/// Places sensors on square layers around the root with a 10% jitter.
pub fn grid<R: Rng>(params: &SimulationParams, rng: &mut R) -> Vec<Mote> {
    let n = params.n.max(0) as usize;
    let mut motes = vec![Mote::new(0, MoteKind::Root, 0.0, 0.0)];
    let (mut layers, mut capacity) = (1usize, 0usize);
    while capacity < n {
        capacity += 8 * layers;
        layers += 1;
    }
    let inc = params.area_side / (2 * layers) as f64;
    let mut id = 1;
    'layers: for layer in 0..layers {
        for jx in [0.0, 1.0, -1.0] {
            for jy in [0.0, 1.0, -1.0] {
                if id > n {
                    break 'layers;
                }
                let (x, y) = (layer as f64 * inc * jx, layer as f64 * inc * jy);
                if x == 0.0 && y == 0.0 {
                    continue;
                }
                let x = x + rng.gen_range(-1.0..=1.0) * inc * 0.1;
                let y = y + rng.gen_range(-1.0..=1.0) * inc * 0.1;
                motes.push(Mote::new(id, MoteKind::Sensor, x, y));
                id += 1;
            }
        }
    }
    finish(motes, params.min_range)
}

fn finish(mut motes: Vec<Mote>, min_range: f64) -> Vec<Mote> {
    let malicious = malicious(&motes, min_range);
    motes.push(malicious);
    motes.sort_by_key(|m| m.id);
    motes
}

/// Signed quadratic mean of one coordinate.
fn centre(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v.signum() * v * v, c + 1));
    let avg = if count == 0 { 0.0 } else { sum / count as f64 };
    avg.signum() * avg.abs().sqrt()
}

/// The malicious mote sits in the middle of the network, at least `min_range` away from the root.
fn malicious(motes: &[Mote], min_range: f64) -> Mote {
    let mut x = centre(motes.iter().map(|m| m.x));
    let mut y = centre(motes.iter().map(|m| m.y));
    let radius = (x * x + y * y).sqrt();
    if radius < min_range {
        let angle = if radius == 0.0 { 0.0 } else { (x / radius).acos() };
        x = min_range * angle.cos();
        y = min_range * angle.sin();
    }
    Mote::new(motes.len(), MoteKind::Malicious, x, y)
}
