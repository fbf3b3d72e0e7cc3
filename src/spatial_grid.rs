use std::collections::BTreeMap;

use log::trace;

use crate::unit::Unit;

/// Cells scanned from each cell besides itself. Together with their mirror
/// images these cover all eight neighbours, so each unordered pair of cells
/// is visited once.
const FORWARD_NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (-1, 1), (0, 1), (1, 1)];

type PairFilter<'a> = Box<dyn Fn(&Unit, &Unit) -> bool + 'a>;
type PairCallback<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// A registered pairwise interaction.
///
/// The callback receives indices into the unit slice handed to
/// [`PairQuery::run`], once per passing ordering: `(a, b)` and `(b, a)`.
pub struct Intent<'a> {
    pub id: &'static str,
    max_dist_sq: Option<f32>,
    filter: Option<PairFilter<'a>>,
    callback: PairCallback<'a>,
}

impl<'a> Intent<'a> {
    /// Add a pairwise filter, evaluated per ordering.
    pub fn with_filter(mut self, filter: impl Fn(&Unit, &Unit) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    #[inline]
    fn in_range(&self, dist_sq: f32) -> bool {
        self.max_dist_sq.map_or(true, |max| dist_sq <= max)
    }

    #[inline]
    fn visit(&mut self, units: &[Unit], a: usize, b: usize, dist_sq: f32) -> usize {
        if !self.in_range(dist_sq) {
            return 0;
        }
        let mut fired = 0;
        for (x, y) in [(a, b), (b, a)] {
            let pass = match &self.filter {
                Some(filter) => filter(&units[x], &units[y]),
                None => true,
            };
            if pass {
                (self.callback)(x, y);
                fired += 1;
            }
        }
        fired
    }
}

pub fn intent<'a>(
    id: &'static str,
    max_dist: Option<f32>,
    callback: impl FnMut(usize, usize) + 'a,
) -> Intent<'a> {
    Intent {
        id,
        max_dist_sq: max_dist.map(|d| d * d),
        filter: None,
        callback: Box::new(callback),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    BruteForce,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryStats {
    pub strategy: Strategy,
    pub active: usize,
    pub pairs_tested: usize,
    pub callbacks: usize,
}

/// Per-pass neighbour query shared by several intents.
///
/// Intents are registered for one pass only; `run` drains them.
pub struct PairQuery<'a> {
    intents: Vec<Intent<'a>>,
    grid_threshold: usize,
    force: Option<Strategy>,
}

impl<'a> PairQuery<'a> {
    pub fn new(grid_threshold: usize) -> Self {
        Self {
            intents: Vec::new(),
            grid_threshold,
            force: None,
        }
    }

    /// Pin the strategy regardless of population. Used to compare paths.
    pub fn forced(mut self, strategy: Strategy) -> Self {
        self.force = Some(strategy);
        self
    }

    pub fn register(&mut self, intent: Intent<'a>) {
        self.intents.push(intent);
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Run every registered intent over the live units, then clear them.
    pub fn run(&mut self, units: &[Unit]) -> QueryStats {
        let active: Vec<usize> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_alive())
            .map(|(idx, _)| idx)
            .collect();

        let any_finite = self.intents.iter().any(|i| i.max_dist_sq.is_some());
        let strategy = self.force.unwrap_or(
            if active.len() > self.grid_threshold && any_finite {
                Strategy::Grid
            } else {
                Strategy::BruteForce
            },
        );

        let mut stats = QueryStats {
            strategy,
            active: active.len(),
            pairs_tested: 0,
            callbacks: 0,
        };

        let mut intents = std::mem::take(&mut self.intents);
        match strategy {
            Strategy::BruteForce => {
                brute_force(units, &active, &mut intents, &mut stats);
            }
            Strategy::Grid => {
                // Unbounded intents cannot be bucketed; they keep the full scan.
                let (mut bounded, mut unbounded): (Vec<_>, Vec<_>) =
                    intents.into_iter().partition(|i| i.max_dist_sq.is_some());
                if any_finite {
                    grid(units, &active, &mut bounded, &mut stats);
                }
                if !unbounded.is_empty() {
                    brute_force(units, &active, &mut unbounded, &mut stats);
                }
            }
        }

        trace!(
            "[Spatial] {:?}: active={}, pairs={}, callbacks={}",
            stats.strategy,
            stats.active,
            stats.pairs_tested,
            stats.callbacks
        );
        stats
    }
}

fn brute_force(units: &[Unit], active: &[usize], intents: &mut [Intent<'_>], stats: &mut QueryStats) {
    for (n, &a) in active.iter().enumerate() {
        for &b in &active[n + 1..] {
            let dist_sq = units[a].distance_sq(&units[b]);
            stats.pairs_tested += 1;
            for intent in intents.iter_mut() {
                stats.callbacks += intent.visit(units, a, b, dist_sq);
            }
        }
    }
}

fn grid(units: &[Unit], active: &[usize], intents: &mut [Intent<'_>], stats: &mut QueryStats) {
    let max_range = intents
        .iter()
        .filter_map(|i| i.max_dist_sq)
        .fold(0.0_f32, f32::max)
        .sqrt();
    // Slightly oversized cells keep boundary pairs in adjacent cells despite
    // rounding in the key computation.
    let cells = SpatialGrid::build(units, active, (max_range * 1.01).max(1.0));

    let mut test = |a: usize, b: usize, stats: &mut QueryStats| {
        let dist_sq = units[a].distance_sq(&units[b]);
        stats.pairs_tested += 1;
        for intent in intents.iter_mut() {
            stats.callbacks += intent.visit(units, a, b, dist_sq);
        }
    };

    for (&(cx, cy), members) in &cells.cells {
        for (n, &a) in members.iter().enumerate() {
            for &b in &members[n + 1..] {
                test(a, b, stats);
            }
        }
        for (ox, oy) in FORWARD_NEIGHBOURS {
            let Some(neighbours) = cells.cells.get(&(cx + ox, cy + oy)) else {
                continue;
            };
            for &a in members {
                for &b in neighbours {
                    test(a, b, stats);
                }
            }
        }
    }
}

/// Uniform 2D bucket grid over unit indices.
///
/// Cells are kept in a `BTreeMap` so iteration order, and therefore callback
/// order, is stable from run to run.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    inv_cell_size: f32,
    cells: BTreeMap<(i32, i32), Vec<usize>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: BTreeMap::new(),
        }
    }

    fn build(units: &[Unit], active: &[usize], cell_size: f32) -> Self {
        let mut grid = Self::new(cell_size);
        for &idx in active {
            grid.insert(idx, units[idx].pos_x, units[idx].pos_y);
        }
        grid
    }

    #[inline]
    fn get_key(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x * self.inv_cell_size).floor() as i32,
            (y * self.inv_cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, index: usize, x: f32, y: f32) {
        let key = self.get_key(x, y);
        self.cells.entry(key).or_default().push(index);
    }

}
