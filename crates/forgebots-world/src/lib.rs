//! Infinite two-layer grid storage for the forgebots runtime.
//!
//! The world is conceptually a 2^64 x 2^64 grid of cells, each holding one
//! terrain value and at most one entity. Cells are realized lazily: a pure
//! generator function describes the pristine world, fixed-size tiles cache
//! generated regions, and a sparse overlay records per-cell entity mutations.
//! Terrain is immutable after generation; entities are not.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Number of low coordinate bits addressing a cell within its tile.
pub const TILE_BITS: u32 = 6;
/// Edge length of a tile in cells.
pub const TILE_SIZE: i64 = 1 << TILE_BITS;
/// Total cells per tile.
pub const TILE_CELLS: usize = (TILE_SIZE * TILE_SIZE) as usize;

const OFFSET_MASK: i64 = TILE_SIZE - 1;

/// Errors emitted by world storage operations.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates a rectangle whose lower corner exceeds its upper corner.
    #[error("invalid bounds: {0}")]
    InvalidBounds(&'static str),
}

/// World-relative cell address: `row` grows downward, `col` grows rightward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Coords {
    pub row: i64,
    pub col: i64,
}

impl Coords {
    /// Construct coordinates from a row and column.
    #[must_use]
    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// The tile containing this cell.
    #[must_use]
    pub const fn tile(self) -> TileCoords {
        TileCoords {
            row: self.row >> TILE_BITS,
            col: self.col >> TILE_BITS,
        }
    }

    /// Flat index of this cell within its tile.
    #[must_use]
    pub const fn tile_offset(self) -> usize {
        (((self.row & OFFSET_MASK) << TILE_BITS) | (self.col & OFFSET_MASK)) as usize
    }
}

/// The `(x, y)` coordinate system used by agents and hosts, with `y` growing
/// upward. Converts to [`Coords`] via `x = col`, `y = -row`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Location {
    pub x: i64,
    pub y: i64,
}

impl Location {
    /// Construct a location from `x` and `y`.
    #[must_use]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl From<Location> for Coords {
    fn from(loc: Location) -> Self {
        Self {
            row: loc.y.wrapping_neg(),
            col: loc.x,
        }
    }
}

impl From<Coords> for Location {
    fn from(c: Coords) -> Self {
        Self {
            x: c.col,
            y: c.row.wrapping_neg(),
        }
    }
}

/// Address of a tile in tile units (cell coordinates shifted right by
/// [`TILE_BITS`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoords {
    pub row: i64,
    pub col: i64,
}

/// Inclusive rectangular range of cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    lower: Coords,
    upper: Coords,
}

impl Bounds {
    /// Construct bounds from inclusive corners.
    pub fn new(lower: Coords, upper: Coords) -> Result<Self, WorldError> {
        if lower.row > upper.row || lower.col > upper.col {
            return Err(WorldError::InvalidBounds(
                "lower corner must not exceed upper corner",
            ));
        }
        Ok(Self { lower, upper })
    }

    /// Lower (top-left) corner.
    #[must_use]
    pub const fn lower(&self) -> Coords {
        self.lower
    }

    /// Upper (bottom-right) corner.
    #[must_use]
    pub const fn upper(&self) -> Coords {
        self.upper
    }
}

/// Pure generator mapping a cell to its pristine terrain and entity.
pub type WorldFn<T, E> = Box<dyn Fn(Coords) -> (T, Option<E>) + Send>;

/// One materialized 64x64 region. Terrain values pack into a dense boxed
/// slice; entities are optional and boxed alongside.
struct Tile<T, E> {
    terrain: Box<[T]>,
    entities: Box<[Option<E>]>,
}

/// Lazily generated infinite grid with tile caching and a sparse entity
/// overlay.
///
/// Tiles, once loaded, are never evicted or regenerated: memory grows with
/// the number of distinct tiles touched over a session. This is a deliberate
/// tradeoff documented here rather than hidden behind an eviction policy;
/// [`World::loaded_tile_count`] lets hosts watch the growth.
pub struct World<T, E> {
    generate: WorldFn<T, E>,
    tiles: HashMap<TileCoords, Tile<T, E>>,
    overlay: HashMap<Coords, Option<E>>,
}

impl<T, E> fmt::Debug for World<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("loaded_tiles", &self.tiles.len())
            .field("overlay_cells", &self.overlay.len())
            .finish()
    }
}

impl<T: Copy, E: Clone> World<T, E> {
    /// Wrap a generator function as a fresh world with empty cache and
    /// overlay.
    pub fn new<F>(generate: F) -> Self
    where
        F: Fn(Coords) -> (T, Option<E>) + Send + 'static,
    {
        Self {
            generate: Box::new(generate),
            tiles: HashMap::new(),
            overlay: HashMap::new(),
        }
    }

    /// Terrain at `c`. Reads the cached tile when loaded, otherwise calls
    /// the generator directly; never loads a tile as a side effect. Terrain
    /// lookups never consult the overlay.
    #[must_use]
    pub fn terrain_at(&self, c: Coords) -> T {
        match self.tiles.get(&c.tile()) {
            Some(tile) => tile.terrain[c.tile_offset()],
            None => (self.generate)(c).0,
        }
    }

    /// Entity at `c`: overlay first, then cached tile, then the generator.
    /// Never loads a tile as a side effect.
    #[must_use]
    pub fn entity_at(&self, c: Coords) -> Option<E> {
        if let Some(mutation) = self.overlay.get(&c) {
            return mutation.clone();
        }
        match self.tiles.get(&c.tile()) {
            Some(tile) => tile.entities[c.tile_offset()].clone(),
            None => (self.generate)(c).1,
        }
    }

    /// Terrain at `c`, materializing the owning tile first. Agent
    /// primitives use this variant so repeated nearby lookups amortize.
    pub fn terrain_at_loading(&mut self, c: Coords) -> T {
        self.load_tile(c.tile());
        self.terrain_at(c)
    }

    /// Entity at `c`, materializing the owning tile first.
    pub fn entity_at_loading(&mut self, c: Coords) -> Option<E> {
        self.load_tile(c.tile());
        self.entity_at(c)
    }

    /// Record `f(current entity)` into the overlay for `c`, loading the
    /// owning tile for cache-warming consistency.
    pub fn update<F>(&mut self, c: Coords, f: F)
    where
        F: FnOnce(Option<E>) -> Option<E>,
    {
        self.load_tile(c.tile());
        let current = self.entity_at(c);
        self.overlay.insert(c, f(current));
    }

    /// Idempotently materialize every tile intersecting `bounds`.
    pub fn load_region(&mut self, bounds: Bounds) {
        let lower = bounds.lower().tile();
        let upper = bounds.upper().tile();
        for tile_row in lower.row..=upper.row {
            for tile_col in lower.col..=upper.col {
                self.load_tile(TileCoords {
                    row: tile_row,
                    col: tile_col,
                });
            }
        }
    }

    /// Number of tiles currently materialized.
    #[must_use]
    pub fn loaded_tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the tile owning `c` is materialized.
    #[must_use]
    pub fn is_loaded(&self, c: Coords) -> bool {
        self.tiles.contains_key(&c.tile())
    }

    /// Materialize one tile, evaluating the generator exactly once per cell.
    /// Loading an already-cached tile is a no-op.
    fn load_tile(&mut self, tc: TileCoords) {
        if self.tiles.contains_key(&tc) {
            return;
        }
        let base_row = tc.row << TILE_BITS;
        let base_col = tc.col << TILE_BITS;
        let mut terrain = Vec::with_capacity(TILE_CELLS);
        let mut entities = Vec::with_capacity(TILE_CELLS);
        for row_off in 0..TILE_SIZE {
            for col_off in 0..TILE_SIZE {
                let (t, e) = (self.generate)(Coords::new(base_row + row_off, base_col + col_off));
                terrain.push(t);
                entities.push(e);
            }
        }
        self.tiles.insert(
            tc,
            Tile {
                terrain: terrain.into_boxed_slice(),
                entities: entities.into_boxed_slice(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn checker(c: Coords) -> (u8, Option<&'static str>) {
        let terrain = ((c.row + c.col) & 1) as u8;
        let entity = if c.row == 3 && c.col == 4 {
            Some("boulder")
        } else {
            None
        };
        (terrain, entity)
    }

    #[test]
    fn coordinate_round_trip() {
        let samples = [
            Location::new(0, 0),
            Location::new(17, -3),
            Location::new(-1, 1),
            Location::new(i64::MAX, i64::MIN),
            Location::new(i64::MIN, i64::MAX),
        ];
        for loc in samples {
            assert_eq!(Location::from(Coords::from(loc)), loc);
        }
        let c = Coords::new(-5, 9);
        assert_eq!(Coords::from(Location::from(c)), c);
    }

    #[test]
    fn tile_addressing_handles_negative_axes() {
        assert_eq!(Coords::new(0, 0).tile(), TileCoords { row: 0, col: 0 });
        assert_eq!(Coords::new(63, 63).tile(), TileCoords { row: 0, col: 0 });
        assert_eq!(Coords::new(64, 0).tile(), TileCoords { row: 1, col: 0 });
        assert_eq!(Coords::new(-1, -1).tile(), TileCoords { row: -1, col: -1 });
        assert_eq!(
            Coords::new(-64, -65).tile(),
            TileCoords { row: -1, col: -2 }
        );
        assert_eq!(Coords::new(-1, -1).tile_offset(), TILE_CELLS - 1);
        assert_eq!(Coords::new(0, 0).tile_offset(), 0);
    }

    #[test]
    fn lookup_without_loading_leaves_cache_empty() {
        let world: World<u8, &'static str> = World::new(checker);
        assert_eq!(world.terrain_at(Coords::new(3, 4)), 1);
        assert_eq!(world.entity_at(Coords::new(3, 4)), Some("boulder"));
        assert_eq!(world.loaded_tile_count(), 0);
    }

    #[test]
    fn loading_lookup_materializes_the_owning_tile() {
        let mut world: World<u8, &'static str> = World::new(checker);
        assert_eq!(world.entity_at_loading(Coords::new(3, 4)), Some("boulder"));
        assert_eq!(world.loaded_tile_count(), 1);
        assert!(world.is_loaded(Coords::new(0, 0)));
        assert_eq!(world.terrain_at_loading(Coords::new(-1, 0)), 1);
        assert_eq!(world.loaded_tile_count(), 2);
    }

    #[test]
    fn load_region_is_idempotent_and_generates_each_cell_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut world: World<u8, &'static str> = World::new(move |c| {
            counted.fetch_add(1, Ordering::Relaxed);
            checker(c)
        });
        let bounds =
            Bounds::new(Coords::new(0, 0), Coords::new(64, 64)).expect("bounds");
        world.load_region(bounds);
        assert_eq!(world.loaded_tile_count(), 4);
        assert_eq!(calls.load(Ordering::Relaxed), 4 * TILE_CELLS);

        world.load_region(bounds);
        assert_eq!(world.loaded_tile_count(), 4);
        assert_eq!(
            calls.load(Ordering::Relaxed),
            4 * TILE_CELLS,
            "reloading a cached region must not regenerate cells"
        );
        assert_eq!(world.entity_at(Coords::new(3, 4)), Some("boulder"));
    }

    #[test]
    fn overlay_takes_precedence_over_cache_and_generator() {
        let mut world: World<u8, &'static str> = World::new(checker);

        // Unloaded tile: the update itself warms the cache.
        let c = Coords::new(3, 4);
        world.update(c, |current| {
            assert_eq!(current, Some("boulder"));
            None
        });
        assert!(world.is_loaded(c));
        assert_eq!(world.entity_at(c), None);

        // Terrain never consults the overlay.
        assert_eq!(world.terrain_at(c), 1);

        // Updating a cell far away works identically on a fresh tile.
        let far = Coords::new(-200, 999);
        world.update(far, |current| {
            assert_eq!(current, None);
            Some("flower")
        });
        assert_eq!(world.entity_at(far), Some("flower"));
        assert_eq!(world.entity_at_loading(far), Some("flower"));
    }

    #[test]
    fn bounds_reject_inverted_corners() {
        assert!(Bounds::new(Coords::new(1, 0), Coords::new(0, 0)).is_err());
        assert!(Bounds::new(Coords::new(0, 0), Coords::new(0, 0)).is_ok());
    }
}
