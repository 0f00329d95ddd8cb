//! Hierarchical quadtree cell coverings over longitude/latitude.
//!
//! Level `L` divides the world (`[-180, 180] x [-90, 90]`) into `2^L x 2^L`
//! equal cells. A cell's token is its quadkey: one digit per level, each
//! `x_bit + 2 * y_bit` with row 0 at the south edge. A token's prefixes are its
//! ancestors, so every descendant of `q` sorts inside `[q, q33..3]`.
//!
//! Coverings are uniform-level: all cells of one level whose closed rectangle
//! touches the geometry. Because every touching cell is included, any point of
//! a geometry lies in an index cell, and the query ranges built here reach that
//! cell from every query cell containing the same point.

use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::{BBox, Geometry, LevelParams};
use geo::Geometry as GeoGeometry;

use crate::models::{intersects_rect, to_geo_geometry};

/// Finest level a token can address
pub const MAX_CELL_LEVEL: u8 = 30;

/// A quadtree cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    level: u8,
    x: u32,
    y: u32,
}

impl Cell {
    /// Cell at `level` with column `x` and row `y`, counted from the south-west
    pub fn new(level: u8, x: u32, y: u32) -> Result<Self> {
        if level == 0 || level > MAX_CELL_LEVEL {
            return Err(CellstoreError::validation(
                "cell",
                format!("level {} outside 1..={}", level, MAX_CELL_LEVEL),
            ));
        }
        let side = 1u64 << level;
        if x as u64 >= side || y as u64 >= side {
            return Err(CellstoreError::validation(
                "cell",
                format!("({}, {}) outside a level {} grid", x, y, level),
            ));
        }
        Ok(Self { level, x, y })
    }

    /// Parse a quadkey token
    pub fn from_token(token: &str) -> Result<Self> {
        let level = u8::try_from(token.len()).unwrap_or(u8::MAX);
        if level == 0 || level > MAX_CELL_LEVEL {
            return Err(CellstoreError::validation(
                "token",
                format!("'{}' must have 1..={} digits", token, MAX_CELL_LEVEL),
            ));
        }
        let (mut x, mut y) = (0u32, 0u32);
        for digit in token.chars() {
            let d = digit.to_digit(4).ok_or_else(|| {
                CellstoreError::validation("token", format!("'{}' has a non-quadkey digit", token))
            })?;
            x = (x << 1) | (d & 1);
            y = (y << 1) | (d >> 1);
        }
        Ok(Self { level, x, y })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn token(&self) -> String {
        (0..self.level)
            .rev()
            .map(|bit| {
                let digit = ((self.x >> bit) & 1) + 2 * ((self.y >> bit) & 1);
                char::from(b'0' + digit as u8)
            })
            .collect()
    }

    /// Closed rectangle the cell spans
    pub fn bounds(&self) -> BBox {
        // Edges are computed from grid indices so neighbours share them exactly.
        let (w, h) = cell_size(self.level);
        BBox {
            west: -180.0 + self.x as f64 * w,
            south: -90.0 + self.y as f64 * h,
            east: -180.0 + (self.x as f64 + 1.0) * w,
            north: -90.0 + (self.y as f64 + 1.0) * h,
        }
    }

    pub fn parent(&self) -> Option<Cell> {
        (self.level > 1).then(|| Cell { level: self.level - 1, x: self.x >> 1, y: self.y >> 1 })
    }

    pub fn children(&self) -> Option<[Cell; 4]> {
        if self.level >= MAX_CELL_LEVEL {
            return None;
        }
        let (level, x, y) = (self.level + 1, self.x << 1, self.y << 1);
        Some([
            Cell { level, x, y },
            Cell { level, x: x + 1, y },
            Cell { level, x, y: y + 1 },
            Cell { level, x: x + 1, y: y + 1 },
        ])
    }

    /// The cell outline as a polygon geometry
    pub fn to_geometry(&self) -> Geometry {
        self.bounds().to_polygon()
    }
}

fn cell_size(level: u8) -> (f64, f64) {
    let side = (1u64 << level) as f64;
    (360.0 / side, 180.0 / side)
}

/// Inclusive range of tokens `[start, end]` in lexicographic order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenRange {
    pub start: String,
    pub end: String,
}

impl TokenRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self { start: start.into(), end: end.into() }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.start.as_str() <= token && token <= self.end.as_str()
    }
}

/// Computes the cells that index a geometry and the ranges that find them
pub trait CellCovering: Send + Sync {
    /// Sorted, unique tokens covering `geometry`
    fn indexes_for(&self, geometry: &Geometry, params: &LevelParams) -> Result<Vec<String>>;

    /// Token ranges reaching every index cell (built with `index`) that
    /// touches `bbox`, using `query` to size the query covering
    fn query_ranges_for(
        &self,
        bbox: &BBox,
        query: &LevelParams,
        index: &LevelParams,
    ) -> Result<Vec<TokenRange>>;
}

/// The quadtree covering
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadCovering;

impl QuadCovering {
    pub fn new() -> Self {
        Self
    }

    /// Every cell at `level` whose closed rectangle touches `bbox`, further
    /// filtered by `keep`
    fn cells_at(level: u8, bbox: &BBox, keep: &dyn Fn(&Cell) -> bool) -> Vec<Cell> {
        let (w, h) = cell_size(level);
        let last = (1u64 << level) - 1;
        // One cell of slack per side; the exact rectangle test below trims it.
        let span = |lo: f64, hi: f64, origin: f64, size: f64| {
            let first = (((lo - origin) / size).floor() - 1.0).max(0.0) as u64;
            let last = ((((hi - origin) / size).floor() + 1.0).max(0.0) as u64).min(last);
            (first.min(last), last)
        };
        let (x0, x1) = span(bbox.west, bbox.east, -180.0, w);
        let (y0, y1) = span(bbox.south, bbox.north, -90.0, h);

        let mut cells = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let cell = Cell { level, x: x as u32, y: y as u32 };
                if cell.bounds().intersects(bbox) && keep(&cell) {
                    cells.push(cell);
                }
            }
        }
        cells
    }

    /// Uniform-level covering of a region described by its bbox and an exact
    /// predicate
    fn cover(bbox: &BBox, params: &LevelParams, keep: &dyn Fn(&Cell) -> bool) -> Result<Vec<Cell>> {
        validate_params(params)?;
        let bbox = clamp_to_world(bbox);

        let mut cells = Self::cells_at(params.min_level, &bbox, keep);
        let mut level = params.min_level;
        while level < params.max_level {
            let mut next = Vec::new();
            for cell in &cells {
                if let Some(children) = cell.children() {
                    next.extend(
                        children.into_iter().filter(|c| c.bounds().intersects(&bbox) && keep(c)),
                    );
                }
                if next.len() > params.max_cells {
                    break;
                }
            }
            if next.len() > params.max_cells {
                break;
            }
            cells = next;
            level += 1;
        }
        cells.sort();
        cells.dedup();
        Ok(cells)
    }

    /// Cells covering a closed box
    pub fn cover_bbox(&self, bbox: &BBox, params: &LevelParams) -> Result<Vec<Cell>> {
        Self::cover(bbox, params, &|_| true)
    }

    /// Cells covering a geometry
    pub fn cover_geometry(&self, geometry: &Geometry, params: &LevelParams) -> Result<Vec<Cell>> {
        let bbox = geometry
            .bbox()
            .ok_or_else(|| CellstoreError::validation("geometry", "geometry has no coordinates"))?;
        let geo_geom: GeoGeometry = to_geo_geometry(geometry);
        Self::cover(&bbox, params, &|cell| intersects_rect(&geo_geom, &cell.bounds()))
    }
}

impl CellCovering for QuadCovering {
    fn indexes_for(&self, geometry: &Geometry, params: &LevelParams) -> Result<Vec<String>> {
        let cells = self.cover_geometry(geometry, params)?;
        Ok(cells.iter().map(Cell::token).collect())
    }

    fn query_ranges_for(
        &self,
        bbox: &BBox,
        query: &LevelParams,
        index: &LevelParams,
    ) -> Result<Vec<TokenRange>> {
        validate_params(index)?;
        // Query cells deeper than the index cannot match anything extra.
        let query = LevelParams {
            min_level: query.min_level.min(index.max_level),
            max_level: query.max_level.min(index.max_level),
            max_cells: query.max_cells,
        };

        let mut ranges = Vec::new();
        for cell in self.cover_bbox(bbox, &query)? {
            let token = cell.token();
            let depth = (index.max_level - cell.level) as usize;
            ranges.push(TokenRange::new(token.clone(), format!("{}{}", token, "3".repeat(depth))));

            let mut ancestor = cell.parent();
            while let Some(a) = ancestor {
                if a.level < index.min_level {
                    break;
                }
                let t = a.token();
                ranges.push(TokenRange::new(t.clone(), t));
                ancestor = a.parent();
            }
        }
        Ok(merge_ranges(ranges))
    }
}

/// Sort ranges and merge the ones that overlap
pub fn merge_ranges(mut ranges: Vec<TokenRange>) -> Vec<TokenRange> {
    ranges.sort();
    let mut merged: Vec<TokenRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn validate_params(params: &LevelParams) -> Result<()> {
    if params.min_level == 0
        || params.min_level > params.max_level
        || params.max_level > MAX_CELL_LEVEL
    {
        return Err(CellstoreError::validation(
            "cover",
            format!(
                "levels must satisfy 1 <= min ({}) <= max ({}) <= {}",
                params.min_level, params.max_level, MAX_CELL_LEVEL
            ),
        ));
    }
    Ok(())
}

fn clamp_to_world(bbox: &BBox) -> BBox {
    BBox {
        west: bbox.west.clamp(-180.0, 180.0),
        south: bbox.south.clamp(-90.0, 90.0),
        east: bbox.east.clamp(-180.0, 180.0),
        north: bbox.north.clamp(-90.0, 90.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let cell = Cell::new(5, 19, 7).unwrap();
        let token = cell.token();
        assert_eq!(token.len(), 5);
        assert_eq!(Cell::from_token(&token).unwrap(), cell);
        assert!(Cell::from_token("0124").is_err());
        assert!(Cell::from_token("").is_err());
    }

    #[test]
    fn test_level_one_layout() {
        // digit = x + 2y, row 0 in the south
        assert_eq!(Cell::from_token("0").unwrap().bounds().to_array(), [-180.0, -90.0, 0.0, 0.0]);
        assert_eq!(Cell::from_token("1").unwrap().bounds().to_array(), [0.0, -90.0, 180.0, 0.0]);
        assert_eq!(Cell::from_token("2").unwrap().bounds().to_array(), [-180.0, 0.0, 0.0, 90.0]);
        assert_eq!(Cell::from_token("3").unwrap().bounds().to_array(), [0.0, 0.0, 180.0, 90.0]);
    }

    #[test]
    fn test_parent_is_token_prefix() {
        let cell = Cell::from_token("30211").unwrap();
        assert_eq!(cell.parent().unwrap().token(), "3021");
        for child in cell.children().unwrap() {
            assert!(child.token().starts_with("30211"));
            assert_eq!(child.parent(), Some(cell));
        }
        assert_eq!(Cell::from_token("3").unwrap().parent(), None);
    }

    #[test]
    fn test_point_refines_to_max_level() {
        let covering = QuadCovering::new();
        let params = LevelParams::new(8, 18, 4);
        let tokens = covering.indexes_for(&Geometry::point(115.21, -8.65), &params).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].len(), 18);
    }

    #[test]
    fn test_covering_respects_max_cells() {
        let covering = QuadCovering::new();
        let params = LevelParams::new(2, 12, 4);
        let polygon = Geometry::polygon(vec![vec![
            [-100.0, 40.0],
            [-96.0, 40.0],
            [-96.0, 41.0],
            [-100.0, 41.0],
            [-100.0, 40.0],
        ]]);
        let tokens = covering.indexes_for(&polygon, &params).unwrap();
        assert!(!tokens.is_empty() && tokens.len() <= 4);
        let level = tokens[0].len();
        assert!(tokens.iter().all(|t| t.len() == level));
        assert!(level > 2);
    }

    #[test]
    fn test_min_level_covering_kept_when_over_budget() {
        let covering = QuadCovering::new();
        let params = LevelParams::new(2, 10, 1);
        let world = BBox::new(-170.0, -80.0, 170.0, 80.0).unwrap();
        let cells = covering.cover_bbox(&world, &params).unwrap();
        assert_eq!(cells.len(), 16);
        assert!(cells.iter().all(|c| c.level() == 2));
    }

    #[test]
    fn test_query_ranges_reach_ancestors_and_descendants() {
        let covering = QuadCovering::new();
        let index = LevelParams::new(4, 12, 4);
        let query = LevelParams::new(1, 12, 8);
        let point = Geometry::point(10.5, 45.25);
        let small = BBox::new(10.4, 45.2, 10.6, 45.3).unwrap();

        let ranges = covering.query_ranges_for(&small, &query, &index).unwrap();
        for indexed in covering.indexes_for(&point, &index).unwrap() {
            assert!(ranges.iter().any(|r| r.contains(&indexed)), "{} not reachable", indexed);
        }

        // A coarse index cell above the query cells is found by a point range
        let coarse = LevelParams::new(4, 4, 1);
        let ranges = covering.query_ranges_for(&small, &query, &coarse).unwrap();
        let indexed = covering.indexes_for(&point, &coarse).unwrap();
        assert!(indexed.iter().all(|t| ranges.iter().any(|r| r.contains(t))));
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(vec![
            TokenRange::new("01", "0133"),
            TokenRange::new("0", "0"),
            TokenRange::new("012", "0123"),
            TokenRange::new("02", "0233"),
        ]);
        assert_eq!(
            merged,
            vec![
                TokenRange::new("0", "0"),
                TokenRange::new("01", "0133"),
                TokenRange::new("02", "0233"),
            ]
        );
    }

    #[test]
    fn test_rejects_bad_params() {
        let covering = QuadCovering::new();
        let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(covering.cover_bbox(&bbox, &LevelParams::new(0, 4, 4)).is_err());
        assert!(covering.cover_bbox(&bbox, &LevelParams::new(5, 4, 4)).is_err());
        assert!(covering.cover_bbox(&bbox, &LevelParams::new(1, 31, 4)).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn point_in_query_box_is_always_reachable(
                x in -179.9..179.9f64,
                y in -89.9..89.9f64,
                dw in 0.0..0.1f64,
                ds in 0.0..0.1f64,
                de in 0.0..5.0f64,
                dn in 0.0..5.0f64,
                fine in any::<bool>(),
            ) {
                let covering = QuadCovering::new();
                let (index, query) = if fine {
                    (LevelParams::new(8, 18, 4), LevelParams::new(1, 18, 32))
                } else {
                    (LevelParams::new(2, 10, 4), LevelParams::new(1, 10, 16))
                };
                let bbox = BBox::new(x - dw, y - ds, x + de, y + dn).unwrap();
                let ranges = covering.query_ranges_for(&bbox, &query, &index).unwrap();
                for token in covering.indexes_for(&Geometry::point(x, y), &index).unwrap() {
                    prop_assert!(ranges.iter().any(|r| r.contains(&token)));
                }
            }

            #[test]
            fn covering_is_uniform_and_bounded(
                x in -170.0..170.0f64,
                y in -80.0..80.0f64,
                w in 0.001..5.0f64,
                h in 0.001..5.0f64,
            ) {
                let covering = QuadCovering::new();
                let params = LevelParams::new(2, 16, 6);
                let polygon = BBox::new(x, y, x + w, y + h).unwrap().to_polygon();
                let tokens = covering.indexes_for(&polygon, &params).unwrap();
                prop_assert!(!tokens.is_empty());
                let level = tokens[0].len();
                prop_assert!(tokens.iter().all(|t| t.len() == level));
                prop_assert!(level == 2 || tokens.len() <= 6);
            }
        }
    }
}
