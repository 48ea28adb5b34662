use crate::{error::DemCoreError, raster::Bounds, Dataset};
use std::collections::BTreeSet;

/// Identifies a single 1-degree DEM tile by the integer coordinates of
/// its southwest corner.
///
/// `TileId` is deliberately integer, not floating point: equality and
/// ordering are exact, and a `BTreeSet<TileId>` gives the
/// `(lat_sw, lon_sw)`-sorted iteration order spec §5 requires for
/// deterministic fetch ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    /// Latitude of the tile's southwest corner, in whole degrees.
    pub lat_sw: i32,
    /// Longitude of the tile's southwest corner, in whole degrees.
    pub lon_sw: i32,
}

impl TileId {
    /// Constructs a `TileId` directly from its SW-corner integer
    /// coordinates.
    pub fn new(lat_sw: i32, lon_sw: i32) -> Self {
        Self { lat_sw, lon_sw }
    }

    /// The tile whose half-open cell `[lat_sw, lat_sw+1) x [lon_sw,
    /// lon_sw+1)` contains the given point.
    ///
    /// Per spec §3's Tile Identifier computation rule, the SW-corner
    /// component is `floor(v)` for non-negative `v` and `v.trunc()`
    /// for negative `v`. Those two agree for every integer input, and
    /// for every *positive* fractional input; they diverge only for a
    /// negative fractional input, where this intentionally truncates
    /// toward zero rather than flooring (e.g. `-35.5` names tile row
    /// `-35`, not `-36`). This is the literal rule specified for "which
    /// tile owns this point," distinct from `tiles_for_bounds`, which
    /// must enumerate every tile a box overlaps and uses plain
    /// floor/ceil to do so correctly.
    pub fn containing(lat: f64, lon: f64) -> Self {
        Self {
            lat_sw: sw_component(lat),
            lon_sw: sw_component(lon),
        }
    }

    /// Returns this tile's exact `[lat_sw, lat_sw+1) x [lon_sw,
    /// lon_sw+1)` bounds.
    pub fn bounds(self) -> Bounds {
        Bounds::new(
            f64::from(self.lon_sw),
            f64::from(self.lat_sw),
            f64::from(self.lon_sw) + 1.0,
            f64::from(self.lat_sw) + 1.0,
        )
        .expect("tile SW corners are always within valid coordinate range")
    }

    /// Canonical filename for this tile under the given dataset:
    /// `tile_{N|S}{lat:02}_{E|W}{lon:03}_{dataset}.tif`.
    pub fn filename(self, dataset: Dataset) -> String {
        let (lat_letter, lat_mag) = sign_and_magnitude(self.lat_sw);
        let (lon_letter, lon_mag) = sign_and_magnitude_lon(self.lon_sw);
        format!(
            "tile_{lat_letter}{lat_mag:02}_{lon_letter}{lon_mag:03}_{}.tif",
            dataset.file_tag()
        )
    }
}

/// Parses a canonical tile filename into its `TileId` and `Dataset`.
///
/// Strict: any deviation from the exact grammar is rejected, never
/// silently coerced.
pub fn parse_filename(name: &str) -> Option<(TileId, Dataset)> {
    let stem = name.strip_suffix(".tif")?;
    let rest = stem.strip_prefix("tile_")?;

    let lat_letter = rest.chars().next()?;
    let lat_sign = match lat_letter {
        'N' => 1,
        'S' => -1,
        _ => return None,
    };
    let rest = &rest[1..];
    if rest.len() < 2 || !rest.as_bytes()[..2].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let lat_mag: i32 = rest[..2].parse().ok()?;
    let rest = &rest[2..];
    let rest = rest.strip_prefix('_')?;

    let lon_letter = rest.chars().next()?;
    let lon_sign = match lon_letter {
        'E' => 1,
        'W' => -1,
        _ => return None,
    };
    let rest = &rest[1..];
    if rest.len() < 3 || !rest.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let lon_mag: i32 = rest[..3].parse().ok()?;
    let rest = &rest[3..];
    let dataset_tag = rest.strip_prefix('_')?;

    let dataset = Dataset::parse_file_tag(dataset_tag)?;
    let lat_sw = lat_sign * lat_mag;
    let lon_sw = lon_sign * lon_mag;

    if !(-90..=90).contains(&lat_sw) || !(-180..=180).contains(&lon_sw) {
        return None;
    }

    Some((TileId::new(lat_sw, lon_sw), dataset))
}

/// Every 1-degree tile whose interior intersects `bounds`.
///
/// Uses half-open `[lat_sw, lat_sw+1)` cells, so a bounds edge exactly
/// coincident with a tile boundary (e.g. `west == -90.0`) selects only
/// the tile to the east/north of that edge — never both sides.
pub fn tiles_for_bounds(bounds: Bounds) -> BTreeSet<TileId> {
    let lat_start = bounds.south.floor() as i32;
    let lat_end = bounds.north.ceil() as i32; // exclusive
    let lon_start = bounds.west.floor() as i32;
    let lon_end = bounds.east.ceil() as i32; // exclusive

    let mut out = BTreeSet::new();
    for lat_sw in lat_start..lat_end {
        for lon_sw in lon_start..lon_end {
            out.insert(TileId::new(lat_sw, lon_sw));
        }
    }
    out
}

fn sw_component(v: f64) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    if v >= 0.0 {
        v.floor() as i32
    } else {
        v.trunc() as i32
    }
}

fn sign_and_magnitude(lat_sw: i32) -> (char, i32) {
    if lat_sw < 0 {
        ('S', -lat_sw)
    } else {
        ('N', lat_sw)
    }
}

fn sign_and_magnitude_lon(lon_sw: i32) -> (char, i32) {
    if lon_sw < 0 {
        ('W', -lon_sw)
    } else {
        ('E', lon_sw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_round_trips() {
        let id = TileId::new(35, -90);
        let name = id.filename(Dataset::Dem30mGlobal);
        assert_eq!(name, "tile_N35_W090_dem30m_global.tif");
        assert_eq!(parse_filename(&name), Some((id, Dataset::Dem30mGlobal)));
    }

    #[test]
    fn filename_zero_is_north_east() {
        let id = TileId::new(0, 0);
        assert_eq!(
            id.filename(Dataset::Dem90mGlobal),
            "tile_N00_E000_dem90m_global.tif"
        );
    }

    #[test]
    fn parse_filename_rejects_garbage() {
        assert_eq!(parse_filename("not_a_tile.tif"), None);
        assert_eq!(parse_filename("tile_X35_W090_dem30m_global.tif"), None);
        assert_eq!(parse_filename("tile_N35_W090_dem99m_fake.tif"), None);
        assert_eq!(parse_filename("tile_N35_W090_dem30m_global.png"), None);
    }

    #[test]
    fn tile_covers_exactly_its_cell() {
        let id = TileId::new(35, -90);
        let b = id.bounds();
        assert_eq!((b.west, b.south, b.east, b.north), (-90.0, 35.0, -89.0, 36.0));
    }

    #[test]
    fn tiles_for_bounds_half_open_at_integer_meridian() {
        let bounds = Bounds::new(-90.0, 35.0, -89.0, 36.0).unwrap();
        let tiles = tiles_for_bounds(bounds);
        assert_eq!(tiles, BTreeSet::from([TileId::new(35, -90)]));
    }

    #[test]
    fn tiles_for_bounds_round_trips_from_tile_bounds() {
        let id = TileId::new(35, -90);
        let tiles = tiles_for_bounds(id.bounds());
        assert_eq!(tiles, BTreeSet::from([id]));
    }

    #[test]
    fn tiles_for_bounds_covers_multi_tile_region() {
        let bounds = Bounds::new(-91.0, 35.0, -89.0, 37.0).unwrap();
        let tiles = tiles_for_bounds(bounds);
        assert_eq!(
            tiles,
            BTreeSet::from([
                TileId::new(35, -91),
                TileId::new(35, -90),
                TileId::new(36, -91),
                TileId::new(36, -90),
            ])
        );
    }

    #[test]
    fn containing_uses_trunc_for_negative_fractional() {
        // -35.5 truncates toward zero to -35, per the literal spec rule,
        // even though that tile's cell does not contain the point.
        assert_eq!(sw_component(-35.5), -35);
        assert_eq!(sw_component(35.5), 35);
        assert_eq!(sw_component(-35.0), -35);
    }
}
