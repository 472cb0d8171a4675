//! Stream network post-processing
//!
//! Consumes the binary/ID stream raster produced by the stream-definition
//! stage together with the D8 flow-direction grid (TauDEM codes), and
//! produces:
//!
//! - a list of [`StreamSegment`]s, each one run of stream cells between a
//!   headwater or junction and the next junction or outlet, with a dense
//!   1-based ID, a stream order, and its traced cell sequence
//! - the stream raster relabeled with segment IDs
//! - a subbasin raster labeling every cell with the segment it drains into
//!
//! Serialization to vector line features goes through
//! [`segments_to_features`]; the actual file writing is the vector I/O
//! collaborator's job.

use crate::direction::{downstream_index, D8Direction, DirScheme, ALL_DIRECTIONS};
use crate::error::{Error, Result};
use hydroshed_core::vector::{AttributeValue, Feature};
use hydroshed_core::Raster;
use geo_types::{Coord, Geometry, LineString};
use ndarray::Array2;
use std::collections::{BTreeMap, VecDeque};

/// One stream reach between a headwater/junction and the next
/// junction/outlet.
#[derive(Debug, Clone)]
pub struct StreamSegment {
    /// Dense 1-based segment ID
    pub id: i32,
    /// Cell sequence from upstream end to downstream end
    pub cells: Vec<(usize, usize)>,
    /// Strahler stream order
    pub order: u32,
    /// ID of the segment this one drains into, None at outlets
    pub downstream: Option<i32>,
    /// Subbasin ID draining through this segment (equals `id`)
    pub subbasin: i32,
    /// Ground length along the traced cell path
    pub length: f64,
}

/// The post-processed stream network.
#[derive(Debug, Clone)]
pub struct StreamNetwork {
    pub segments: Vec<StreamSegment>,
    /// Stream cells labeled with their segment ID, nodata elsewhere
    pub stream_ids: Raster<i32>,
    /// Every cell labeled with the segment it drains into, nodata where
    /// flow leaves the grid without touching a stream
    pub subbasins: Raster<i32>,
}

const ID_NODATA: i32 = -9999;

/// Extract and order the stream network.
///
/// `streams` marks stream cells with values > 0; `flow_dir` carries TauDEM
/// D8 codes (1..8, anything else treated as no-flow). Both rasters must
/// share one extent.
pub fn build_stream_network(
    streams: &Raster<i32>,
    flow_dir: &Raster<i32>,
) -> Result<StreamNetwork> {
    let (rows, cols) = streams.shape();
    if flow_dir.shape() != (rows, cols) {
        let (ar, ac) = flow_dir.shape();
        return Err(Error::Core(hydroshed_core::Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar,
            ac,
        }));
    }

    let grid = GridView {
        streams,
        flow_dir,
        rows,
        cols,
    };

    // 1. Walk downstream from every headwater, assigning dense link IDs and
    //    recording each link's ordered cell run.
    let mut ids = Array2::<i32>::from_elem((rows, cols), ID_NODATA);
    let mut runs: Vec<Vec<(usize, usize)>> = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if !grid.is_stream(row, col) || ids[(row, col)] != ID_NODATA {
                continue;
            }
            if grid.inflowing_stream_cells(row, col) == 0 {
                trace_from_headwater(&grid, row, col, &mut ids, &mut runs);
            }
        }
    }

    // 2. Link segments downstream and measure their ground length.
    let csx = streams.cell_size_x();
    let csy = streams.cell_size_y();
    let mut segments: Vec<StreamSegment> = runs
        .iter()
        .enumerate()
        .map(|(idx, cells)| {
            let id = idx as i32 + 1;
            let mut length = 0.0;
            for &(r, c) in cells {
                if let Some(dir) = grid.direction_at(r, c) {
                    let (nr, nc) = downstream_index(r, c, dir);
                    if grid.in_bounds(nr, nc) {
                        length += dir.cell_length(csx, csy);
                    }
                }
            }
            let downstream = cells.last().and_then(|&(r, c)| {
                let dir = grid.direction_at(r, c)?;
                let (nr, nc) = downstream_index(r, c, dir);
                if !grid.in_bounds(nr, nc) {
                    return None;
                }
                let down_id = ids[(nr as usize, nc as usize)];
                (down_id != ID_NODATA && down_id != id).then_some(down_id)
            });
            StreamSegment {
                id,
                cells: cells.clone(),
                order: 1,
                downstream,
                subbasin: id,
                length,
            }
        })
        .collect();

    // Tail cell of a segment with no downstream neighbor still contributes
    // no length beyond its own traced steps, so lengths are done; now order.
    assign_strahler_orders(&mut segments);

    // 3. Eliminate zero-length (single-cell junction artifacts) reaches and
    //    renumber densely.
    let id_map = eliminate_zero_length(&mut segments);
    for cell_id in ids.iter_mut() {
        if *cell_id != ID_NODATA {
            *cell_id = *id_map.get(cell_id).unwrap_or(&ID_NODATA);
        }
    }

    let mut stream_ids = streams.with_same_meta::<i32>(rows, cols);
    stream_ids.set_nodata(Some(ID_NODATA));
    *stream_ids.data_mut() = ids;

    // 4. Subbasin labeling: multi-source upstream BFS from the labeled
    //    stream cells.
    let subbasins = label_subbasins(&grid, &stream_ids);

    Ok(StreamNetwork {
        segments,
        stream_ids,
        subbasins,
    })
}

/// Read-only view pairing the stream raster with the direction grid.
struct GridView<'a> {
    streams: &'a Raster<i32>,
    flow_dir: &'a Raster<i32>,
    rows: usize,
    cols: usize,
}

impl GridView<'_> {
    fn in_bounds(&self, row: isize, col: isize) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols
    }

    fn is_stream(&self, row: usize, col: usize) -> bool {
        let v = unsafe { self.streams.get_unchecked(row, col) };
        v > 0 && !self.streams.is_nodata(v)
    }

    fn direction_at(&self, row: usize, col: usize) -> Option<D8Direction> {
        let code = unsafe { self.flow_dir.get_unchecked(row, col) };
        if self.flow_dir.is_nodata(code) {
            return None;
        }
        D8Direction::from_code(code, DirScheme::TauDem).ok()
    }

    /// Number of neighboring stream cells whose flow enters (row, col).
    fn inflowing_stream_cells(&self, row: usize, col: usize) -> usize {
        let mut count = 0;
        for dir in ALL_DIRECTIONS {
            let (nr, nc) = downstream_index(row, col, dir);
            if !self.in_bounds(nr, nc) {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            if !self.is_stream(nr, nc) {
                continue;
            }
            let code = unsafe { self.flow_dir.get_unchecked(nr, nc) };
            if !self.flow_dir.is_nodata(code) && code == DirScheme::TauDem.inflow_code(dir) {
                count += 1;
            }
        }
        count
    }
}

/// Walk downstream from a headwater cell, starting a new link ID at every
/// junction, until the walk leaves the stream, the grid, or runs into an
/// already-labeled (larger) stream.
fn trace_from_headwater(
    grid: &GridView<'_>,
    row: usize,
    col: usize,
    ids: &mut Array2<i32>,
    runs: &mut Vec<Vec<(usize, usize)>>,
) {
    runs.push(vec![(row, col)]);
    ids[(row, col)] = runs.len() as i32;

    let (mut r, mut c) = (row, col);
    loop {
        let Some(dir) = grid.direction_at(r, c) else {
            break; // grid edge or pit: the reach ends here
        };
        let (nr, nc) = downstream_index(r, c, dir);
        if !grid.in_bounds(nr, nc) {
            break;
        }
        let (nr, nc) = (nr as usize, nc as usize);
        if !grid.is_stream(nr, nc) {
            break;
        }
        if ids[(nr, nc)] != ID_NODATA {
            break; // ran into a stream already traced from another headwater
        }
        if grid.inflowing_stream_cells(nr, nc) >= 2 {
            // Confluence: the downstream reach is a new link
            runs.push(Vec::new());
        }
        ids[(nr, nc)] = runs.len() as i32;
        runs.last_mut().expect("just pushed").push((nr, nc));
        r = nr;
        c = nc;
    }
}

/// Strahler ordering over the segment forest.
///
/// Headwaters are order 1. Where tributaries meet, the downstream segment
/// takes k+1 when at least two tributaries share the maximal order k, and k
/// otherwise.
fn assign_strahler_orders(segments: &mut [StreamSegment]) {
    let index_of: BTreeMap<i32, usize> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id, i))
        .collect();

    let mut upstream: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    let mut pending: BTreeMap<i32, usize> = BTreeMap::new();
    for seg in segments.iter() {
        pending.entry(seg.id).or_insert(0);
        if let Some(down) = seg.downstream {
            upstream.entry(down).or_default().push(seg.id);
            *pending.entry(down).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<i32> = pending
        .iter()
        .filter(|(_, &n)| n == 0)
        .map(|(&id, _)| id)
        .collect();

    while let Some(id) = queue.pop_front() {
        let order = match upstream.get(&id) {
            None => 1,
            Some(ups) => {
                let orders: Vec<u32> = ups
                    .iter()
                    .filter_map(|u| index_of.get(u).map(|&i| segments[i].order))
                    .collect();
                let max = orders.iter().copied().max().unwrap_or(1);
                let at_max = orders.iter().filter(|&&o| o == max).count();
                if at_max >= 2 {
                    max + 1
                } else {
                    max
                }
            }
        };
        let idx = index_of[&id];
        segments[idx].order = order;

        if let Some(down) = segments[idx].downstream {
            let n = pending.get_mut(&down).expect("downstream id known");
            *n -= 1;
            if *n == 0 {
                queue.push_back(down);
            }
        }
    }
}

/// Drop single-cell reaches (geometric length zero) and renumber the rest
/// densely, redirecting downstream references across the removed links.
fn eliminate_zero_length(segments: &mut Vec<StreamSegment>) -> BTreeMap<i32, i32> {
    let mut redirect: BTreeMap<i32, Option<i32>> = BTreeMap::new();
    for seg in segments.iter() {
        if seg.cells.len() < 2 {
            redirect.insert(seg.id, seg.downstream);
        }
    }

    // Follow chains of removed reaches to the first surviving one
    let resolve = |mut id: i32| -> Option<i32> {
        let mut hops = 0;
        while let Some(&next) = redirect.get(&id) {
            id = next?;
            hops += 1;
            if hops > redirect.len() {
                return None;
            }
        }
        Some(id)
    };

    segments.retain(|seg| !redirect.contains_key(&seg.id));

    let id_map: BTreeMap<i32, i32> = segments
        .iter()
        .enumerate()
        .map(|(i, seg)| (seg.id, i as i32 + 1))
        .collect();

    for seg in segments.iter_mut() {
        seg.downstream = seg
            .downstream
            .and_then(resolve)
            .and_then(|id| id_map.get(&id).copied());
        seg.id = id_map[&seg.id];
        seg.subbasin = seg.id;
    }

    if !redirect.is_empty() {
        tracing::debug!(removed = redirect.len(), "eliminated zero-length reaches");
    }

    id_map
}

/// Label every cell with the segment its flow first reaches.
fn label_subbasins(grid: &GridView<'_>, stream_ids: &Raster<i32>) -> Raster<i32> {
    let (rows, cols) = (grid.rows, grid.cols);
    let mut basins = Array2::<i32>::from_elem((rows, cols), ID_NODATA);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            let id = unsafe { stream_ids.get_unchecked(row, col) };
            if !stream_ids.is_nodata(id) {
                basins[(row, col)] = id;
                queue.push_back((row, col));
            }
        }
    }

    // BFS upstream: a neighbor joins the basin of the cell it flows into,
    // unless it is itself a stream cell (already seeded with its own ID).
    while let Some((row, col)) = queue.pop_front() {
        let basin = basins[(row, col)];
        for dir in ALL_DIRECTIONS {
            let (nr, nc) = downstream_index(row, col, dir);
            if !grid.in_bounds(nr, nc) {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            if basins[(nr, nc)] != ID_NODATA {
                continue;
            }
            let code = unsafe { grid.flow_dir.get_unchecked(nr, nc) };
            if grid.flow_dir.is_nodata(code) {
                continue;
            }
            if code == DirScheme::TauDem.inflow_code(dir) {
                basins[(nr, nc)] = basin;
                queue.push_back((nr, nc));
            }
        }
    }

    let mut output = stream_ids.with_same_meta::<i32>(rows, cols);
    output.set_nodata(Some(ID_NODATA));
    *output.data_mut() = basins;
    output
}

/// Convert segments into vector line features.
///
/// Coordinates run through the raster's geotransform (cell centers);
/// attribute names follow the external toolset's stream shapefile fields.
pub fn segments_to_features(
    segments: &[StreamSegment],
    reference: &Raster<i32>,
) -> Vec<Feature> {
    segments
        .iter()
        .map(|seg| {
            let coords: Vec<Coord<f64>> = seg
                .cells
                .iter()
                .map(|&(row, col)| {
                    let (x, y) = reference.pixel_to_geo(col, row);
                    Coord { x, y }
                })
                .collect();

            let mut feature = Feature::new(Geometry::LineString(LineString::new(coords)));
            feature.id = Some(seg.id as i64);
            feature.set_property("LINKNO", AttributeValue::Int(seg.id as i64));
            feature.set_property(
                "DSLINKNO",
                AttributeValue::Int(seg.downstream.map(i64::from).unwrap_or(-1)),
            );
            feature.set_property("ORDER", AttributeValue::Int(seg.order as i64));
            feature.set_property("LENGTH", AttributeValue::Float(seg.length));
            feature.set_property("SUBBASIN", AttributeValue::Int(seg.subbasin as i64));
            feature
        })
        .collect()
}
