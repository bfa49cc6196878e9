//! Group classified records into variables.
//!
//! Selected records are grouped by an identity key. Within a group, index parameters that differ
//! between records become outer axes, one chunk per coordinate, while the records' own extents
//! become the inner axes. Tiles of a larger grid are laid out along the inner axes by their origin,
//! which gives ragged chunks when tiles differ in size. Coordinates with no record are left out of
//! the chunk map and filled when the variable is materialized.
//!
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::catalog::{RecordId, RecordTable};
use crate::config::Config;
use crate::dtype::DType;
use crate::errors::{Error, Result};
use crate::header::{Grid, TypeVariant};
use crate::variable::{
    AttrValue, Axis, Backing, ChunkKey, Coordinates, Regular, Variable, FILL_VALUE_ATTRIBUTE,
};

/// A group of records that couldn't be made into a variable.
///
#[derive(Debug)]
pub struct Failure {
    pub name: String,
    pub identity: String,
    pub error: Error,
}

/// Records sharing one of these are part of the same variable.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct GroupKey {
    name: String,
    type_variant: Option<TypeVariant>,
    label: Option<String>,
    dtype: Option<DType>,
    nk: u32,

    /// Horizontal extents, except for tiles which vary in size
    extents: Option<(u32, u32)>,

    /// For tiles, with the tile origin zeroed out
    grid: Grid,
}

impl GroupKey {
    fn new(table: &RecordTable, config: &Config, id: RecordId) -> Self {
        let mut grid = table.grid[id];
        let extents = if grid.is_tile() {
            grid.ig3 = 0;
            grid.ig4 = 0;
            None
        } else {
            Some((table.ni[id], table.nj[id]))
        };

        Self {
            name: table.name[id].clone(),
            type_variant: (!config.ignore_type_variant).then_some(table.type_variant[id]),
            label: (!config.ignore_label).then(|| table.label[id].clone()),
            dtype: table.dtype[id],
            nk: table.nk[id],
            extents,
            grid,
        }
    }
}

/// An index parameter that can become an outer axis.
///
struct OuterParameter {
    axis: &'static str,
    column: fn(&RecordTable) -> &[i32],
}

fn datev(table: &RecordTable) -> &[i32] {
    &table.datev
}

fn ip1(table: &RecordTable) -> &[i32] {
    &table.ip1
}

fn ip2(table: &RecordTable) -> &[i32] {
    &table.ip2
}

fn ip3(table: &RecordTable) -> &[i32] {
    &table.ip3
}

/// Outer axes, outermost first
const OUTER_PARAMETERS: [OuterParameter; 4] = [
    OuterParameter {
        axis: "time",
        column: datev,
    },
    OuterParameter {
        axis: "ip2",
        column: ip2,
    },
    OuterParameter {
        axis: "ip3",
        column: ip3,
    },
    OuterParameter {
        axis: "level",
        column: ip1,
    },
];

/// Build every variable in a classified table.
///
/// Groups that fail, for instance because their type isn't supported, are returned as failures
/// and don't stop the others from being built.
///
pub fn build(table: &RecordTable, config: &Config) -> (Vec<Variable>, Vec<Failure>) {
    let mut groups: Vec<Vec<RecordId>> = vec![];
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    for id in (0..table.len()).filter(|&id| table.selected[id]) {
        let key = GroupKey::new(table, config, id);
        let group = *index.entry(key).or_insert_with(|| {
            groups.push(vec![]);
            groups.len() - 1
        });
        groups[group].push(id);
    }

    let mut names = Names::default();
    let mut dimensions = Dimensions::default();
    let mut variables = vec![];
    let mut failures = vec![];
    for ids in groups {
        let first = ids[0];
        let name = names.unique(&table.name[first]);
        match build_variable(table, config, name.clone(), &ids) {
            Ok(mut variable) => {
                for axis in variable.axes.iter_mut() {
                    axis.name = dimensions.resolve(axis);
                }
                variables.push(variable);
            }
            Err(error) => {
                let identity = identity(table, first);
                tracing::warn!(%name, %identity, %error, "skipping variable");
                failures.push(Failure {
                    name,
                    identity,
                    error,
                });
            }
        }
    }
    tracing::debug!(
        variables = variables.len(),
        failures = failures.len(),
        "built variables"
    );

    (variables, failures)
}

fn identity(table: &RecordTable, id: RecordId) -> String {
    format!(
        "{}:{}:{}",
        table.name[id],
        table.type_variant[id].as_str().trim_end(),
        table.label[id]
    )
}

fn build_variable(
    table: &RecordTable,
    config: &Config,
    name: String,
    ids: &[RecordId],
) -> Result<Variable> {
    let first = ids[0];
    let dtype = table.dtype[first].ok_or(Error::UnsupportedType {
        type_code: table.type_code[first],
        bit_width: table.bit_width[first],
    })?;
    let with_k = ids.iter().any(|&id| table.nk[id] > 1);
    let mut attributes = attributes(table, ids);
    let masked = table.type_variant[first].is_masked_data();

    let (axes, chunks, backing, gaps) = if ids.len() == 1 {
        let (axes, chunks) = fixed_inner(table, first, with_k);
        (axes, chunks, Backing::Single(first), false)
    } else {
        let mut axes = vec![];
        let mut chunks = vec![];
        let mut outer = vec![];
        for parameter in &OUTER_PARAMETERS {
            let column = (parameter.column)(table);
            let values: BTreeSet<i64> = ids.iter().map(|&id| column[id] as i64).collect();
            if values.len() > 1 {
                let axis = outer_axis(parameter.axis, values.into_iter().collect(), config);
                chunks.push(vec![1; axis.size]);
                axes.push(axis);
                outer.push(column);
            }
        }

        let tiles = Tiles::new(table, ids)?;
        let (inner_axes, inner_chunks) = match &tiles {
            Some(tiles) => tiles.inner(table.nk[first], with_k),
            None => fixed_inner(table, first, with_k),
        };

        let mut map: BTreeMap<ChunkKey, RecordId> = BTreeMap::new();
        for &id in ids {
            let mut key: ChunkKey = axes
                .iter()
                .zip(&outer)
                .filter_map(|(axis, column)| axis.coordinates.position(column[id] as i64))
                .collect();
            if with_k {
                key.push(0);
            }
            match &tiles {
                Some(tiles) => key.extend(tiles.key(table, id)),
                None => key.extend([0, 0]),
            }

            if let Some(previous) = map.insert(key.clone(), id) {
                tracing::debug!(
                    variable = %name,
                    ?key,
                    previous,
                    replacement = id,
                    "duplicate record for chunk"
                );
            }
        }

        axes.extend(inner_axes);
        chunks.extend(inner_chunks);
        let grid_size: usize = chunks.iter().map(|sizes| sizes.len()).product();
        let gaps = map.len() < grid_size;

        (axes, chunks, Backing::Chunked(map), gaps)
    };

    if gaps || masked {
        attributes.insert(
            FILL_VALUE_ATTRIBUTE.to_string(),
            AttrValue::Float(config.fill_value),
        );
    }

    let variable = Variable {
        name,
        identity: identity(table, first),
        axes,
        dtype,
        attributes,
        backing,
        chunks,
    };
    variable.validate()?;

    Ok(variable)
}

/// An outer axis over the sorted unique `values` of an index parameter.
///
/// With gap inference, values that all fall on a regular grid become a regular axis as long as
/// that at most doubles the axis length.
///
fn outer_axis(name: &str, values: Vec<i64>, config: &Config) -> Axis {
    if config.infer_gaps {
        if let (Some(&start), Some(&stop)) = (values.first(), values.last()) {
            let step = values.windows(2).map(|pair| pair[1] - pair[0]).min();
            if let Some(step) = step.filter(|&step| step > 0) {
                let size = ((stop - start) / step + 1) as usize;
                let on_grid = values.iter().all(|value| (value - start) % step == 0);
                if on_grid && size <= 2 * values.len() {
                    return Axis::new(name, size, Coordinates::Regular(Regular::new(start, step)));
                }
            }
        }
    }

    Axis::new(name, values.len(), Coordinates::Values(values))
}

/// Inner axes of a variable whose records all have the same extents
fn fixed_inner(table: &RecordTable, id: RecordId, with_k: bool) -> (Vec<Axis>, Vec<Vec<usize>>) {
    let mut axes = vec![];
    if with_k {
        axes.push(Axis::index("k", table.nk[id] as usize));
    }
    axes.push(Axis::index("j", table.nj[id] as usize));
    axes.push(Axis::index("i", table.ni[id] as usize));
    let chunks = axes.iter().map(|axis| vec![axis.size]).collect();

    (axes, chunks)
}

/// Layout of tiles along one horizontal axis: sorted tile origins and the tile size at each.
///
#[derive(Debug)]
struct TileAxis {
    origins: Vec<i32>,
    sizes: Vec<usize>,
}

impl TileAxis {
    fn new(tiles: impl Iterator<Item = (i32, u32)>) -> Self {
        let extents: BTreeMap<i32, u32> = tiles.collect();
        let origins: Vec<i32> = extents.keys().copied().collect();

        let mut sizes = vec![];
        for (index, origin) in origins.iter().enumerate() {
            let size = match origins.get(index + 1) {
                Some(next) => (next - origin) as usize,
                None => extents[origin] as usize,
            };
            sizes.push(size);
        }

        Self { origins, sizes }
    }

    fn position(&self, origin: i32) -> usize {
        self.origins.binary_search(&origin).unwrap_or_default()
    }

    fn check(&self, origin: i32, extent: u32) -> Result<()> {
        let size = self.sizes[self.position(origin)];
        if size != extent as usize {
            return Err(Error::MalformedRecord(format!(
                "tile at {origin} has extent {extent} but the next tile starts {size} further"
            )));
        }

        Ok(())
    }
}

/// Layout of a tiled grid.
///
#[derive(Debug)]
struct Tiles {
    i: TileAxis,
    j: TileAxis,
}

impl Tiles {
    /// Tile layout for a group of records, or `None` if they aren't tiles
    fn new(table: &RecordTable, ids: &[RecordId]) -> Result<Option<Self>> {
        if !table.grid[ids[0]].is_tile() {
            return Ok(None);
        }

        let i = TileAxis::new(ids.iter().map(|&id| (table.grid[id].ig3, table.ni[id])));
        let j = TileAxis::new(ids.iter().map(|&id| (table.grid[id].ig4, table.nj[id])));
        for &id in ids {
            i.check(table.grid[id].ig3, table.ni[id])?;
            j.check(table.grid[id].ig4, table.nj[id])?;
        }

        Ok(Some(Self { i, j }))
    }

    fn inner(&self, nk: u32, with_k: bool) -> (Vec<Axis>, Vec<Vec<usize>>) {
        let mut axes = vec![];
        let mut chunks = vec![];
        if with_k {
            axes.push(Axis::index("k", nk as usize));
            chunks.push(vec![nk as usize]);
        }
        axes.push(Axis::index("j", self.j.sizes.iter().sum()));
        chunks.push(self.j.sizes.clone());
        axes.push(Axis::index("i", self.i.sizes.iter().sum()));
        chunks.push(self.i.sizes.clone());

        (axes, chunks)
    }

    fn key(&self, table: &RecordTable, id: RecordId) -> [usize; 2] {
        [
            self.j.position(table.grid[id].ig4),
            self.i.position(table.grid[id].ig3),
        ]
    }
}

/// Attributes for values that are the same for every record of a group
fn attributes(table: &RecordTable, ids: &[RecordId]) -> BTreeMap<String, AttrValue> {
    fn uniform<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Option<T> {
        let mut values = values.into_iter();
        let first = values.next()?;
        values.all(|value| value == first).then_some(first)
    }

    let mut attributes = BTreeMap::new();
    let texts = [
        ("nomvar", uniform(ids.iter().map(|&id| table.name[id].clone()))),
        (
            "typvar",
            uniform(
                ids.iter()
                    .map(|&id| table.type_variant[id].as_str().trim_end().to_string()),
            ),
        ),
        ("etiket", uniform(ids.iter().map(|&id| table.label[id].clone()))),
        (
            "grtyp",
            uniform(ids.iter().map(|&id| (table.grid[id].grtyp as char).to_string())),
        ),
    ];
    for (name, value) in texts {
        if let Some(value) = value {
            attributes.insert(name.to_string(), AttrValue::Text(value));
        }
    }

    let ints: [(&str, fn(&RecordTable, RecordId) -> i32); 11] = [
        ("ip1", |table, id| table.ip1[id]),
        ("ip2", |table, id| table.ip2[id]),
        ("ip3", |table, id| table.ip3[id]),
        ("datev", |table, id| table.datev[id]),
        ("dateo", |table, id| table.dateo[id]),
        ("deet", |table, id| table.deet[id]),
        ("npas", |table, id| table.npas[id]),
        ("ig1", |table, id| table.grid[id].ig1),
        ("ig2", |table, id| table.grid[id].ig2),
        ("ig3", |table, id| table.grid[id].ig3),
        ("ig4", |table, id| table.grid[id].ig4),
    ];
    for (name, get) in ints {
        if let Some(value) = uniform(ids.iter().map(|&id| get(table, id))) {
            attributes.insert(name.to_string(), AttrValue::Int(value as i64));
        }
    }

    attributes
}

/// Hands out unique variable names, suffixing repeats with `_1`, `_2`, ...
///
#[derive(Default)]
struct Names {
    seen: HashMap<String, usize>,
}

impl Names {
    fn unique(&mut self, name: &str) -> String {
        let count = self.seen.entry(name.to_string()).or_default();
        let unique = match *count {
            0 => name.to_string(),
            n => format!("{name}_{n}"),
        };
        *count += 1;

        unique
    }
}

/// Makes sure that axes with the same name across variables are the same axis.
///
/// An axis that differs in size or coordinates from an earlier axis of the same name is renamed
/// with a numeric suffix.
///
#[derive(Default)]
struct Dimensions {
    seen: Vec<Axis>,
}

impl Dimensions {
    fn resolve(&mut self, axis: &Axis) -> String {
        let base = axis.name.clone();
        let mut suffix = 0;
        loop {
            let candidate = match suffix {
                0 => base.clone(),
                n => format!("{base}{n}"),
            };
            match self.seen.iter().find(|seen| seen.name == candidate) {
                Some(seen) if seen.size == axis.size && seen.coordinates == axis.coordinates => {
                    return candidate;
                }
                Some(_) => suffix += 1,
                None => {
                    let mut axis = axis.clone();
                    axis.name = candidate.clone();
                    self.seen.push(axis);

                    return candidate;
                }
            }
        }
    }
}
