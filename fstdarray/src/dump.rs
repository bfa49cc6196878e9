use std::fmt;

use crate::dataset::Dataset;
use crate::dtype::DType;
use crate::variable::{Variable, FILL_VALUE_ATTRIBUTE};

/// Textual summary of a dataset's metadata, in the style of `ncdump -h`.
///
pub struct Dump<'a> {
    dataset: &'a Dataset,
}

impl<'a> Dump<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }
}

fn type_name(dtype: DType) -> &'static str {
    match dtype {
        DType::U8 => "ubyte",
        DType::I32 => "int",
        DType::I64 => "int64",
        DType::U32 => "uint",
        DType::U64 => "uint64",
        DType::F32 => "float",
        DType::F64 => "double",
    }
}

fn write_variable(f: &mut fmt::Formatter<'_>, variable: &Variable) -> fmt::Result {
    let name = &variable.name;
    let dims: Vec<&str> = variable.axes.iter().map(|axis| axis.name.as_str()).collect();
    if dims.is_empty() {
        writeln!(f, "\t{} {name} ;", type_name(variable.dtype))?;
    } else {
        writeln!(f, "\t{} {name}({}) ;", type_name(variable.dtype), dims.join(", "))?;
    }
    for (key, value) in &variable.attributes {
        if key != FILL_VALUE_ATTRIBUTE {
            writeln!(f, "\t\t{name}:{key} = {value} ;")?;
        }
    }

    Ok(())
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variables = self.dataset.variables();

        writeln!(f, "netcdf dataset {{")?;
        writeln!(f, "dimensions:")?;
        let mut seen: Vec<&str> = vec![];
        for axis in variables.iter().flat_map(|variable| &variable.axes) {
            if !seen.contains(&axis.name.as_str()) {
                seen.push(&axis.name);
                writeln!(f, "\t{} = {} ;", axis.name, axis.size)?;
            }
        }

        writeln!(f, "variables:")?;
        for variable in variables {
            write_variable(f, variable)?;
        }

        writeln!(f, "}}")
    }
}
