//! Synthetic NetCDF classic files.
//!
//! Produces CDF-1 or CDF-2 bytes with fixed-size and record variables laid
//! out the way the netCDF library writes them: non-record variables first,
//! then interleaved records.

/// External type of a test variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcKind {
    Byte,
    Short,
    Int,
    Float,
    Double,
}

impl NcKind {
    fn code(self) -> u32 {
        match self {
            NcKind::Byte => 1,
            NcKind::Short => 3,
            NcKind::Int => 4,
            NcKind::Float => 5,
            NcKind::Double => 6,
        }
    }

    fn size(self) -> usize {
        match self {
            NcKind::Byte => 1,
            NcKind::Short => 2,
            NcKind::Int | NcKind::Float => 4,
            NcKind::Double => 8,
        }
    }

    fn encode(self, value: f64, out: &mut Vec<u8>) {
        match self {
            NcKind::Byte => out.push(value as i8 as u8),
            NcKind::Short => out.extend_from_slice(&(value as i16).to_be_bytes()),
            NcKind::Int => out.extend_from_slice(&(value as i32).to_be_bytes()),
            NcKind::Float => out.extend_from_slice(&(value as f32).to_be_bytes()),
            NcKind::Double => out.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

#[derive(Debug, Clone)]
enum AttrValue {
    Text(String),
    Numbers(NcKind, Vec<f64>),
}

#[derive(Debug, Clone)]
struct VarSpec {
    name: String,
    dims: Vec<usize>,
    kind: NcKind,
    attrs: Vec<(String, AttrValue)>,
    data: Vec<f64>,
}

/// Builder for NetCDF classic format files.
///
/// ```
/// use test_utils::{NcKind, NetCdfBuilder};
///
/// let bytes = NetCdfBuilder::classic()
///     .dimension("lat", 2)
///     .dimension("lon", 3)
///     .variable("temperature", &["lat", "lon"], NcKind::Float, vec![1.0; 6])
///     .build();
/// assert_eq!(&bytes[..4], b"CDF\x01");
/// ```
#[derive(Debug, Clone)]
pub struct NetCdfBuilder {
    offset64: bool,
    dims: Vec<(String, usize)>,
    num_records: usize,
    global_attrs: Vec<(String, AttrValue)>,
    vars: Vec<VarSpec>,
}

impl NetCdfBuilder {
    /// CDF-1 (32-bit offsets).
    pub fn classic() -> Self {
        Self {
            offset64: false,
            dims: Vec::new(),
            num_records: 0,
            global_attrs: Vec::new(),
            vars: Vec::new(),
        }
    }

    /// CDF-2 (64-bit offsets).
    pub fn offset64() -> Self {
        Self {
            offset64: true,
            ..Self::classic()
        }
    }

    pub fn dimension(mut self, name: &str, len: usize) -> Self {
        self.dims.push((name.to_string(), len));
        self
    }

    /// The unlimited dimension, holding `num_records` records.
    pub fn record_dimension(mut self, name: &str, num_records: usize) -> Self {
        self.dims.push((name.to_string(), 0));
        self.num_records = num_records;
        self
    }

    pub fn global_text(mut self, name: &str, value: &str) -> Self {
        self.global_attrs
            .push((name.to_string(), AttrValue::Text(value.to_string())));
        self
    }

    /// Add a variable. `data` is in row-major order across all records.
    ///
    /// # Panics
    ///
    /// Panics if a dimension name is unknown.
    pub fn variable(mut self, name: &str, dims: &[&str], kind: NcKind, data: Vec<f64>) -> Self {
        let dims = dims
            .iter()
            .map(|d| {
                self.dims
                    .iter()
                    .position(|(n, _)| n == d)
                    .unwrap_or_else(|| panic!("unknown dimension {}", d))
            })
            .collect();
        self.vars.push(VarSpec {
            name: name.to_string(),
            dims,
            kind,
            attrs: Vec::new(),
            data,
        });
        self
    }

    /// Attach a text attribute to the most recently added variable.
    pub fn text_attribute(mut self, name: &str, value: &str) -> Self {
        if let Some(var) = self.vars.last_mut() {
            var.attrs
                .push((name.to_string(), AttrValue::Text(value.to_string())));
        }
        self
    }

    /// Attach a numeric attribute, typed like its variable, to the most
    /// recently added variable.
    pub fn number_attribute(mut self, name: &str, value: f64) -> Self {
        if let Some(var) = self.vars.last_mut() {
            let kind = var.kind;
            var.attrs
                .push((name.to_string(), AttrValue::Numbers(kind, vec![value])));
        }
        self
    }

    fn is_record(&self, var: &VarSpec) -> bool {
        var.dims
            .first()
            .map(|&d| self.dims[d].1 == 0)
            .unwrap_or(false)
    }

    /// Bytes of one record, or of the whole variable when fixed-size.
    fn slab_len(&self, var: &VarSpec) -> usize {
        let skip = usize::from(self.is_record(var));
        var.dims[skip..]
            .iter()
            .map(|&d| self.dims[d].1)
            .product::<usize>()
            * var.kind.size()
    }

    pub fn build(&self) -> Vec<u8> {
        let vsizes: Vec<usize> = self.vars.iter().map(|v| padded(self.slab_len(v))).collect();
        let header_len = self.header(&vec![0; self.vars.len()], &vsizes).len();

        // Offsets: fixed-size variables, then the record section
        let mut begins = vec![0u64; self.vars.len()];
        let mut offset = header_len as u64;
        for (i, var) in self.vars.iter().enumerate() {
            if !self.is_record(var) {
                begins[i] = offset;
                offset += vsizes[i] as u64;
            }
        }
        let record_vars: Vec<usize> = (0..self.vars.len())
            .filter(|&i| self.is_record(&self.vars[i]))
            .collect();
        let lone_record = record_vars.len() == 1;
        for &i in &record_vars {
            begins[i] = offset;
            offset += if lone_record {
                self.slab_len(&self.vars[i])
            } else {
                vsizes[i]
            } as u64;
        }

        let mut out = self.header(&begins, &vsizes);

        for var in self.vars.iter().filter(|v| !self.is_record(v)) {
            for &value in &var.data {
                var.kind.encode(value, &mut out);
            }
            pad(&mut out);
        }

        for record in 0..self.num_records {
            for &i in &record_vars {
                let var = &self.vars[i];
                let per_record = self.slab_len(var) / var.kind.size();
                let values = var
                    .data
                    .iter()
                    .skip(record * per_record)
                    .take(per_record);
                for &value in values {
                    var.kind.encode(value, &mut out);
                }
                if !lone_record {
                    pad(&mut out);
                }
            }
        }

        out
    }

    fn header(&self, begins: &[u64], vsizes: &[usize]) -> Vec<u8> {
        let mut out = b"CDF".to_vec();
        out.push(if self.offset64 { 2 } else { 1 });
        out.extend_from_slice(&(self.num_records as u32).to_be_bytes());

        list_prefix(&mut out, 0x0A, self.dims.len());
        for (name, len) in &self.dims {
            write_name(&mut out, name);
            out.extend_from_slice(&(*len as u32).to_be_bytes());
        }

        write_attributes(&mut out, &self.global_attrs);

        list_prefix(&mut out, 0x0B, self.vars.len());
        for (i, var) in self.vars.iter().enumerate() {
            write_name(&mut out, &var.name);
            out.extend_from_slice(&(var.dims.len() as u32).to_be_bytes());
            for &d in &var.dims {
                out.extend_from_slice(&(d as u32).to_be_bytes());
            }
            write_attributes(&mut out, &var.attrs);
            out.extend_from_slice(&var.kind.code().to_be_bytes());
            out.extend_from_slice(&(vsizes[i] as u32).to_be_bytes());
            if self.offset64 {
                out.extend_from_slice(&begins[i].to_be_bytes());
            } else {
                out.extend_from_slice(&(begins[i] as u32).to_be_bytes());
            }
        }

        out
    }
}

/// Overwrite the record count of a built file.
pub fn set_num_records(file: &mut [u8], num_records: u32) {
    file[4..8].copy_from_slice(&num_records.to_be_bytes());
}

/// Overwrite the declared length of dimension `index` of a built file,
/// leaving the data section untouched.
///
/// # Panics
///
/// Panics if the file has fewer than `index + 1` dimensions.
pub fn set_dimension_length(file: &mut [u8], index: usize, length: u32) {
    let word = |at: usize| u32::from_be_bytes([file[at], file[at + 1], file[at + 2], file[at + 3]]);
    assert!(index < word(12) as usize, "no dimension {}", index);

    let mut pos = 16;
    for _ in 0..index {
        pos += 4 + padded(word(pos) as usize) + 4;
    }
    pos += 4 + padded(word(pos) as usize);
    file[pos..pos + 4].copy_from_slice(&length.to_be_bytes());
}

fn padded(len: usize) -> usize {
    (len + 3) / 4 * 4
}

fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn list_prefix(out: &mut Vec<u8>, tag: u32, len: usize) {
    if len == 0 {
        out.extend_from_slice(&[0u8; 8]);
    } else {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    pad(out);
}

fn write_attributes(out: &mut Vec<u8>, attrs: &[(String, AttrValue)]) {
    list_prefix(out, 0x0C, attrs.len());
    for (name, value) in attrs {
        write_name(out, name);
        match value {
            AttrValue::Text(text) => {
                out.extend_from_slice(&2u32.to_be_bytes());
                out.extend_from_slice(&(text.len() as u32).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            AttrValue::Numbers(kind, values) => {
                out.extend_from_slice(&kind.code().to_be_bytes());
                out.extend_from_slice(&(values.len() as u32).to_be_bytes());
                for &v in values {
                    kind.encode(v, out);
                }
            }
        }
        pad(out);
    }
}
