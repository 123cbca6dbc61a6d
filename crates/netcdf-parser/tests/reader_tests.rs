//! Header parsing and windowed extraction over synthetic files.

use netcdf_parser::{
    parse_header, AttributeValue, FormatVersion, NcType, NetCdfError, VariableReader,
};
use test_utils::{set_dimension_length, set_num_records, NcKind, NetCdfBuilder};

fn sample_file() -> Vec<u8> {
    NetCdfBuilder::classic()
        .global_text("title", "synthetic analysis")
        .dimension("lat", 3)
        .dimension("lon", 4)
        .variable("lat", &["lat"], NcKind::Float, vec![10.0, 20.0, 30.0])
        .text_attribute("units", "degrees_north")
        .variable(
            "t2m",
            &["lat", "lon"],
            NcKind::Double,
            (0..12).map(|i| 270.0 + i as f64).collect(),
        )
        .number_attribute("_FillValue", -9999.0)
        .build()
}

/// Read `name` by walking the file in `window`-byte slices.
fn read_windowed(file: &[u8], name: &str, window: usize) -> Vec<f64> {
    let header = parse_header(file, file.len() as u64).unwrap();
    let var = header.variable(name).unwrap();
    let mut reader = VariableReader::new(&header, var);

    for (i, slice) in file.chunks(window).enumerate() {
        let start = (i * window) as u64;
        if reader.overlaps(start, start + slice.len() as u64) {
            reader.consume(slice, start);
        }
    }
    assert!(reader.is_complete());
    reader.into_values()
}

#[test]
fn test_header_contents() {
    let file = sample_file();
    let header = parse_header(&file, file.len() as u64).unwrap();

    assert_eq!(header.version, FormatVersion::Classic);
    assert_eq!(header.dimensions.len(), 2);
    assert_eq!(header.attributes[0].name, "title");
    assert_eq!(
        header.attributes[0].value,
        AttributeValue::Text("synthetic analysis".to_string())
    );

    let t2m = header.variable("t2m").unwrap();
    assert_eq!(t2m.nc_type, NcType::Double);
    assert_eq!(header.shape(t2m), vec![3, 4]);
    assert_eq!(header.dimension_names(t2m), vec!["lat", "lon"]);
    assert_eq!(header.value_count(t2m), 12);
    assert_eq!(t2m.fill_value(), Some(-9999.0));
    assert!(!header.is_record_variable(t2m));
}

#[test]
fn test_values_independent_of_window_size() {
    let file = sample_file();
    let expected: Vec<f64> = (0..12).map(|i| 270.0 + i as f64).collect();

    for window in [1, 3, 7, 64, file.len()] {
        assert_eq!(read_windowed(&file, "t2m", window), expected, "window {}", window);
        assert_eq!(read_windowed(&file, "lat", window), vec![10.0, 20.0, 30.0]);
    }
}

#[test]
fn test_fill_value_becomes_nan() {
    let file = NetCdfBuilder::classic()
        .dimension("x", 4)
        .variable("depth", &["x"], NcKind::Short, vec![5.0, -1.0, 7.0, -1.0])
        .number_attribute("_FillValue", -1.0)
        .build();

    let values = read_windowed(&file, "depth", 5);
    assert_eq!(values[0], 5.0);
    assert!(values[1].is_nan());
    assert_eq!(values[2], 7.0);
    assert!(values[3].is_nan());
}

#[test]
fn test_interleaved_record_variables() {
    let file = NetCdfBuilder::offset64()
        .record_dimension("time", 3)
        .dimension("station", 2)
        .variable("pressure", &["time", "station"], NcKind::Int, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        .variable("wind", &["time", "station"], NcKind::Float, vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5])
        .build();

    let header = parse_header(&file, file.len() as u64).unwrap();
    assert_eq!(header.version, FormatVersion::Offset64);
    assert_eq!(header.num_records, 3);

    let pressure = header.variable("pressure").unwrap();
    assert!(header.is_record_variable(pressure));
    assert_eq!(header.shape(pressure), vec![3, 2]);
    let extent = header.extent(pressure);
    assert_eq!(extent.count, 3);
    assert_eq!(extent.stride, 16);
    assert_eq!(extent.total_bytes(), 24);

    assert_eq!(
        read_windowed(&file, "pressure", 6),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
    assert_eq!(
        read_windowed(&file, "wind", 6),
        vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5]
    );
}

#[test]
fn test_short_window_is_incomplete() {
    let file = sample_file();
    match parse_header(&file[..20], file.len() as u64) {
        Err(NetCdfError::Incomplete { available }) => assert_eq!(available, 20),
        other => panic!("expected Incomplete, got {:?}", other.map(|h| h.header_size)),
    }
}

#[test]
fn test_truncated_data_leaves_reader_incomplete() {
    let file = sample_file();
    let header = parse_header(&file, file.len() as u64).unwrap();
    let var = header.variable("t2m").unwrap();
    let mut reader = VariableReader::new(&header, var);

    let cut = &file[..file.len() - 12];
    reader.consume(cut, 0);
    assert!(!reader.is_complete());
    assert!(reader.values_read() < 12);
}

#[test]
fn test_dimensions_overflowing_offsets_are_rejected() {
    let mut file = NetCdfBuilder::classic()
        .dimension("a", 1)
        .dimension("b", 1)
        .dimension("c", 1)
        .variable("v", &["a", "b", "c"], NcKind::Double, vec![1.0])
        .build();
    for index in 0..3 {
        set_dimension_length(&mut file, index, 0x7FFF_FFFF);
    }

    match parse_header(&file, file.len() as u64) {
        Err(NetCdfError::InvalidFormat(msg)) => assert!(msg.contains("'v'"), "{}", msg),
        other => panic!("expected InvalidFormat, got {:?}", other.map(|h| h.header_size)),
    }
}

#[test]
fn test_huge_record_count_reads_without_allocating() {
    let mut file = NetCdfBuilder::classic()
        .record_dimension("time", 2)
        .variable("obs", &["time"], NcKind::Double, vec![1.0, 2.0])
        .build();
    set_num_records(&mut file, 0xFFFF_FFFE);

    let header = parse_header(&file, file.len() as u64).unwrap();
    let var = header.variable("obs").unwrap();
    assert_eq!(header.value_count(var), 0xFFFF_FFFE);

    let mut reader = VariableReader::new(&header, var);
    reader.consume(&file, 0);
    assert_eq!(reader.values_read(), 2);
    assert!(!reader.is_complete());
}
