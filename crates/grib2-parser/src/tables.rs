//! Code table lookups for parameter names and level descriptions.
//!
//! Only the parameters commonly found in NCEP and MRMS products are named;
//! anything else falls back to a `P{discipline}_{category}_{number}` code.

/// Short name for a parameter identified by (discipline, category, number).
pub fn parameter_short_name(discipline: u8, category: u8, number: u8) -> String {
    let name = match (discipline, category, number) {
        // Temperature
        (0, 0, 0) => "TMP",
        (0, 0, 2) => "POT",
        (0, 0, 6) => "DPT",
        // Moisture
        (0, 1, 0) => "SPFH",
        (0, 1, 1) => "RH",
        (0, 1, 3) => "PWAT",
        (0, 1, 7) => "PRATE",
        (0, 1, 8) => "APCP",
        // Momentum
        (0, 2, 0) => "WDIR",
        (0, 2, 1) => "WIND",
        (0, 2, 2) => "UGRD",
        (0, 2, 3) => "VGRD",
        (0, 2, 8) => "VVEL",
        (0, 2, 22) => "GUST",
        // Mass
        (0, 3, 0) => "PRES",
        (0, 3, 1) => "PRMSL",
        (0, 3, 5) => "HGT",
        // Cloud
        (0, 6, 1) => "TCDC",
        // Stability
        (0, 7, 6) => "CAPE",
        (0, 7, 7) => "CIN",
        // Radar
        (0, 16, 195) => "REFD",
        (0, 16, 196) => "REFC",
        (0, 19, 0) => "VIS",
        // MRMS local tables
        (209, 0, 16) => "REFL",
        (209, 1, 0) => "PRECIP_RATE",
        (209, 1, 1) => "QPE",
        // Oceanographic
        (10, 3, 0) => "WTMP",
        (10, 0, 3) => "HTSGW",
        _ => return format!("P{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

/// Human readable description of a fixed surface (code table 4.5).
pub fn level_description(level_type: u8, level_value: u32) -> String {
    match level_type {
        1 => "surface".to_string(),
        2 => "cloud base".to_string(),
        3 => "cloud top".to_string(),
        4 => "0C isotherm".to_string(),
        6 => "max wind".to_string(),
        7 => "tropopause".to_string(),
        8 => "top of atmosphere".to_string(),
        10 | 200 => "entire atmosphere".to_string(),
        // Isobaric values are encoded in Pa
        100 => format!("{} mb", level_value / 100),
        101 => "mean sea level".to_string(),
        102 => format!("{} m above MSL", level_value),
        103 => format!("{} m above ground", level_value),
        106 => format!("{} m below surface", level_value),
        108 => format!("{} mb above ground", level_value / 100),
        220 => "planetary boundary layer".to_string(),
        _ => format!("level type {} value {}", level_type, level_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_parameters() {
        assert_eq!(parameter_short_name(0, 0, 0), "TMP");
        assert_eq!(parameter_short_name(0, 2, 2), "UGRD");
        assert_eq!(parameter_short_name(209, 0, 16), "REFL");
    }

    #[test]
    fn test_unknown_parameter_fallback() {
        assert_eq!(parameter_short_name(0, 250, 3), "P0_250_3");
    }

    #[test]
    fn test_level_descriptions() {
        assert_eq!(level_description(100, 50000), "500 mb");
        assert_eq!(level_description(103, 2), "2 m above ground");
        assert_eq!(level_description(1, 0), "surface");
    }
}
