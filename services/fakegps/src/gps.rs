//! The synthetic fix
//!
//! Built once from the publisher settings and re-sent unchanged every cycle.

use uavcan_legacy::{Fix, FixStatus};

use crate::config::PublisherSettings;
use crate::error::{NodeError, Result};

/// Largest magnitude of a 27-bit signed height field
const MAX_HEIGHT_MM: i32 = (1 << 26) - 1;

/// Degrees to the wire's fixed-point `deg * 1e8`, rounded to nearest
pub fn degrees_to_1e8(degrees: f64) -> i64 {
    (degrees * 1e8).round() as i64
}

fn fix_status(raw: u8) -> Result<FixStatus> {
    match raw {
        0 => Ok(FixStatus::NoFix),
        1 => Ok(FixStatus::TimeOnly),
        2 => Ok(FixStatus::Fix2D),
        3 => Ok(FixStatus::Fix3D),
        other => Err(NodeError::config(format!(
            "Fix status {other} invalid, expected 0..=3"
        ))),
    }
}

/// Build the broadcast fix, rejecting values the message cannot carry
pub fn fix_from_settings(settings: &PublisherSettings) -> Result<Fix> {
    if !(-90.0..=90.0).contains(&settings.latitude_deg) {
        return Err(NodeError::config(format!(
            "Latitude {} outside -90..=90",
            settings.latitude_deg
        )));
    }
    if !(-180.0..=180.0).contains(&settings.longitude_deg) {
        return Err(NodeError::config(format!(
            "Longitude {} outside -180..=180",
            settings.longitude_deg
        )));
    }
    for (name, value) in [
        ("height_msl_mm", settings.height_msl_mm),
        ("height_ellipsoid_mm", settings.height_ellipsoid_mm),
    ] {
        if value.abs() > MAX_HEIGHT_MM {
            return Err(NodeError::config(format!(
                "{name} {value} does not fit in 27 bits"
            )));
        }
    }
    if settings.sats_used > 63 {
        return Err(NodeError::config(format!(
            "sats_used {} above 63",
            settings.sats_used
        )));
    }

    Ok(Fix {
        latitude_deg_1e8: degrees_to_1e8(settings.latitude_deg),
        longitude_deg_1e8: degrees_to_1e8(settings.longitude_deg),
        height_msl_mm: settings.height_msl_mm,
        height_ellipsoid_mm: settings.height_ellipsoid_mm,
        ned_velocity: settings.ned_velocity,
        sats_used: settings.sats_used,
        status: fix_status(settings.status)?,
        pdop: settings.pdop,
        ..Default::default()
    })
}

/// Fix at the default position: 55.7544426 N, 48.742684 E, 6.5 m below sea level
pub fn reference_fix() -> Fix {
    Fix {
        latitude_deg_1e8: degrees_to_1e8(55.754_442_6),
        longitude_deg_1e8: degrees_to_1e8(48.742_684),
        height_msl_mm: -6500,
        height_ellipsoid_mm: 0,
        ned_velocity: [0.0; 3],
        sats_used: 10,
        status: FixStatus::Fix3D,
        pdop: 99.0,
        ..Default::default()
    }
}
