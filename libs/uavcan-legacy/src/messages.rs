//! Message Definitions
//!
//! The data types this library speaks: `uavcan.equipment.gnss.Fix` (outbound),
//! `uavcan.protocol.NodeStatus` (heartbeat, both directions) and the response half of
//! the `uavcan.protocol.GetNodeInfo` service.

use std::fmt;

use crate::dsdl::{BitReader, BitWriter};
use crate::error::StackError;

/// A broadcastable UAVCAN v0 data type
pub trait Message: Sized + Clone + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE_ID: u16;
    const DATA_TYPE_SIGNATURE: u64;
    const FULL_NAME: &'static str;

    fn encode(&self, writer: &mut BitWriter) -> Result<(), StackError>;

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, StackError>;

    fn to_bytes(&self) -> Result<Vec<u8>, StackError> {
        let mut writer = BitWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.into_bytes())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, StackError> {
        Self::decode(&mut BitReader::new(bytes))
    }
}

/// Fix quality reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixStatus {
    #[default]
    NoFix,
    TimeOnly,
    Fix2D,
    Fix3D,
}

impl FixStatus {
    fn from_raw(value: u8) -> Self {
        match value & 0x3 {
            0 => FixStatus::NoFix,
            1 => FixStatus::TimeOnly,
            2 => FixStatus::Fix2D,
            _ => FixStatus::Fix3D,
        }
    }

    fn raw(self) -> u8 {
        self as u8
    }
}

/// `uavcan.equipment.gnss.Fix`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fix {
    /// Local time, microseconds (0 = unknown)
    pub timestamp_usec: u64,
    /// GNSS time, microseconds (0 = unknown)
    pub gnss_timestamp_usec: u64,
    /// One of the `GNSS_TIME_STANDARD_*` constants
    pub gnss_time_standard: u8,
    pub num_leap_seconds: u8,
    pub longitude_deg_1e8: i64,
    pub latitude_deg_1e8: i64,
    pub height_ellipsoid_mm: i32,
    pub height_msl_mm: i32,
    pub ned_velocity: [f32; 3],
    pub sats_used: u8,
    pub status: FixStatus,
    pub pdop: f32,
    pub position_covariance: Vec<f32>,
    pub velocity_covariance: Vec<f32>,
}

impl Fix {
    pub const GNSS_TIME_STANDARD_NONE: u8 = 0;
    pub const GNSS_TIME_STANDARD_TAI: u8 = 1;
    pub const GNSS_TIME_STANDARD_UTC: u8 = 2;
    pub const GNSS_TIME_STANDARD_GPS: u8 = 3;

    pub const MAX_COVARIANCE_LEN: usize = 9;
}

impl Message for Fix {
    const DATA_TYPE_ID: u16 = 1060;
    const DATA_TYPE_SIGNATURE: u64 = 0x54C1_572B_9E07_F297;
    const FULL_NAME: &'static str = "uavcan.equipment.gnss.Fix";

    fn encode(&self, writer: &mut BitWriter) -> Result<(), StackError> {
        for (name, values) in [
            ("position_covariance", &self.position_covariance),
            ("velocity_covariance", &self.velocity_covariance),
        ] {
            if values.len() > Self::MAX_COVARIANCE_LEN {
                return Err(StackError::encoding(format!(
                    "{name} holds {} items, at most {} allowed",
                    values.len(),
                    Self::MAX_COVARIANCE_LEN
                )));
            }
        }
        if self.sats_used > 63 {
            return Err(StackError::encoding(format!(
                "sats_used {} does not fit in 6 bits",
                self.sats_used
            )));
        }

        writer.write_unsigned(self.timestamp_usec, 56);
        writer.write_unsigned(self.gnss_timestamp_usec, 56);
        writer.write_unsigned(u64::from(self.gnss_time_standard), 3);
        writer.write_void(5);
        writer.write_unsigned(u64::from(self.num_leap_seconds), 8);
        writer.write_signed(self.longitude_deg_1e8, 37);
        writer.write_signed(self.latitude_deg_1e8, 37);
        writer.write_signed(i64::from(self.height_ellipsoid_mm), 27);
        writer.write_signed(i64::from(self.height_msl_mm), 27);
        for component in self.ned_velocity {
            writer.write_f16(component);
        }
        writer.write_unsigned(u64::from(self.sats_used), 6);
        writer.write_unsigned(u64::from(self.status.raw()), 2);
        writer.write_f16(self.pdop);
        writer.write_void(4);

        writer.write_unsigned(self.position_covariance.len() as u64, 4);
        for &value in &self.position_covariance {
            writer.write_f16(value);
        }
        // last field: no length prefix
        for &value in &self.velocity_covariance {
            writer.write_f16(value);
        }
        Ok(())
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, StackError> {
        let timestamp_usec = reader.read_unsigned(56)?;
        let gnss_timestamp_usec = reader.read_unsigned(56)?;
        let gnss_time_standard = reader.read_unsigned(3)? as u8;
        reader.skip(5)?;
        let num_leap_seconds = reader.read_unsigned(8)? as u8;
        let longitude_deg_1e8 = reader.read_signed(37)?;
        let latitude_deg_1e8 = reader.read_signed(37)?;
        let height_ellipsoid_mm = reader.read_signed(27)? as i32;
        let height_msl_mm = reader.read_signed(27)? as i32;
        let mut ned_velocity = [0.0; 3];
        for component in &mut ned_velocity {
            *component = reader.read_f16()?;
        }
        let sats_used = reader.read_unsigned(6)? as u8;
        let status = FixStatus::from_raw(reader.read_unsigned(2)? as u8);
        let pdop = reader.read_f16()?;
        reader.skip(4)?;

        let position_len = reader.read_unsigned(4)? as usize;
        if position_len > Self::MAX_COVARIANCE_LEN {
            return Err(StackError::transfer(format!(
                "position_covariance length {position_len} out of range"
            )));
        }
        let position_covariance = (0..position_len)
            .map(|_| reader.read_f16())
            .collect::<Result<Vec<_>, _>>()?;

        let mut velocity_covariance = Vec::new();
        while reader.remaining_bits() >= 16
            && velocity_covariance.len() < Self::MAX_COVARIANCE_LEN
        {
            velocity_covariance.push(reader.read_f16()?);
        }

        Ok(Self {
            timestamp_usec,
            gnss_timestamp_usec,
            gnss_time_standard,
            num_leap_seconds,
            longitude_deg_1e8,
            latitude_deg_1e8,
            height_ellipsoid_mm,
            height_msl_mm,
            ned_velocity,
            sats_used,
            status,
            pdop,
            position_covariance,
            velocity_covariance,
        })
    }
}

/// Abstract node health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Ok,
    Warning,
    Error,
    Critical,
}

impl Health {
    fn from_raw(value: u8) -> Self {
        match value & 0x3 {
            0 => Health::Ok,
            1 => Health::Warning,
            2 => Health::Error,
            _ => Health::Critical,
        }
    }

    fn raw(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Health::Ok => "OK",
            Health::Warning => "WARNING",
            Health::Error => "ERROR",
            Health::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Operational,
    Initialization,
    Maintenance,
    SoftwareUpdate,
    Offline,
    /// Values 4..=6 are not assigned
    Reserved(u8),
}

impl Mode {
    fn from_raw(value: u8) -> Self {
        match value & 0x7 {
            0 => Mode::Operational,
            1 => Mode::Initialization,
            2 => Mode::Maintenance,
            3 => Mode::SoftwareUpdate,
            7 => Mode::Offline,
            other => Mode::Reserved(other),
        }
    }

    fn raw(self) -> u8 {
        match self {
            Mode::Operational => 0,
            Mode::Initialization => 1,
            Mode::Maintenance => 2,
            Mode::SoftwareUpdate => 3,
            Mode::Offline => 7,
            Mode::Reserved(value) => value & 0x7,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Operational => f.write_str("OPERATIONAL"),
            Mode::Initialization => f.write_str("INITIALIZATION"),
            Mode::Maintenance => f.write_str("MAINTENANCE"),
            Mode::SoftwareUpdate => f.write_str("SOFTWARE_UPDATE"),
            Mode::Offline => f.write_str("OFFLINE"),
            Mode::Reserved(value) => write!(f, "RESERVED({value})"),
        }
    }
}

/// `uavcan.protocol.NodeStatus`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub uptime_sec: u32,
    pub health: Health,
    pub mode: Mode,
    pub sub_mode: u8,
    pub vendor_specific_status_code: u16,
}

impl Message for NodeStatus {
    const DATA_TYPE_ID: u16 = 341;
    const DATA_TYPE_SIGNATURE: u64 = 0x0F08_68D0_C1A7_C6F1;
    const FULL_NAME: &'static str = "uavcan.protocol.NodeStatus";

    fn encode(&self, writer: &mut BitWriter) -> Result<(), StackError> {
        writer.write_unsigned(u64::from(self.uptime_sec), 32);
        writer.write_unsigned(u64::from(self.health.raw()), 2);
        writer.write_unsigned(u64::from(self.mode.raw()), 3);
        writer.write_unsigned(u64::from(self.sub_mode), 3);
        writer.write_unsigned(u64::from(self.vendor_specific_status_code), 16);
        Ok(())
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, StackError> {
        Ok(Self {
            uptime_sec: reader.read_unsigned(32)? as u32,
            health: Health::from_raw(reader.read_unsigned(2)? as u8),
            mode: Mode::from_raw(reader.read_unsigned(3)? as u8),
            sub_mode: reader.read_unsigned(3)? as u8,
            vendor_specific_status_code: reader.read_unsigned(16)? as u16,
        })
    }
}

/// `uavcan.protocol.SoftwareVersion`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftwareVersion {
    pub major: u8,
    pub minor: u8,
    /// Bit 0: `vcs_commit` is set, bit 1: `image_crc` is set
    pub optional_field_flags: u8,
    pub vcs_commit: u32,
    pub image_crc: u64,
}

impl SoftwareVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self {
            major,
            minor,
            optional_field_flags: 0,
            vcs_commit: 0,
            image_crc: 0,
        }
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_unsigned(u64::from(self.major), 8);
        writer.write_unsigned(u64::from(self.minor), 8);
        writer.write_unsigned(u64::from(self.optional_field_flags), 8);
        writer.write_unsigned(u64::from(self.vcs_commit), 32);
        writer.write_unsigned(self.image_crc, 64);
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, StackError> {
        Ok(Self {
            major: reader.read_unsigned(8)? as u8,
            minor: reader.read_unsigned(8)? as u8,
            optional_field_flags: reader.read_unsigned(8)? as u8,
            vcs_commit: reader.read_unsigned(32)? as u32,
            image_crc: reader.read_unsigned(64)?,
        })
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// `uavcan.protocol.HardwareVersion`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareVersion {
    pub major: u8,
    pub minor: u8,
    pub unique_id: [u8; 16],
    pub certificate_of_authenticity: Vec<u8>,
}

impl HardwareVersion {
    pub const MAX_CERTIFICATE_LEN: usize = 255;

    fn encode(&self, writer: &mut BitWriter) -> Result<(), StackError> {
        if self.certificate_of_authenticity.len() > Self::MAX_CERTIFICATE_LEN {
            return Err(StackError::encoding(format!(
                "certificate_of_authenticity holds {} bytes, at most {} allowed",
                self.certificate_of_authenticity.len(),
                Self::MAX_CERTIFICATE_LEN
            )));
        }
        writer.write_unsigned(u64::from(self.major), 8);
        writer.write_unsigned(u64::from(self.minor), 8);
        for byte in self.unique_id {
            writer.write_unsigned(u64::from(byte), 8);
        }
        // not the last field of GetNodeInfo, so the length prefix stays
        writer.write_unsigned(self.certificate_of_authenticity.len() as u64, 8);
        for &byte in &self.certificate_of_authenticity {
            writer.write_unsigned(u64::from(byte), 8);
        }
        Ok(())
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, StackError> {
        let major = reader.read_unsigned(8)? as u8;
        let minor = reader.read_unsigned(8)? as u8;
        let mut unique_id = [0u8; 16];
        for byte in &mut unique_id {
            *byte = reader.read_unsigned(8)? as u8;
        }
        let certificate_len = reader.read_unsigned(8)? as usize;
        let certificate_of_authenticity = (0..certificate_len)
            .map(|_| reader.read_unsigned(8).map(|byte| byte as u8))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            major,
            minor,
            unique_id,
            certificate_of_authenticity,
        })
    }
}

/// `uavcan.protocol.GetNodeInfo` (service type 1); the request is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetNodeInfo;

impl GetNodeInfo {
    pub const SERVICE_TYPE_ID: u8 = 1;
    pub const DATA_TYPE_SIGNATURE: u64 = 0xEE46_8A81_21C4_6A9E;
    pub const FULL_NAME: &'static str = "uavcan.protocol.GetNodeInfo";
}

/// Response to `GetNodeInfo`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetNodeInfoResponse {
    pub status: NodeStatus,
    pub software_version: SoftwareVersion,
    pub hardware_version: HardwareVersion,
    pub name: String,
}

impl GetNodeInfoResponse {
    pub const MAX_NAME_LEN: usize = 80;

    pub fn to_bytes(&self) -> Result<Vec<u8>, StackError> {
        if self.name.len() > Self::MAX_NAME_LEN {
            return Err(StackError::encoding(format!(
                "node name is {} bytes, at most {} allowed",
                self.name.len(),
                Self::MAX_NAME_LEN
            )));
        }
        let mut writer = BitWriter::new();
        self.status.encode(&mut writer)?;
        self.software_version.encode(&mut writer);
        self.hardware_version.encode(&mut writer)?;
        // last field: no length prefix
        for byte in self.name.bytes() {
            writer.write_unsigned(u64::from(byte), 8);
        }
        Ok(writer.into_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StackError> {
        let mut reader = BitReader::new(bytes);
        let status = NodeStatus::decode(&mut reader)?;
        let software_version = SoftwareVersion::decode(&mut reader)?;
        let hardware_version = HardwareVersion::decode(&mut reader)?;
        let mut name = Vec::new();
        while reader.remaining_bits() >= 8 && name.len() < Self::MAX_NAME_LEN {
            name.push(reader.read_unsigned(8)? as u8);
        }
        let name = String::from_utf8(name)
            .map_err(|e| StackError::transfer(format!("node name is not UTF-8: {e}")))?;
        Ok(Self {
            status,
            software_version,
            hardware_version,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fix() -> Fix {
        Fix {
            latitude_deg_1e8: 5_575_444_260,
            longitude_deg_1e8: 4_874_268_400,
            height_msl_mm: -6500,
            sats_used: 10,
            status: FixStatus::Fix3D,
            pdop: 99.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_fix_encoded_size() {
        let bytes = sample_fix().to_bytes().unwrap();
        assert_eq!(bytes.len(), 42);
    }

    #[test]
    fn test_fix_decodes_what_was_encoded() {
        let mut fix = sample_fix();
        fix.ned_velocity = [1.5, -0.25, 0.0];
        fix.position_covariance = vec![1.0, 2.0];
        fix.velocity_covariance = vec![0.5; 3];

        let decoded = Fix::from_bytes(&fix.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, fix);
    }

    #[test]
    fn test_fix_rejects_oversized_covariance() {
        let mut fix = sample_fix();
        fix.position_covariance = vec![0.0; 10];
        assert!(matches!(fix.to_bytes(), Err(StackError::Encoding(_))));

        let mut fix = sample_fix();
        fix.sats_used = 64;
        assert!(matches!(fix.to_bytes(), Err(StackError::Encoding(_))));
    }

    #[test]
    fn test_node_status_layout() {
        let status = NodeStatus {
            uptime_sec: 0x0102_0304,
            health: Health::Warning,
            mode: Mode::Maintenance,
            sub_mode: 0,
            vendor_specific_status_code: 0xBEEF,
        };
        let bytes = status.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01, 0b0101_0000, 0xEF, 0xBE]);
        assert_eq!(NodeStatus::from_bytes(&bytes).unwrap(), status);
    }

    #[test]
    fn test_node_status_reserved_mode() {
        let bytes = [0, 0, 0, 0, 0b0010_1000, 0, 0];
        let status = NodeStatus::from_bytes(&bytes).unwrap();
        assert_eq!(status.mode, Mode::Reserved(5));
        assert_eq!(status.mode.to_string(), "RESERVED(5)");
        assert!(NodeStatus::from_bytes(&bytes[..4]).is_err());
    }

    fn sample_node_info() -> GetNodeInfoResponse {
        let mut unique_id = [0u8; 16];
        unique_id[..5].copy_from_slice(b"12345");
        GetNodeInfoResponse {
            status: NodeStatus {
                uptime_sec: 3,
                ..Default::default()
            },
            software_version: SoftwareVersion::new(0, 2),
            hardware_version: HardwareVersion {
                unique_id,
                ..Default::default()
            },
            name: "uavcan communicator".to_string(),
        }
    }

    #[test]
    fn test_get_node_info_layout() {
        let info = sample_node_info();
        let bytes = info.to_bytes().unwrap();
        // status 7 + software 15 + hardware 2 + 16 + 1 + name 19
        assert_eq!(bytes.len(), 60);
        assert_eq!(&bytes[7..9], &[0, 2]);
        assert_eq!(&bytes[24..29], b"12345");
        assert_eq!(bytes[40], 0);
        assert_eq!(&bytes[41..], b"uavcan communicator");
        assert_eq!(GetNodeInfoResponse::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn test_get_node_info_rejects_long_name() {
        let info = GetNodeInfoResponse {
            name: "x".repeat(81),
            ..sample_node_info()
        };
        assert!(matches!(info.to_bytes(), Err(StackError::Encoding(_))));
        assert_eq!(info.software_version.to_string(), "0.2");
    }
}
