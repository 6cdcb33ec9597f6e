//! Typed views of the schema-requirement files.
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::datatypes::TypeTag;
use super::error::FileToolsError;
use super::file_tools::FileTools;

/// Field name -> accepted type tags
pub type FieldTypes = BTreeMap<String, Vec<TypeTag>>;

pub const DEVICE_FORMAT_NAME: &str = "device_format";
pub const MEASUREMENT_FORMAT_NAME: &str = "measurement_format";
pub const GOALPOST_FORMAT_NAME: &str = "goalpost_format";
pub const SUB_DEVICES_NAME: &str = "sub_devices";
pub const AUX_IDS_NAME: &str = "aux_ids";
pub const MEAS_DATA_NAME: &str = "meas_data";
pub const OPTIONAL_FIELDS_NAME: &str = "optional_fields";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub required_fields: FieldTypes,
    pub device_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementFormat {
    pub required_fields: FieldTypes,
    #[serde(default)]
    pub meas_classes: Vec<String>,
    #[serde(default)]
    pub meas_stages: Vec<String>,
    #[serde(default)]
    pub meas_sites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalpostFormat {
    pub required_fields: FieldTypes,
    pub testtypes: Vec<String>,
}

/// What a parent device type expects of one kind of sub-device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubDeviceRule {
    /// Inclusive index range such as `"0-3"`; absent means exactly one un-indexed entry
    #[serde(default)]
    pub index: Option<String>,
    /// The sub-device's trailing id must appear in the parent's uid
    #[serde(rename = "id_inUID", default)]
    pub id_in_uid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubDeviceTable {
    pub entry_fields: FieldTypes,
    #[serde(default)]
    pub optional_entry_fields: FieldTypes,
    /// parent device type -> sub-device type -> rule
    pub requirements: FxHashMap<String, BTreeMap<String, SubDeviceRule>>,
}

impl SubDeviceTable {
    pub fn rules_for(&self, device_type: &str) -> Option<&BTreeMap<String, SubDeviceRule>> {
        self.requirements.get(device_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxIdRule {
    /// No two devices may share an id of this type
    #[serde(default)]
    pub unique: bool,
    /// Ids of this type are hex strings
    #[serde(default)]
    pub hex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxIdTable {
    pub entry_fields: FieldTypes,
    pub types: FxHashMap<String, AuxIdRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasDataFormats {
    /// Keys every meas_data entry carries
    pub entry_fields: FieldTypes,
    /// data_format -> additional required keys
    pub formats: FxHashMap<String, FieldTypes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalFields {
    pub fields: FieldTypes,
}

/// All schema-requirement files, loaded once per session and shared by the validators
#[derive(Debug, Clone)]
pub struct Formats {
    pub device: DeviceFormat,
    pub measurement: MeasurementFormat,
    pub goalpost: GoalpostFormat,
    pub sub_devices: SubDeviceTable,
    pub aux_ids: AuxIdTable,
    pub meas_data: MeasDataFormats,
    pub optional: OptionalFields,
}

impl Formats {
    /// Load every schema file by logical name, falling back to the bundled copies
    pub fn load(tools: &FileTools) -> Result<Self, FileToolsError> {
        Ok(Self {
            device: tools.load_json_as(DEVICE_FORMAT_NAME)?,
            measurement: tools.load_json_as(MEASUREMENT_FORMAT_NAME)?,
            goalpost: tools.load_json_as(GOALPOST_FORMAT_NAME)?,
            sub_devices: tools.load_json_as(SUB_DEVICES_NAME)?,
            aux_ids: tools.load_json_as(AUX_IDS_NAME)?,
            meas_data: tools.load_json_as(MEAS_DATA_NAME)?,
            optional: tools.load_json_as(OPTIONAL_FIELDS_NAME)?,
        })
    }

    /// Only the schema files compiled into the library
    pub fn bundled() -> Result<Self, FileToolsError> {
        Self::load(&FileTools::new(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_formats_parse() {
        let formats = Formats::bundled().unwrap();
        assert!(formats.device.required_fields.contains_key("uid"));
        assert!(formats
            .measurement
            .required_fields
            .contains_key("meas_time"));
        assert_eq!(formats.goalpost.testtypes.len(), 4);
        let mainboard = formats.sub_devices.rules_for("mainboard").unwrap();
        assert_eq!(mainboard.get("pmt"), Some(&SubDeviceRule::default()));
        assert!(formats.sub_devices.rules_for("pmt").is_none());
        assert!(formats.meas_data.formats.contains_key("histogram"));
        assert!(formats.optional.fields.contains_key("support_files"));
    }

    #[test]
    fn test_sub_device_rule_keys() {
        let rule: SubDeviceRule = serde_json::from_str(r#"{"index": "0-3", "id_inUID": true}"#).unwrap();
        assert_eq!(rule.index.as_deref(), Some("0-3"));
        assert!(rule.id_in_uid);
    }
}
