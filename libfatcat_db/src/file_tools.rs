use bson::Document;
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{FileToolsError, LoadError};

/// Environment variable naming an extra configuration directory
pub const CONFIG_DIR_ENV: &str = "FATCAT_CONFIG_DIR";
/// Directory searched last, relative to the working directory
pub const DEFAULT_CONFIG_DIR: &str = "configs";

/// Schema files compiled into the library. A file of the same name on the search path wins.
fn load_bundled(name: &str) -> Option<&'static str> {
    match name {
        "device_format" => Some(include_str!("data/device_format.json")),
        "measurement_format" => Some(include_str!("data/measurement_format.json")),
        "goalpost_format" => Some(include_str!("data/goalpost_format.json")),
        "sub_devices" => Some(include_str!("data/sub_devices.json")),
        "aux_ids" => Some(include_str!("data/aux_ids.json")),
        "meas_data" => Some(include_str!("data/meas_data.json")),
        "optional_fields" => Some(include_str!("data/optional_fields.json")),
        _ => None,
    }
}

/// Finds and reads configuration and schema files by logical name (`mongo_config` ->
/// `mongo_config.json`).
#[derive(Debug, Clone, Default)]
pub struct FileTools {
    search_dirs: Vec<PathBuf>,
}

impl FileTools {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// The standard search path: the explicit directory, then `$FATCAT_CONFIG_DIR`, then
    /// `./configs`
    pub fn from_env(explicit_dir: Option<&Path>) -> Self {
        let mut search_dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = explicit_dir {
            search_dirs.push(dir.to_path_buf());
        }
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            search_dirs.push(PathBuf::from(dir));
        }
        search_dirs.push(PathBuf::from(DEFAULT_CONFIG_DIR));
        Self { search_dirs }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Path of `<name>.json` on the search path, if any
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(format!("{name}.json")))
            .find(|path| path.exists())
    }

    /// Raw text of a file by logical name
    pub fn load_text(&self, name: &str) -> Result<String, FileToolsError> {
        if let Some(path) = self.find(name) {
            log::debug!("Loading {name} from {}", path.to_string_lossy());
            return Ok(std::fs::read_to_string(path)?);
        }
        load_bundled(name)
            .map(String::from)
            .ok_or_else(|| FileToolsError::NotFound(name.to_string()))
    }

    pub fn load_json(&self, name: &str) -> Result<Value, FileToolsError> {
        self.load_json_as(name)
    }

    pub fn load_json_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, FileToolsError> {
        let text = self.load_text(name)?;
        serde_json::from_str(&text).map_err(|source| FileToolsError::ParsingError {
            name: name.to_string(),
            source,
        })
    }
}

/// A candidate document read from disk
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    /// File name without directories; this is what the duplicate-filename check compares
    pub file_name: String,
    pub md5: String,
    pub document: Document,
}

/// Read a candidate JSON document.
///
/// Stricter than a plain parse: duplicate keys, `NaN`/`Infinity` literals and non-object top
/// levels are all structural errors.
pub fn load_document(path: &Path) -> Result<LoadedFile, LoadError> {
    if !path.exists() {
        return Err(LoadError::BadFilePath(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let non_finite = find_non_finite_literals(&text);
    if !non_finite.is_empty() {
        return Err(LoadError::NonFinite(non_finite.join(", ")));
    }

    let StrictValue(value) = serde_json::from_str(&text)?;
    if !value.is_object() {
        return Err(LoadError::NotAnObject);
    }
    let document = bson::to_document(&value)?;

    Ok(LoadedFile {
        path: path.to_path_buf(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        md5: format!("{:x}", md5::compute(&bytes)),
        document,
    })
}

/// Locate `NaN`, `Infinity` and `-Infinity` tokens outside of string literals
pub fn find_non_finite_literals(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut line = 1;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            if token == "NaN" || token == "Infinity" {
                let signed = start > 0 && chars[start - 1] == '-';
                let shown = if signed { format!("-{token}") } else { token };
                found.push(format!("{shown} at line {line}"));
            }
            continue;
        }
        i += 1;
    }
    found
}

/// A JSON value whose objects are rejected when they repeat a key
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any valid JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Number::from_f64(v)
            .map(Value::Number)
            .ok_or_else(|| E::custom(format!("non-finite number {v}")))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items: Vec<Value> = Vec::new();
        while let Some(StrictValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            if object.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key \"{key}\"")));
            }
            let StrictValue(value) = map.next_value()?;
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            dir.path(),
            "pmt_001.json",
            r#"{"uid": "pmt-001", "device_type": "pmt", "gain": 5.0e6, "channels": [1, 2]}"#,
        );
        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.file_name, "pmt_001.json");
        assert_eq!(loaded.md5.len(), 32);
        assert_eq!(loaded.document.get_str("uid").unwrap(), "pmt-001");
        assert_eq!(loaded.document.get_f64("gain").unwrap(), 5.0e6);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            dir.path(),
            "dup.json",
            r#"{"uid": "a", "nested": {"x": 1, "x": 2}}"#,
        );
        match load_document(&path) {
            Err(LoadError::Malformed(e)) => assert!(e.to_string().contains("duplicate key")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            dir.path(),
            "nan.json",
            "{\"name\": \"NaN is fine here\",\n \"values\": [1.0, NaN, -Infinity]}",
        );
        match load_document(&path) {
            Err(LoadError::NonFinite(msg)) => {
                assert_eq!(msg, "NaN at line 2, -Infinity at line 2");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_top_level_must_be_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(dir.path(), "list.json", "[1, 2, 3]");
        assert!(matches!(load_document(&path), Err(LoadError::NotAnObject)));
        assert!(matches!(
            load_document(&dir.path().join("missing.json")),
            Err(LoadError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_search_path_overrides_bundled() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(
            dir.path(),
            "goalpost_format.json",
            r#"{"required_fields": {}, "testtypes": ["min"]}"#,
        );
        let tools = FileTools::new(vec![dir.path().to_path_buf()]);
        let value = tools.load_json("goalpost_format").unwrap();
        assert_eq!(value["testtypes"].as_array().unwrap().len(), 1);

        let bundled = FileTools::default().load_json("goalpost_format").unwrap();
        assert_eq!(bundled["testtypes"].as_array().unwrap().len(), 4);

        assert!(matches!(
            tools.load_text("mongo_config"),
            Err(FileToolsError::NotFound(_))
        ));
    }
}
