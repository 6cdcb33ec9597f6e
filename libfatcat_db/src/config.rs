use mongodb::options::{ClientOptions, Credential, ServerAddress};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Logical name of the database connection file
pub const MONGO_CONFIG_NAME: &str = "mongo_config";
/// Logical name of the ssh forwarder file
pub const SSH_CONFIG_NAME: &str = "ssh_config";

/// Database connection parameters, read from `mongo_config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub test_database: String,
    pub production_database: String,
    #[serde(default)]
    pub auth_source: Option<String>,
}

impl Default for MongoConfig {
    /// Generate a new MongoConfig pointing at a local test database
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 27017,
            user: String::from(""),
            password: String::from(""),
            test_database: String::from("production_calibration_test"),
            production_database: String::from("production_calibration"),
            auth_source: None,
        }
    }
}

impl MongoConfig {
    /// Read the connection parameters from a JSON file
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        read_json_file(config_path)
    }

    /// Name of the database targeted by this session
    pub fn database(&self, production: bool) -> &str {
        if production {
            &self.production_database
        } else {
            &self.test_database
        }
    }

    /// Driver options for the chosen database. Credentials are passed as-is, never through a
    /// URI, so passwords may contain any character.
    pub fn client_options(&self, production: bool) -> ClientOptions {
        let credential = if self.user.is_empty() {
            None
        } else {
            let auth_source = self
                .auth_source
                .as_deref()
                .unwrap_or_else(|| self.database(production));
            Some(
                Credential::builder()
                    .username(self.user.clone())
                    .password(self.password.clone())
                    .source(auth_source.to_string())
                    .build(),
            )
        };
        ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: self.host.clone(),
                port: Some(self.port),
            }])
            .credential(credential)
            .default_database(self.database(production).to_string())
            .build()
    }

    /// Point the connection at a local forwarded port
    pub fn through_tunnel(&self, local_port: u16) -> Self {
        Self {
            host: String::from("localhost"),
            port: local_port,
            ..self.clone()
        }
    }
}

/// Parameters of the ssh port forwarder, read from `ssh_config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    pub local_port: u16,
}

impl SshConfig {
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        read_json_file(config_path)
    }

    /// `user@server` destination understood by ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.server)
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(config_path: &Path) -> Result<T, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
    }

    let json_str = std::fs::read_to_string(config_path)?;

    Ok(serde_json::from_str::<T>(&json_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_options_with_credentials() {
        let config = MongoConfig {
            user: String::from("writer"),
            password: String::from("p@ss/w:rd"),
            ..Default::default()
        };
        let options = config.client_options(true);
        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: String::from("localhost"),
                port: Some(27017)
            }]
        );
        assert_eq!(
            options.default_database.as_deref(),
            Some("production_calibration")
        );
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("writer"));
        assert_eq!(credential.password.as_deref(), Some("p@ss/w:rd"));
        assert_eq!(credential.source.as_deref(), Some("production_calibration"));

        let source = config.client_options(false).credential.unwrap().source;
        assert_eq!(source.as_deref(), Some("production_calibration_test"));
    }

    #[test]
    fn test_client_options_without_credentials() {
        let options = MongoConfig::default().client_options(false);
        assert!(options.credential.is_none());
        assert_eq!(
            options.default_database.as_deref(),
            Some("production_calibration_test")
        );
    }

    #[test]
    fn test_explicit_auth_source() {
        let config = MongoConfig {
            user: String::from("writer"),
            password: String::from("secret"),
            auth_source: Some(String::from("admin")),
            ..Default::default()
        };
        let credential = config.client_options(true).credential.unwrap();
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[test]
    fn test_through_tunnel() {
        let config = MongoConfig {
            host: String::from("db.example.org"),
            ..Default::default()
        };
        let tunneled = config.through_tunnel(37017);
        assert_eq!(tunneled.host, "localhost");
        assert_eq!(tunneled.port, 37017);
        assert_eq!(tunneled.test_database, config.test_database);
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mongo_config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"host": "db", "port": 27018, "user": "u", "password": "p",
                "test_database": "t", "production_database": "prod"}}"#
        )
        .unwrap();
        let config = MongoConfig::read_config_file(&path).unwrap();
        assert_eq!(config.port, 27018);
        assert_eq!(config.database(true), "prod");
        assert!(config.auth_source.is_none());
    }

    #[test]
    fn test_missing_config_file() {
        let result = SshConfig::read_config_file(Path::new("/nonexistent/ssh_config.json"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }
}
