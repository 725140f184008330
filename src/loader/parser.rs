use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let data = fs::read_to_string(file_path).map_err(Error::IoError)?;

    let parsed_data: T = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    Ok(parsed_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config_dto::BalancerConfigDto;

    #[test]
    fn missing_file_is_an_io_error() {
        let result = parse_json_file::<BalancerConfigDto>("does/not/exist.json");

        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn partial_config_parses() {
        let path = std::env::temp_dir().join(format!("balancer-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "imbalanceThreshold": 0.25, "cooldownMs": 1000 }"#).unwrap();

        let dto: BalancerConfigDto = parse_json_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(dto.imbalance_threshold, Some(0.25));
        assert_eq!(dto.cooldown_ms, Some(1000));
        assert!(dto.load_window_ms.is_none());
    }
}
