use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PayloadError;

/// One row as delivered by the server (and, after transformation, as rendered).
pub type Record = Map<String, Value>;

/// `{object_list: [...], page: N, total: M}` as served by the list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub object_list: Vec<Record>,
    pub page: u32,
    pub total: u32,
}

impl PageData {
    pub fn from_json(body: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(body)?;
        if value.get("object_list").is_none() {
            return Err(PayloadError::MissingObjectList);
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_payload() {
        let data = PageData::from_json(
            r#"{"object_list":[{"source":{"host":"10.0.0.1","port":5064}}],"page":2,"total":9}"#,
        )
        .expect("payload");
        assert_eq!(data.page, 2);
        assert_eq!(data.total, 9);
        assert_eq!(data.object_list.len(), 1);
    }

    #[test]
    fn missing_object_list_is_reported() {
        let err = PageData::from_json(r#"{"page":1,"total":1}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingObjectList));
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = PageData::from_json("<html>").unwrap_err();
        assert!(matches!(err, PayloadError::Json(_)));
    }
}
