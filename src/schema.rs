//! Request and response contract of the decide call

use serde::{Deserialize, Serialize};

use crate::error::{MindError, Result};
use crate::sae::FeatureReading;

fn default_hrm_enabled() -> bool {
    true
}

fn default_max_new_tokens() -> usize {
    64
}

/// One decide request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecideRequest {
    pub agent_id: String,
    pub prompt: String,
    #[serde(default = "default_hrm_enabled")]
    pub hrm_enabled: bool,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
}

impl DecideRequest {
    /// Request with default refinement and generation length
    pub fn new(agent_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            hrm_enabled: default_hrm_enabled(),
            max_new_tokens: default_max_new_tokens(),
        }
    }

    /// Boundary checks applied before a request enters the pipeline
    pub fn validate(&self, max_new_tokens_limit: usize) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(MindError::InvalidRequest("agent_id is empty".to_string()));
        }
        if self.prompt.is_empty() {
            return Err(MindError::InvalidRequest("prompt is empty".to_string()));
        }
        if self.max_new_tokens == 0 || self.max_new_tokens > max_new_tokens_limit {
            return Err(MindError::InvalidRequest(format!(
                "max_new_tokens must be in 1..={max_new_tokens_limit}, got {}",
                self.max_new_tokens
            )));
        }
        Ok(())
    }
}

/// One feature in a response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub feature_id: usize,
    pub value: f32,
}

impl From<FeatureReading> for FeatureValue {
    fn from(r: FeatureReading) -> Self {
        Self {
            feature_id: r.feature_id,
            value: r.value,
        }
    }
}

/// Result of one decide request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecideResponse {
    pub text: String,
    pub features: Vec<FeatureValue>,
    #[serde(default)]
    pub hrm_vector: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: DecideRequest =
            serde_json::from_str(r#"{"agent_id": "a-1", "prompt": "Should I buy?"}"#).unwrap();
        assert!(req.hrm_enabled);
        assert_eq!(req.max_new_tokens, 64);
        assert_eq!(req, DecideRequest::new("a-1", "Should I buy?"));
    }

    #[test]
    fn test_request_requires_prompt() {
        let parsed: std::result::Result<DecideRequest, _> =
            serde_json::from_str(r#"{"agent_id": "a-1"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate() {
        let req = DecideRequest::new("a-1", "hi");
        assert!(req.validate(512).is_ok());

        let mut long = req.clone();
        long.max_new_tokens = 513;
        assert!(matches!(long.validate(512), Err(MindError::InvalidRequest(_))));

        let mut zero = req.clone();
        zero.max_new_tokens = 0;
        assert!(zero.validate(512).is_err());

        assert!(DecideRequest::new("", "hi").validate(512).is_err());
        assert!(DecideRequest::new("a-1", "").validate(512).is_err());
    }

    #[test]
    fn test_response_without_refinement_serializes_null() {
        let resp = DecideResponse {
            text: "hold".to_string(),
            features: vec![FeatureValue {
                feature_id: 3,
                value: 1.5,
            }],
            hrm_vector: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["hrm_vector"].is_null());
        assert_eq!(json["features"][0]["feature_id"], 3);
    }
}
