use audit_rules::models::{Activation, Rule, RuleSetVersion};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRuleSetRequest {
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub activate: bool,
}

/// Shape of the file named by `RULE_CATALOG_PATH`: either a bare rule list
/// or a rule list with a description.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleCatalogFile {
    Rules(Vec<Rule>),
    Described {
        rules: Vec<Rule>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl RuleCatalogFile {
    pub fn into_parts(self) -> (Vec<Rule>, Option<String>) {
        match self {
            Self::Rules(rules) => (rules, None),
            Self::Described { rules, description } => (rules, description),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetResponse {
    pub found: bool,
    pub created: bool,
    pub active: bool,
    pub rule_set: Option<RuleSetVersion>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationResponse {
    pub activated: bool,
    pub activation: Option<Activation>,
    pub error_code: Option<String>,
    pub reason: String,
}
