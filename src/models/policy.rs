//! IAM inline policy documents.

use crate::constants;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub action: OneOrMany,
    #[serde(rename = "Resource")]
    pub resource: OneOrMany,
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// IAM accepts either a single string or a list for `Action` and `Resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        match self {
            OneOrMany::One(s) => std::slice::from_ref(s).iter(),
            OneOrMany::Many(v) => v.iter(),
        }
    }

    fn map(&self, f: impl Fn(&str) -> String) -> OneOrMany {
        match self {
            OneOrMany::One(s) => OneOrMany::One(f(s.as_str())),
            OneOrMany::Many(v) => OneOrMany::Many(v.iter().map(|s| f(s.as_str())).collect()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            OneOrMany::One(s) => s.is_empty(),
            OneOrMany::Many(v) => v.is_empty(),
        }
    }
}

/// Values substituted into `${...}` placeholders of resource ARNs.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub aws_region: String,
    pub aws_account_id: Option<String>,
}

fn default_version() -> String {
    constants::POLICY_VERSION.to_string()
}

impl PolicyDocument {
    /// Whether rendering needs the account id (looked up via STS).
    pub fn needs_account_id(&self) -> bool {
        self.statements
            .iter()
            .flat_map(|s| s.resource.iter())
            .any(|r| r.contains(constants::PLACEHOLDER_ACCOUNT_ID))
    }

    pub fn validate(&self) -> Result<()> {
        if self.statements.is_empty() {
            bail!("policy has no statements");
        }
        for (i, stmt) in self.statements.iter().enumerate() {
            if stmt.action.is_empty() {
                bail!("policy statement {} has no Action", i + 1);
            }
            if stmt.resource.is_empty() {
                bail!("policy statement {} has no Resource", i + 1);
            }
        }
        Ok(())
    }

    /// Substitute placeholders and serialize to the compact JSON sent to IAM.
    pub fn render(&self, ctx: &PolicyContext) -> Result<String> {
        if self.needs_account_id() && ctx.aws_account_id.is_none() {
            bail!(
                "policy references {} but no account id is known",
                constants::PLACEHOLDER_ACCOUNT_ID
            );
        }
        let account_id = ctx.aws_account_id.as_deref().unwrap_or_default();
        let mut rendered = self.clone();
        for stmt in &mut rendered.statements {
            stmt.resource = stmt.resource.map(|r| {
                r.replace(constants::PLACEHOLDER_REGION, &ctx.aws_region)
                    .replace(constants::PLACEHOLDER_ACCOUNT_ID, account_id)
            });
        }
        serde_json::to_string(&rendered).context("serialize policy document")
    }
}
