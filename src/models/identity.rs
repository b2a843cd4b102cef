use std::collections::BTreeMap;

/// The IAM user managed by one lifecycle run, with its rendered inline policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    /// JSON policy document, already rendered for the target account.
    pub policy_document: String,
}

impl ManagedIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            policy_document: String::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_policy_document(mut self, document: impl Into<String>) -> Self {
        self.policy_document = document.into();
        self
    }

    /// Name of the inline policy bound to this identity.
    pub fn policy_name(&self) -> String {
        policy_name_for(&self.name)
    }
}

pub fn policy_name_for(identity: &str) -> String {
    format!("iam-user-{}-inline-policy", identity)
}
