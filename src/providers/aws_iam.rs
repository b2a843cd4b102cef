//! IAM and STS access through the AWS SDK.
//!
//! The SDK is async; the provider owns a current-thread runtime and blocks on
//! each call so the lifecycle stays synchronous.

use crate::error::ProviderError;
use crate::models::access_key::AccessKeyPair;
use crate::providers::IdentityProvider;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_iam::config::Region;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::Tag;
use std::collections::BTreeMap;
use std::future::Future;
use tokio::runtime::Runtime;
use tracing::debug;

const CODE_ALREADY_EXISTS: &str = "EntityAlreadyExists";
const CODE_NO_SUCH_ENTITY: &str = "NoSuchEntity";

pub struct AwsIamProvider {
    runtime: Runtime,
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsIamProvider {
    /// Build clients from the default credential chain, optionally pinned to
    /// a named profile.
    pub fn connect(profile: Option<&str>, region: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("start async runtime for AWS SDK")?;
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = runtime.block_on(loader.load());
        Ok(Self {
            iam: aws_sdk_iam::Client::new(&sdk_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
            runtime,
        })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Account id of the calling principal, via STS GetCallerIdentity.
    pub fn caller_account_id(&self) -> Result<String, ProviderError> {
        let out = self
            .block_on(self.sts.get_caller_identity().send())
            .map_err(|e| ProviderError::fatal("GetCallerIdentity", DisplayErrorContext(&e)))?;
        out.account()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::fatal("GetCallerIdentity", "response has no Account"))
    }
}

/// Map an SDK failure onto the closed error set by its IAM error code.
fn classify<E, R>(operation: &str, resource: String, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    match code.as_deref() {
        Some(CODE_ALREADY_EXISTS) => ProviderError::AlreadyExists { resource },
        Some(CODE_NO_SUCH_ENTITY) => ProviderError::NotFound { resource },
        _ => ProviderError::fatal(operation, DisplayErrorContext(&err)),
    }
}

impl IdentityProvider for AwsIamProvider {
    fn create_user(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let tags = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProviderError::fatal("CreateUser", e))?;
        debug!(user = name, tags = tags.len(), "CreateUser");
        self.block_on(
            self.iam
                .create_user()
                .user_name(name)
                .set_tags((!tags.is_empty()).then_some(tags))
                .send(),
        )
        .map_err(|e| classify("CreateUser", format!("IAM user {}", name), e))?;
        Ok(())
    }

    fn put_user_policy(
        &self,
        user: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        debug!(user, policy = policy_name, "PutUserPolicy");
        self.block_on(
            self.iam
                .put_user_policy()
                .user_name(user)
                .policy_name(policy_name)
                .policy_document(document)
                .send(),
        )
        .map_err(|e| classify("PutUserPolicy", format!("IAM user {}", user), e))?;
        Ok(())
    }

    fn list_access_keys(&self, user: &str) -> Result<Vec<String>, ProviderError> {
        debug!(user, "ListAccessKeys");
        let out = self
            .block_on(self.iam.list_access_keys().user_name(user).send())
            .map_err(|e| classify("ListAccessKeys", format!("IAM user {}", user), e))?;
        Ok(out
            .access_key_metadata()
            .iter()
            .filter_map(|m| m.access_key_id().map(str::to_string))
            .collect())
    }

    fn create_access_key(&self, user: &str) -> Result<AccessKeyPair, ProviderError> {
        debug!(user, "CreateAccessKey");
        let out = self
            .block_on(self.iam.create_access_key().user_name(user).send())
            .map_err(|e| classify("CreateAccessKey", format!("IAM user {}", user), e))?;
        let key = out
            .access_key()
            .ok_or_else(|| ProviderError::fatal("CreateAccessKey", "response has no AccessKey"))?;
        Ok(AccessKeyPair::new(key.access_key_id(), key.secret_access_key()))
    }

    fn delete_access_key(&self, user: &str, access_key_id: &str) -> Result<(), ProviderError> {
        debug!(user, access_key_id, "DeleteAccessKey");
        self.block_on(
            self.iam
                .delete_access_key()
                .user_name(user)
                .access_key_id(access_key_id)
                .send(),
        )
        .map_err(|e| classify("DeleteAccessKey", format!("access key {}", access_key_id), e))?;
        Ok(())
    }

    fn delete_user_policy(&self, user: &str, policy_name: &str) -> Result<(), ProviderError> {
        debug!(user, policy = policy_name, "DeleteUserPolicy");
        self.block_on(
            self.iam
                .delete_user_policy()
                .user_name(user)
                .policy_name(policy_name)
                .send(),
        )
        .map_err(|e| classify("DeleteUserPolicy", format!("policy {}", policy_name), e))?;
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<(), ProviderError> {
        debug!(user = name, "DeleteUser");
        self.block_on(self.iam.delete_user().user_name(name).send())
            .map_err(|e| classify("DeleteUser", format!("IAM user {}", name), e))?;
        Ok(())
    }
}
