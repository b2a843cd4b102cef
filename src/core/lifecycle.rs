//! Setup and teardown protocol for one IAM user and its mirrored secrets.
//!
//! Setup runs steps 1.1 to 1.4 in order and teardown runs 2.1 to 2.4, the
//! mirror image. IAM refuses to delete a user that still owns an inline
//! policy or access keys, so the order is fixed here rather than left to the
//! provider. Every step is idempotent on its own: "already exists" and
//! "does not exist" are success, any other provider error aborts the phase.
//! Nothing is cached between calls; each step asks the provider for the
//! live state.

use crate::core::key_record::KeyRecordStore;
use crate::core::secret_sync::{self, SecretDeletion};
use crate::error::{LifecycleError, PhaseAbort, ProviderError};
use crate::models::access_key::AccessKeyPair;
use crate::models::identity::{policy_name_for, ManagedIdentity};
use crate::models::secrets::{RepoRef, SecretNames};
use crate::providers::{IdentityProvider, SecretStore};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateIdentity,
    PutInlinePolicy,
    EnsureAccessKey,
    PublishSecrets,
    DeleteSecrets,
    DeleteAccessKey,
    DeleteInlinePolicy,
    DeleteIdentity,
}

impl Step {
    pub const SETUP: [Step; 4] = [
        Step::CreateIdentity,
        Step::PutInlinePolicy,
        Step::EnsureAccessKey,
        Step::PublishSecrets,
    ];

    pub const TEARDOWN: [Step; 4] = [
        Step::DeleteSecrets,
        Step::DeleteAccessKey,
        Step::DeleteInlinePolicy,
        Step::DeleteIdentity,
    ];

    pub fn number(self) -> &'static str {
        match self {
            Step::CreateIdentity => "1.1",
            Step::PutInlinePolicy => "1.2",
            Step::EnsureAccessKey => "1.3",
            Step::PublishSecrets => "1.4",
            Step::DeleteSecrets => "2.1",
            Step::DeleteAccessKey => "2.2",
            Step::DeleteInlinePolicy => "2.3",
            Step::DeleteIdentity => "2.4",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::CreateIdentity => "create IAM user",
            Step::PutInlinePolicy => "put inline policy",
            Step::EnsureAccessKey => "create or get access key",
            Step::PublishSecrets => "publish repository secrets",
            Step::DeleteSecrets => "delete repository secrets",
            Step::DeleteAccessKey => "delete access key",
            Step::DeleteInlinePolicy => "delete inline policy",
            Step::DeleteIdentity => "delete IAM user",
        }
    }

    pub fn phase(self) -> Phase {
        if Step::SETUP.contains(&self) {
            Phase::Setup
        } else {
            Phase::Teardown
        }
    }

    /// State guaranteed once this step has completed.
    pub fn resulting_state(self) -> LifecycleState {
        match self {
            Step::CreateIdentity => LifecycleState::Created,
            Step::PutInlinePolicy => LifecycleState::PolicyAttached,
            Step::EnsureAccessKey => LifecycleState::KeyIssued,
            Step::PublishSecrets => LifecycleState::SecretsPublished,
            Step::DeleteSecrets => LifecycleState::KeyIssued,
            Step::DeleteAccessKey => LifecycleState::PolicyAttached,
            Step::DeleteInlinePolicy => LifecycleState::Created,
            Step::DeleteIdentity => LifecycleState::Absent,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.number())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::SETUP
            .iter()
            .chain(Step::TEARDOWN.iter())
            .copied()
            .find(|step| step.number() == s)
            .ok_or_else(|| format!("unknown step '{}', expected 1.1-1.4 or 2.1-2.4", s))
    }
}

/// Per-identity state. Setup walks it forward, teardown walks it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Absent,
    Created,
    PolicyAttached,
    KeyIssued,
    SecretsPublished,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Created => "created",
            LifecycleState::PolicyAttached => "policy-attached",
            LifecycleState::KeyIssued => "key-issued",
            LifecycleState::SecretsPublished => "secrets-published",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step changed provider state.
    Applied,
    /// The desired state already held.
    AlreadySatisfied,
    /// Best-effort step finished with some items failing.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
    pub detail: String,
}

impl StepReport {
    fn new(step: Step, outcome: StepOutcome, detail: impl Into<String>) -> Self {
        Self {
            step,
            outcome,
            detail: detail.into(),
        }
    }
}

/// Access key returned by step 1.3.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub pair: AccessKeyPair,
    /// True when this call created the key.
    pub minted: bool,
}

impl IssuedKey {
    pub fn report(&self) -> StepReport {
        if self.minted {
            StepReport::new(
                Step::EnsureAccessKey,
                StepOutcome::Applied,
                format!("created new access key {}", self.pair.access_key_id),
            )
        } else {
            StepReport::new(
                Step::EnsureAccessKey,
                StepOutcome::AlreadySatisfied,
                format!("found existing access key {}", self.pair.access_key_id),
            )
        }
    }
}

#[derive(Debug)]
pub struct SetupReport {
    pub steps: Vec<StepReport>,
    pub access_key_id: String,
}

#[derive(Debug)]
pub struct TeardownReport {
    pub steps: Vec<StepReport>,
    pub secret_deletions: Vec<SecretDeletion>,
}

/// Drives the eight steps against injected collaborators.
pub struct CredentialLifecycleManager<I, S> {
    identity: I,
    secrets: S,
}

impl<I: IdentityProvider, S: SecretStore> CredentialLifecycleManager<I, S> {
    pub fn new(identity: I, secrets: S) -> Self {
        Self { identity, secrets }
    }

    pub fn identity_provider(&self) -> &I {
        &self.identity
    }

    pub fn secret_store(&self) -> &S {
        &self.secrets
    }

    /// Step 1.1.
    pub fn create_identity(
        &self,
        identity: &ManagedIdentity,
    ) -> Result<StepReport, LifecycleError> {
        let step = Step::CreateIdentity;
        match self.identity.create_user(&identity.name, &identity.tags) {
            Ok(()) => {
                info!(identity = %identity.name, "created IAM user");
                Ok(StepReport::new(
                    step,
                    StepOutcome::Applied,
                    format!("created IAM user {}", identity.name),
                ))
            }
            Err(ProviderError::AlreadyExists { .. }) => {
                info!(identity = %identity.name, "IAM user already exists");
                Ok(StepReport::new(
                    step,
                    StepOutcome::AlreadySatisfied,
                    "IAM user already exists",
                ))
            }
            Err(e) => Err(LifecycleError::provider(step, e)),
        }
    }

    /// Step 1.2. Overwrites unconditionally.
    pub fn put_inline_policy(
        &self,
        identity: &ManagedIdentity,
    ) -> Result<StepReport, LifecycleError> {
        let step = Step::PutInlinePolicy;
        let policy_name = identity.policy_name();
        self.identity
            .put_user_policy(&identity.name, &policy_name, &identity.policy_document)
            .map_err(|e| LifecycleError::provider(step, e))?;
        info!(identity = %identity.name, policy = %policy_name, "put inline policy");
        Ok(StepReport::new(
            step,
            StepOutcome::Applied,
            format!("put inline policy {}", policy_name),
        ))
    }

    /// Step 1.3. Mints a key only when the identity has none; otherwise the
    /// pair comes from `record`, which must match a live key.
    pub fn ensure_access_key<R: KeyRecordStore + ?Sized>(
        &self,
        identity: &str,
        record: &R,
    ) -> Result<IssuedKey, LifecycleError> {
        let step = Step::EnsureAccessKey;
        let live = self
            .identity
            .list_access_keys(identity)
            .map_err(|e| LifecycleError::provider(step, e))?;

        if live.is_empty() {
            let pair = self
                .identity
                .create_access_key(identity)
                .map_err(|e| LifecycleError::provider(step, e))?;
            if let Err(e) = record.save(&pair) {
                warn!(
                    identity,
                    access_key_id = %pair.access_key_id,
                    record = %record.location().display(),
                    "access key created but the local record could not be written"
                );
                return Err(e.into());
            }
            info!(identity, access_key_id = %pair.access_key_id, "created new access key");
            return Ok(IssuedKey { pair, minted: true });
        }

        let pair = record.load()?.ok_or_else(|| LifecycleError::MissingLocalRecord {
            identity: identity.to_string(),
            path: record.location().to_path_buf(),
        })?;
        if !live.iter().any(|id| *id == pair.access_key_id) {
            return Err(LifecycleError::StaleLocalRecord {
                identity: identity.to_string(),
                path: record.location().to_path_buf(),
                recorded: pair.access_key_id.clone(),
            });
        }
        info!(identity, access_key_id = %pair.access_key_id, "using existing access key");
        Ok(IssuedKey { pair, minted: false })
    }

    /// Step 1.4. Writes region, key id, secret key in that order and stops at
    /// the first failure without undoing earlier writes.
    pub fn publish_secrets(
        &self,
        repo: &RepoRef,
        names: &SecretNames,
        region: &str,
        key: &AccessKeyPair,
    ) -> Result<StepReport, LifecycleError> {
        let entries = [
            (names.region.as_str(), region),
            (names.access_key_id.as_str(), key.access_key_id.as_str()),
            (names.secret_access_key.as_str(), key.secret()),
        ];
        let published = secret_sync::publish_ordered(&self.secrets, repo, &entries)?;
        Ok(StepReport::new(
            Step::PublishSecrets,
            StepOutcome::Applied,
            format!("published {} secrets to {}", published.len(), repo),
        ))
    }

    /// Step 1.4 run on its own. The key is resolved with step 1.3's rules
    /// first, so a record left behind by teardown, or one that no longer
    /// matches a live key, is never published. With no live key one is
    /// minted, as a full setup would.
    pub fn publish_current_key<R: KeyRecordStore + ?Sized>(
        &self,
        identity: &str,
        record: &R,
        repo: &RepoRef,
        names: &SecretNames,
        region: &str,
    ) -> Result<(IssuedKey, StepReport), LifecycleError> {
        let issued = self.ensure_access_key(identity, record)?;
        let report = self.publish_secrets(repo, names, region, &issued.pair)?;
        Ok((issued, report))
    }

    /// Step 2.1. Best-effort: failures are logged and the sweep continues.
    pub fn delete_secrets(
        &self,
        repo: &RepoRef,
        names: &SecretNames,
    ) -> (StepReport, Vec<SecretDeletion>) {
        let deletions = secret_sync::delete_best_effort(&self.secrets, repo, &names.ordered());
        let failed: Vec<&str> = deletions
            .iter()
            .filter(|d| !d.is_ok())
            .map(|d| d.name.as_str())
            .collect();
        let report = if !failed.is_empty() {
            StepReport::new(
                Step::DeleteSecrets,
                StepOutcome::Degraded,
                format!("failed to delete: {}", failed.join(", ")),
            )
        } else if deletions.iter().all(|d| d.already_absent) {
            StepReport::new(
                Step::DeleteSecrets,
                StepOutcome::AlreadySatisfied,
                "secrets already absent",
            )
        } else {
            StepReport::new(
                Step::DeleteSecrets,
                StepOutcome::Applied,
                format!("deleted secrets from {}", repo),
            )
        };
        (report, deletions)
    }

    /// Step 2.2. Deletes the first key the provider lists.
    ///
    /// The record is consulted only to warn when that key is not the recorded
    /// one; it does not choose which key goes.
    pub fn delete_access_key<R: KeyRecordStore + ?Sized>(
        &self,
        identity: &str,
        record: &R,
    ) -> Result<StepReport, LifecycleError> {
        let step = Step::DeleteAccessKey;
        let live = match self.identity.list_access_keys(identity) {
            Ok(keys) => keys,
            Err(ProviderError::NotFound { .. }) => {
                info!(identity, "IAM user does not exist, no access key to delete");
                return Ok(StepReport::new(
                    step,
                    StepOutcome::AlreadySatisfied,
                    "IAM user does not exist",
                ));
            }
            Err(e) => return Err(LifecycleError::provider(step, e)),
        };
        let Some(target) = live.first() else {
            info!(identity, "no access key to delete");
            return Ok(StepReport::new(
                step,
                StepOutcome::AlreadySatisfied,
                "access key does not exist",
            ));
        };

        if let Ok(Some(recorded)) = record.load() {
            if recorded.access_key_id != *target {
                warn!(
                    identity,
                    deleting = %target,
                    recorded = %recorded.access_key_id,
                    "deleting a key other than the one in the local record"
                );
            }
        }

        match self.identity.delete_access_key(identity, target) {
            Ok(()) => {
                info!(identity, access_key_id = %target, "deleted access key");
                Ok(StepReport::new(
                    step,
                    StepOutcome::Applied,
                    format!("deleted access key {}", target),
                ))
            }
            Err(ProviderError::NotFound { .. }) => Ok(StepReport::new(
                step,
                StepOutcome::AlreadySatisfied,
                "access key does not exist",
            )),
            Err(e) => Err(LifecycleError::provider(step, e)),
        }
    }

    /// Step 2.3.
    pub fn delete_inline_policy(&self, identity: &str) -> Result<StepReport, LifecycleError> {
        let step = Step::DeleteInlinePolicy;
        let policy_name = policy_name_for(identity);
        match self.identity.delete_user_policy(identity, &policy_name) {
            Ok(()) => {
                info!(identity, policy = %policy_name, "deleted inline policy");
                Ok(StepReport::new(
                    step,
                    StepOutcome::Applied,
                    format!("deleted inline policy {}", policy_name),
                ))
            }
            Err(ProviderError::NotFound { .. }) => {
                info!(identity, policy = %policy_name, "inline policy does not exist");
                Ok(StepReport::new(
                    step,
                    StepOutcome::AlreadySatisfied,
                    "inline policy does not exist",
                ))
            }
            Err(e) => Err(LifecycleError::provider(step, e)),
        }
    }

    /// Step 2.4.
    pub fn delete_identity(&self, identity: &str) -> Result<StepReport, LifecycleError> {
        let step = Step::DeleteIdentity;
        match self.identity.delete_user(identity) {
            Ok(()) => {
                info!(identity, "deleted IAM user");
                Ok(StepReport::new(
                    step,
                    StepOutcome::Applied,
                    format!("deleted IAM user {}", identity),
                ))
            }
            Err(ProviderError::NotFound { .. }) => {
                info!(identity, "IAM user does not exist");
                Ok(StepReport::new(
                    step,
                    StepOutcome::AlreadySatisfied,
                    "IAM user does not exist",
                ))
            }
            Err(e) => Err(LifecycleError::provider(step, e)),
        }
    }

    /// Steps 1.1 to 1.4. `on_step` sees each report as soon as its step finishes.
    pub fn run_setup<R: KeyRecordStore + ?Sized>(
        &self,
        identity: &ManagedIdentity,
        record: &R,
        repo: &RepoRef,
        names: &SecretNames,
        region: &str,
        mut on_step: impl FnMut(&StepReport),
    ) -> Result<SetupReport, PhaseAbort> {
        let mut progress = Progress::new(Phase::Setup);

        let report = self
            .create_identity(identity)
            .map_err(|e| progress.abort(Step::CreateIdentity, e))?;
        progress.complete(report, &mut on_step);

        let report = self
            .put_inline_policy(identity)
            .map_err(|e| progress.abort(Step::PutInlinePolicy, e))?;
        progress.complete(report, &mut on_step);

        let issued = self
            .ensure_access_key(&identity.name, record)
            .map_err(|e| progress.abort(Step::EnsureAccessKey, e))?;
        progress.complete(issued.report(), &mut on_step);

        let report = self
            .publish_secrets(repo, names, region, &issued.pair)
            .map_err(|e| progress.abort(Step::PublishSecrets, e))?;
        progress.complete(report, &mut on_step);

        Ok(SetupReport {
            steps: progress.steps,
            access_key_id: issued.pair.access_key_id,
        })
    }

    /// Steps 2.1 to 2.4.
    pub fn run_teardown<R: KeyRecordStore + ?Sized>(
        &self,
        identity: &str,
        record: &R,
        repo: &RepoRef,
        names: &SecretNames,
        mut on_step: impl FnMut(&StepReport),
    ) -> Result<TeardownReport, PhaseAbort> {
        let mut progress = Progress::new(Phase::Teardown);

        let (report, secret_deletions) = self.delete_secrets(repo, names);
        progress.complete(report, &mut on_step);

        let report = self
            .delete_access_key(identity, record)
            .map_err(|e| progress.abort(Step::DeleteAccessKey, e))?;
        progress.complete(report, &mut on_step);

        let report = self
            .delete_inline_policy(identity)
            .map_err(|e| progress.abort(Step::DeleteInlinePolicy, e))?;
        progress.complete(report, &mut on_step);

        let report = self
            .delete_identity(identity)
            .map_err(|e| progress.abort(Step::DeleteIdentity, e))?;
        progress.complete(report, &mut on_step);

        Ok(TeardownReport {
            steps: progress.steps,
            secret_deletions,
        })
    }
}

struct Progress {
    phase: Phase,
    steps: Vec<StepReport>,
    reached: Option<LifecycleState>,
}

impl Progress {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            steps: Vec::with_capacity(4),
            reached: None,
        }
    }

    fn complete(&mut self, report: StepReport, on_step: &mut impl FnMut(&StepReport)) {
        self.reached = Some(report.step.resulting_state());
        on_step(&report);
        self.steps.push(report);
    }

    fn abort(&self, step: Step, source: LifecycleError) -> PhaseAbort {
        warn!(phase = %self.phase, step = %step, error = %source, "phase aborted");
        PhaseAbort {
            phase: self.phase,
            step,
            reached: self.reached,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key_record::JsonKeyRecord;
    use crate::providers::memory::{MemoryIam, MemorySecretStore};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Manager = CredentialLifecycleManager<MemoryIam, MemorySecretStore>;

    fn manager() -> Manager {
        CredentialLifecycleManager::new(MemoryIam::default(), MemorySecretStore::default())
    }

    fn identity() -> ManagedIdentity {
        ManagedIdentity::new("gh-ci-test")
            .with_tags(BTreeMap::new())
            .with_policy_document(r#"{"Version":"2012-10-17","Statement":[]}"#)
    }

    fn repo() -> RepoRef {
        RepoRef::new("octo", "widgets")
    }

    fn record(dir: &TempDir) -> JsonKeyRecord {
        JsonKeyRecord::new(dir.path().join("access_key.json"))
    }

    #[test]
    fn test_step_numbers_roundtrip() {
        for step in Step::SETUP.iter().chain(Step::TEARDOWN.iter()) {
            assert_eq!(step.number().parse::<Step>().unwrap(), *step);
        }
        assert!("3.1".parse::<Step>().is_err());
        assert_eq!(Step::DeleteSecrets.phase(), Phase::Teardown);
    }

    #[test]
    fn test_create_identity_twice() {
        let m = manager();
        let first = m.create_identity(&identity()).unwrap();
        let second = m.create_identity(&identity()).unwrap();
        assert_eq!(first.outcome, StepOutcome::Applied);
        assert_eq!(second.outcome, StepOutcome::AlreadySatisfied);
        assert_eq!(m.identity_provider().user_count(), 1);
    }

    #[test]
    fn test_create_identity_other_error_is_fatal() {
        let m = manager();
        m.identity_provider().fail("create_user", "AccessDenied");
        let err = m.create_identity(&identity()).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Provider {
                step: Step::CreateIdentity,
                ..
            }
        ));
    }

    #[test]
    fn test_delete_identity_absent_is_ok() {
        let m = manager();
        let report = m.delete_identity("never-created").unwrap();
        assert_eq!(report.outcome, StepOutcome::AlreadySatisfied);
    }

    #[test]
    fn test_put_policy_overwrites() {
        let m = manager();
        m.create_identity(&identity()).unwrap();
        m.put_inline_policy(&identity()).unwrap();
        let updated = identity().with_policy_document("{\"v\":2}");
        m.put_inline_policy(&updated).unwrap();
        let user = m.identity_provider().user("gh-ci-test").unwrap();
        assert_eq!(user.policies.len(), 1);
        assert_eq!(user.policies["iam-user-gh-ci-test-inline-policy"], "{\"v\":2}");
    }

    #[test]
    fn test_ensure_access_key_mints_once() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        let first = m.ensure_access_key("gh-ci-test", &record(&dir)).unwrap();
        let second = m.ensure_access_key("gh-ci-test", &record(&dir)).unwrap();
        assert!(first.minted);
        assert!(!second.minted);
        assert_eq!(first.pair, second.pair);
        assert_eq!(m.identity_provider().calls("create_access_key"), 1);
        assert_eq!(m.identity_provider().user("gh-ci-test").unwrap().keys.len(), 1);
    }

    #[test]
    fn test_ensure_access_key_persists_record() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        let issued = m.ensure_access_key("gh-ci-test", &record(&dir)).unwrap();
        let stored = record(&dir).load().unwrap().unwrap();
        assert_eq!(stored, issued.pair);
    }

    #[test]
    fn test_ensure_access_key_missing_record() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        m.identity_provider()
            .insert_key("gh-ci-test", AccessKeyPair::new("AKIAELSEWHERE", "x"));
        let err = m.ensure_access_key("gh-ci-test", &record(&dir)).unwrap_err();
        assert!(matches!(err, LifecycleError::MissingLocalRecord { .. }));
        assert_eq!(m.identity_provider().calls("create_access_key"), 0);
    }

    #[test]
    fn test_ensure_access_key_stale_record() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        record(&dir).save(&AccessKeyPair::new("AKIAOLD", "old")).unwrap();
        m.identity_provider()
            .insert_key("gh-ci-test", AccessKeyPair::new("AKIANEW", "new"));
        let err = m.ensure_access_key("gh-ci-test", &record(&dir)).unwrap_err();
        match err {
            LifecycleError::StaleLocalRecord { recorded, .. } => assert_eq!(recorded, "AKIAOLD"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ensure_access_key_unknown_user_is_fatal() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let err = m.ensure_access_key("nobody", &record(&dir)).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Provider {
                step: Step::EnsureAccessKey,
                source: ProviderError::NotFound { .. }
            }
        ));
    }

    #[test]
    fn test_publish_order_and_values() {
        let m = manager();
        let key = AccessKeyPair::new("AKIAONE", "secret-one");
        m.publish_secrets(&repo(), &SecretNames::default(), "us-east-1", &key)
            .unwrap();
        let store = m.secret_store();
        assert_eq!(
            store.write_log(),
            vec!["AWS_DEFAULT_REGION", "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
        );
        assert_eq!(store.value(&repo(), "AWS_DEFAULT_REGION").as_deref(), Some("us-east-1"));
        assert_eq!(store.value(&repo(), "AWS_SECRET_ACCESS_KEY").as_deref(), Some("secret-one"));
    }

    #[test]
    fn test_publish_failure_on_second_write() {
        let m = manager();
        m.secret_store().fail_create("AWS_ACCESS_KEY_ID");
        let key = AccessKeyPair::new("AKIAONE", "secret-one");
        let err = m
            .publish_secrets(&repo(), &SecretNames::default(), "us-east-1", &key)
            .unwrap_err();
        match err {
            LifecycleError::PublishIncomplete { failed, published, .. } => {
                assert_eq!(failed, "AWS_ACCESS_KEY_ID");
                assert_eq!(published, vec!["AWS_DEFAULT_REGION"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let store = m.secret_store();
        assert!(store.contains(&repo(), "AWS_DEFAULT_REGION"));
        assert!(!store.contains(&repo(), "AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn test_publish_alone_after_teardown_refuses_stale_key() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        m.run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        m.run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap();
        assert!(record(&dir).exists().unwrap());

        let err = m
            .publish_current_key("gh-ci-test", &record(&dir), &repo(), &names, "us-east-1")
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Provider {
                step: Step::EnsureAccessKey,
                source: ProviderError::NotFound { .. }
            }
        ));
        assert_eq!(m.secret_store().len(), 0);
        assert_eq!(m.secret_store().create_calls(), 3);
    }

    #[test]
    fn test_publish_alone_rejects_record_for_deleted_key() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        record(&dir).save(&AccessKeyPair::new("AKIAGONE", "gone")).unwrap();
        m.identity_provider()
            .insert_key("gh-ci-test", AccessKeyPair::new("AKIALIVE", "live"));

        let err = m
            .publish_current_key(
                "gh-ci-test",
                &record(&dir),
                &repo(),
                &SecretNames::default(),
                "us-east-1",
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::StaleLocalRecord { .. }));
        assert!(m.secret_store().write_log().is_empty());
    }

    #[test]
    fn test_publish_alone_mints_when_no_live_key() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        record(&dir).save(&AccessKeyPair::new("AKIAGONE", "gone")).unwrap();

        let (issued, report) = m
            .publish_current_key(
                "gh-ci-test",
                &record(&dir),
                &repo(),
                &SecretNames::default(),
                "us-east-1",
            )
            .unwrap();
        assert!(issued.minted);
        assert_eq!(report.step, Step::PublishSecrets);
        assert_eq!(
            m.secret_store().value(&repo(), "AWS_ACCESS_KEY_ID"),
            Some(issued.pair.access_key_id.clone())
        );
        assert_eq!(record(&dir).load().unwrap().unwrap(), issued.pair);
    }

    #[test]
    fn test_delete_access_key_without_user() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let report = m.delete_access_key("gh-ci-test", &record(&dir)).unwrap();
        assert_eq!(report.outcome, StepOutcome::AlreadySatisfied);
        assert_eq!(m.identity_provider().calls("delete_access_key"), 0);
    }

    #[test]
    fn test_delete_access_key_takes_first_listed() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.create_identity(&identity()).unwrap();
        let iam = m.identity_provider();
        iam.insert_key("gh-ci-test", AccessKeyPair::new("AKIAFIRST", "a"));
        iam.insert_key("gh-ci-test", AccessKeyPair::new("AKIASECOND", "b"));
        record(&dir).save(&AccessKeyPair::new("AKIASECOND", "b")).unwrap();

        m.delete_access_key("gh-ci-test", &record(&dir)).unwrap();
        let keys: Vec<String> = iam
            .user("gh-ci-test")
            .unwrap()
            .keys
            .into_iter()
            .map(|k| k.access_key_id)
            .collect();
        assert_eq!(keys, vec!["AKIASECOND"]);
    }

    #[test]
    fn test_delete_policy_absent_is_ok() {
        let m = manager();
        m.create_identity(&identity()).unwrap();
        let report = m.delete_inline_policy("gh-ci-test").unwrap();
        assert_eq!(report.outcome, StepOutcome::AlreadySatisfied);
    }

    #[test]
    fn test_setup_then_teardown_end_to_end() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        let mut seen = Vec::new();

        let setup = m
            .run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |r| {
                seen.push(r.step)
            })
            .unwrap();
        assert_eq!(seen, Step::SETUP.to_vec());
        assert!(setup.steps.iter().all(|r| r.outcome == StepOutcome::Applied));
        assert_eq!(record(&dir).load().unwrap().unwrap().access_key_id, setup.access_key_id);
        assert_eq!(m.secret_store().len(), 3);

        let teardown = m
            .run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap();
        assert!(teardown.steps.iter().all(|r| r.outcome == StepOutcome::Applied));
        assert!(teardown.secret_deletions.iter().all(|d| d.is_ok()));

        let iam = m.identity_provider();
        assert_eq!(iam.user_count(), 0);
        assert_eq!(m.secret_store().len(), 0);
        for op in [
            "create_user",
            "put_user_policy",
            "create_access_key",
            "delete_access_key",
            "delete_user_policy",
            "delete_user",
        ] {
            assert_eq!(iam.calls(op), 1, "{op}");
        }
        assert_eq!(m.secret_store().create_calls(), 3);
    }

    #[test]
    fn test_setup_rerun_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        m.run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        let again = m
            .run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        assert_eq!(again.steps[0].outcome, StepOutcome::AlreadySatisfied);
        assert_eq!(again.steps[2].outcome, StepOutcome::AlreadySatisfied);
        assert_eq!(m.identity_provider().calls("create_access_key"), 1);
        assert_eq!(m.identity_provider().user_count(), 1);
    }

    #[test]
    fn test_teardown_twice_succeeds() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        m.run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        m.run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap();
        let again = m
            .run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap();
        assert!(again
            .steps
            .iter()
            .all(|r| r.outcome == StepOutcome::AlreadySatisfied));
    }

    #[test]
    fn test_setup_abort_reports_reached_state() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        m.identity_provider().fail("list_access_keys", "Throttling");
        let abort = m
            .run_setup(
                &identity(),
                &record(&dir),
                &repo(),
                &SecretNames::default(),
                "us-east-1",
                |_| {},
            )
            .unwrap_err();
        assert_eq!(abort.phase, Phase::Setup);
        assert_eq!(abort.step, Step::EnsureAccessKey);
        assert_eq!(abort.reached, Some(LifecycleState::PolicyAttached));
        assert!(m.secret_store().write_log().is_empty());
    }

    #[test]
    fn test_teardown_continues_past_secret_failures() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        m.run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        m.secret_store().fail_delete("AWS_ACCESS_KEY_ID");
        let report = m
            .run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap();
        assert_eq!(report.steps[0].outcome, StepOutcome::Degraded);
        assert_eq!(m.identity_provider().user_count(), 0);
        assert!(m.secret_store().contains(&repo(), "AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_teardown_abort_keeps_user() {
        let dir = TempDir::new().unwrap();
        let m = manager();
        let names = SecretNames::default();
        m.run_setup(&identity(), &record(&dir), &repo(), &names, "us-east-1", |_| {})
            .unwrap();
        m.identity_provider().fail("delete_user_policy", "ServiceFailure");
        let abort = m
            .run_teardown("gh-ci-test", &record(&dir), &repo(), &names, |_| {})
            .unwrap_err();
        assert_eq!(abort.step, Step::DeleteInlinePolicy);
        assert_eq!(abort.reached, Some(LifecycleState::PolicyAttached));
        assert_eq!(m.identity_provider().calls("delete_user"), 0);
        assert_eq!(m.identity_provider().user_count(), 1);
    }
}
