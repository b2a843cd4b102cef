//! In-memory collaborators for tests.
//!
//! `MemoryIam` mimics the IAM rules the lifecycle depends on: duplicate users
//! are `AlreadyExists`, operations on missing users or policies are
//! `NotFound`, and a user that still owns a policy or key cannot be deleted.

use crate::error::ProviderError;
use crate::models::access_key::AccessKeyPair;
use crate::models::secrets::RepoRef;
use crate::providers::{IdentityProvider, SecretStore};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct FakeUser {
    pub tags: BTreeMap<String, String>,
    pub policies: BTreeMap<String, String>,
    pub keys: Vec<AccessKeyPair>,
}

#[derive(Default)]
pub struct MemoryIam {
    users: RefCell<BTreeMap<String, FakeUser>>,
    calls: RefCell<BTreeMap<&'static str, usize>>,
    failures: RefCell<BTreeMap<&'static str, String>>,
    next_key: Cell<u32>,
}

impl MemoryIam {
    /// Number of times `op` was called, failed calls included.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.borrow().get(op).copied().unwrap_or(0)
    }

    /// Make every later call to `op` fail with a fatal error.
    pub fn fail(&self, op: &'static str, code: &str) {
        self.failures.borrow_mut().insert(op, code.to_string());
    }

    pub fn user(&self, name: &str) -> Option<FakeUser> {
        self.users.borrow().get(name).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.borrow().len()
    }

    /// Attach a key directly, bypassing `create_access_key`.
    pub fn insert_key(&self, user: &str, pair: AccessKeyPair) {
        self.users
            .borrow_mut()
            .entry(user.to_string())
            .or_default()
            .keys
            .push(pair);
    }

    fn enter(&self, op: &'static str) -> Result<(), ProviderError> {
        *self.calls.borrow_mut().entry(op).or_insert(0) += 1;
        match self.failures.borrow().get(op) {
            Some(code) => Err(ProviderError::fatal(op, code)),
            None => Ok(()),
        }
    }

    fn with_user<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FakeUser) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut users = self.users.borrow_mut();
        match users.get_mut(name) {
            Some(user) => f(user),
            None => Err(ProviderError::NotFound {
                resource: format!("IAM user {}", name),
            }),
        }
    }
}

impl IdentityProvider for MemoryIam {
    fn create_user(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.enter("create_user")?;
        let mut users = self.users.borrow_mut();
        if users.contains_key(name) {
            return Err(ProviderError::AlreadyExists {
                resource: format!("IAM user {}", name),
            });
        }
        users.insert(
            name.to_string(),
            FakeUser {
                tags: tags.clone(),
                ..FakeUser::default()
            },
        );
        Ok(())
    }

    fn put_user_policy(
        &self,
        user: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.enter("put_user_policy")?;
        self.with_user(user, |u| {
            u.policies.insert(policy_name.to_string(), document.to_string());
            Ok(())
        })
    }

    fn list_access_keys(&self, user: &str) -> Result<Vec<String>, ProviderError> {
        self.enter("list_access_keys")?;
        self.with_user(user, |u| {
            Ok(u.keys.iter().map(|k| k.access_key_id.clone()).collect())
        })
    }

    fn create_access_key(&self, user: &str) -> Result<AccessKeyPair, ProviderError> {
        self.enter("create_access_key")?;
        let n = self.next_key.get() + 1;
        self.next_key.set(n);
        let pair = AccessKeyPair::new(
            format!("AKIAMEMORY{:010}", n),
            format!("memory-secret-{}", n),
        );
        self.with_user(user, |u| {
            u.keys.push(pair.clone());
            Ok(pair)
        })
    }

    fn delete_access_key(&self, user: &str, access_key_id: &str) -> Result<(), ProviderError> {
        self.enter("delete_access_key")?;
        self.with_user(user, |u| {
            let before = u.keys.len();
            u.keys.retain(|k| k.access_key_id != access_key_id);
            if u.keys.len() == before {
                return Err(ProviderError::NotFound {
                    resource: format!("access key {}", access_key_id),
                });
            }
            Ok(())
        })
    }

    fn delete_user_policy(&self, user: &str, policy_name: &str) -> Result<(), ProviderError> {
        self.enter("delete_user_policy")?;
        self.with_user(user, |u| match u.policies.remove(policy_name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound {
                resource: format!("policy {}", policy_name),
            }),
        })
    }

    fn delete_user(&self, name: &str) -> Result<(), ProviderError> {
        self.enter("delete_user")?;
        let mut users = self.users.borrow_mut();
        let Some(user) = users.get(name) else {
            return Err(ProviderError::NotFound {
                resource: format!("IAM user {}", name),
            });
        };
        if !user.policies.is_empty() || !user.keys.is_empty() {
            return Err(ProviderError::fatal("delete_user", "DeleteConflict"));
        }
        users.remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RefCell<BTreeMap<(String, String), String>>,
    writes: RefCell<Vec<String>>,
    create_calls: Cell<usize>,
    fail_create: RefCell<BTreeSet<String>>,
    fail_delete: RefCell<BTreeSet<String>>,
}

impl MemorySecretStore {
    pub fn fail_create(&self, name: &str) {
        self.fail_create.borrow_mut().insert(name.to_string());
    }

    pub fn fail_delete(&self, name: &str) {
        self.fail_delete.borrow_mut().insert(name.to_string());
    }

    /// Names of successful writes, in order.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.get()
    }

    pub fn contains(&self, repo: &RepoRef, name: &str) -> bool {
        self.secrets.borrow().contains_key(&key(repo, name))
    }

    pub fn value(&self, repo: &RepoRef, name: &str) -> Option<String> {
        self.secrets.borrow().get(&key(repo, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.secrets.borrow().len()
    }
}

fn key(repo: &RepoRef, name: &str) -> (String, String) {
    (repo.to_string(), name.to_string())
}

impl SecretStore for MemorySecretStore {
    fn create_secret(&self, repo: &RepoRef, name: &str, value: &str) -> Result<(), ProviderError> {
        self.create_calls.set(self.create_calls.get() + 1);
        if self.fail_create.borrow().contains(name) {
            return Err(ProviderError::fatal("create_secret", "422 Unprocessable Entity"));
        }
        self.secrets
            .borrow_mut()
            .insert(key(repo, name), value.to_string());
        self.writes.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn delete_secret(&self, repo: &RepoRef, name: &str) -> Result<(), ProviderError> {
        if self.fail_delete.borrow().contains(name) {
            return Err(ProviderError::fatal("delete_secret", "500 Internal Server Error"));
        }
        match self.secrets.borrow_mut().remove(&key(repo, name)) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound {
                resource: format!("secret {}", name),
            }),
        }
    }
}
