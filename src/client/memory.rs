//! In-memory resource client.
//!
//! A thread-safe reference implementation of [`ResourceClient`] for tests
//! and embedded use. It enforces the same contract the engine relies on from
//! a real backend: monotonic resource versions, a stale-token conflict on
//! update, and classified errors throughout. Field-manager ownership
//! tracking is not modeled; apply-type patches upsert the full object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{DeleteOptions, ListOptions, PatchKind, PatchRequest, ResourceClient};
use crate::error::ClientError;
use crate::object::RemoteObject;
use crate::reference::ResourceRef;

fn lock_err(context: &'static str) -> ClientError {
    ClientError::internal(format!("poisoned lock: {context}"))
}

fn object_key(resource: &ResourceRef) -> String {
    scope_key(resource, &resource.name)
}

fn scope_key(resource: &ResourceRef, name: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        resource.group,
        resource.version,
        resource.resource,
        resource.namespace.as_deref().unwrap_or(""),
        name,
    )
}

fn scope_prefix(resource: &ResourceRef) -> String {
    scope_key(resource, "")
}

/// Applies JSON merge-patch semantics: objects recurse, `null` removes the
/// key, anything else replaces.
fn merge_value(target: &mut Value, patch: &Value) {
    let Some(patch_map) = patch.as_object() else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let target_map = target.as_object_mut().expect("just ensured object");

    for (key, patch_entry) in patch_map {
        if patch_entry.is_null() {
            target_map.remove(key);
        } else if patch_entry.is_object() {
            let entry = target_map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            merge_value(entry, patch_entry);
        } else {
            target_map.insert(key.clone(), patch_entry.clone());
        }
    }
}

/// Thread-safe in-memory [`ResourceClient`].
#[derive(Debug, Default)]
pub struct MemoryClient {
    objects: RwLock<HashMap<String, RemoteObject>>,
    next_version: AtomicU64,
    next_uid: AtomicU64,
}

impl MemoryClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, across all scopes.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().expect("memory client lock").len()
    }

    /// Returns true if no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds an object directly, bypassing create semantics. Test helper.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn seed(&self, resource: &ResourceRef, object: RemoteObject) {
        let mut stored = object;
        self.assign_server_fields(&mut stored, true);
        self.objects
            .write()
            .expect("memory client lock")
            .insert(object_key(resource), stored);
    }

    fn assign_server_fields(&self, object: &mut RemoteObject, fresh_uid: bool) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        object.metadata.resource_version = Some(version.to_string());
        if fresh_uid {
            let uid = self.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
            object.metadata.uid = Some(format!("mem-{uid}"));
            object.metadata.generation = Some(1);
        }
    }

    fn bump(&self, object: &mut RemoteObject, spec_changed: bool) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        object.metadata.resource_version = Some(version.to_string());
        if spec_changed {
            object.metadata.generation = Some(object.metadata.generation.unwrap_or(0) + 1);
        }
    }

    fn apply_merge_patch(stored: &mut RemoteObject, body: &Value) -> Result<bool, ClientError> {
        let Some(map) = body.as_object() else {
            return Err(ClientError::invalid("merge patch body must be an object"));
        };

        let mut spec_changed = false;
        for (key, entry) in map {
            match key.as_str() {
                "spec" => {
                    let before = stored.spec.clone();
                    merge_value(&mut stored.spec, entry);
                    spec_changed |= stored.spec != before;
                }
                "metadata" => {
                    let Some(meta) = entry.as_object() else {
                        return Err(ClientError::invalid("metadata patch must be an object"));
                    };
                    for (meta_key, meta_entry) in meta {
                        let target = match meta_key.as_str() {
                            "labels" => &mut stored.metadata.labels,
                            "annotations" => &mut stored.metadata.annotations,
                            other => {
                                return Err(ClientError::invalid(format!(
                                    "metadata.{other} is not patchable"
                                )));
                            }
                        };
                        let Some(entries) = meta_entry.as_object() else {
                            return Err(ClientError::invalid(format!(
                                "metadata.{meta_key} patch must be an object"
                            )));
                        };
                        for (k, v) in entries {
                            match v {
                                Value::Null => {
                                    target.remove(k);
                                }
                                Value::String(s) => {
                                    target.insert(k.clone(), s.clone());
                                }
                                other => {
                                    target.insert(k.clone(), other.to_string());
                                }
                            }
                        }
                    }
                }
                other => {
                    return Err(ClientError::invalid(format!(
                        "{other} is not part of the mutable substructure"
                    )));
                }
            }
        }
        Ok(spec_changed)
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(&self, resource: &ResourceRef) -> Result<RemoteObject, ClientError> {
        let objects = self.objects.read().map_err(|_| lock_err("get"))?;
        objects
            .get(&object_key(resource))
            .cloned()
            .ok_or_else(|| ClientError::not_found(resource.to_string()))
    }

    async fn list(
        &self,
        resource: &ResourceRef,
        opts: &ListOptions,
    ) -> Result<Vec<RemoteObject>, ClientError> {
        let objects = self.objects.read().map_err(|_| lock_err("list"))?;
        let prefix = scope_prefix(resource);
        let mut matches: Vec<RemoteObject> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, obj)| obj)
            .filter(|obj| {
                opts.label_selector
                    .iter()
                    .all(|(k, v)| obj.metadata.labels.get(k) == Some(v))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(matches)
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        object: &RemoteObject,
    ) -> Result<RemoteObject, ClientError> {
        let mut objects = self.objects.write().map_err(|_| lock_err("create"))?;
        let key = object_key(resource);
        if objects.contains_key(&key) {
            return Err(ClientError::conflict(format!(
                "{resource} already exists"
            )));
        }

        let mut stored = object.clone();
        stored.status = Value::Null;
        self.assign_server_fields(&mut stored, true);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        object: &RemoteObject,
    ) -> Result<RemoteObject, ClientError> {
        let mut objects = self.objects.write().map_err(|_| lock_err("update"))?;
        let key = object_key(resource);
        let Some(existing) = objects.get(&key) else {
            return Err(ClientError::not_found(resource.to_string()));
        };

        // Optimistic-concurrency precondition: a stale token is rejected.
        if let Some(token) = &object.metadata.resource_version {
            if existing.metadata.resource_version.as_ref() != Some(token) {
                return Err(ClientError::conflict(format!(
                    "{resource}: stale resource version {token}"
                )));
            }
        }

        let spec_changed = existing.spec != object.spec;
        let mut stored = object.clone();
        // Server-owned fields survive the replace.
        stored.status = existing.status.clone();
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.generation = existing.metadata.generation;
        self.bump(&mut stored, spec_changed);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        resource: &ResourceRef,
        request: &PatchRequest,
    ) -> Result<RemoteObject, ClientError> {
        let mut objects = self.objects.write().map_err(|_| lock_err("patch"))?;
        let key = object_key(resource);

        match &request.kind {
            PatchKind::Merge => {
                let Some(stored) = objects.get_mut(&key) else {
                    return Err(ClientError::not_found(resource.to_string()));
                };
                let spec_changed = Self::apply_merge_patch(stored, &request.body)?;
                let mut updated = stored.clone();
                self.bump(&mut updated, spec_changed);
                objects.insert(key, updated.clone());
                Ok(updated)
            }
            PatchKind::Apply { .. } => {
                let incoming: RemoteObject = serde_json::from_value(request.body.clone())
                    .map_err(|e| ClientError::invalid(format!("apply patch body: {e}")))?;

                match objects.get(&key) {
                    None => {
                        let mut stored = incoming;
                        stored.status = Value::Null;
                        self.assign_server_fields(&mut stored, true);
                        objects.insert(key, stored.clone());
                        Ok(stored)
                    }
                    Some(existing) => {
                        let spec_changed = existing.spec != incoming.spec;
                        let mut stored = incoming;
                        stored.status = existing.status.clone();
                        stored.metadata.uid = existing.metadata.uid.clone();
                        stored.metadata.generation = existing.metadata.generation;
                        self.bump(&mut stored, spec_changed);
                        objects.insert(key, stored.clone());
                        Ok(stored)
                    }
                }
            }
        }
    }

    async fn delete(
        &self,
        resource: &ResourceRef,
        _opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let mut objects = self.objects.write().map_err(|_| lock_err("delete"))?;
        if objects.remove(&object_key(resource)).is_none() {
            return Err(ClientError::not_found(resource.to_string()));
        }
        Ok(())
    }
}
