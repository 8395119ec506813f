//! In-memory record catalog.
//!
//! Holds the three managed record types — devices, user-device bindings,
//! proxy rules — in `DashMap` indices keyed by id. Uniqueness constraints
//! (hardware id, subject/device pair, rule name) are enforced here so every
//! handler sees the same semantics.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ── Devices ──────────────────────────────────────────────────────────────

/// A managed device, as reported by its agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Record id.
    pub id: Uuid,
    /// Stable hardware identifier (BIOS UUID, serial number, ...). Unique.
    pub unique_hardware_id: String,
    /// Operating system.
    pub os: String,
    /// Hostname.
    pub hostname: String,
    /// Last time the agent checked in.
    pub last_seen_at: DateTime<Utc>,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a device.
#[derive(Debug, Deserialize)]
pub struct DeviceDraft {
    /// Stable hardware identifier. Required, unique.
    pub unique_hardware_id: String,
    /// Operating system.
    #[serde(default)]
    pub os: String,
    /// Hostname.
    #[serde(default)]
    pub hostname: String,
}

/// Payload for updating a device. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceUpdate {
    /// New operating system value.
    pub os: Option<String>,
    /// New hostname.
    pub hostname: Option<String>,
    /// New check-in timestamp.
    pub last_seen_at: Option<DateTime<Utc>>,
}

// ── Bindings ─────────────────────────────────────────────────────────────

/// A binding between an identity-provider subject and a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// Record id.
    pub id: Uuid,
    /// Identity-provider subject id (the `sub` claim of the bound user).
    pub subject_id: String,
    /// Bound device.
    pub device_id: Uuid,
    /// Binding status (`active` by default).
    pub status: String,
    /// When the binding was created.
    pub bound_at: DateTime<Utc>,
    /// When the binding was released, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unbound_at: Option<DateTime<Utc>>,
}

/// Payload for creating a binding.
#[derive(Debug, Deserialize)]
pub struct BindingDraft {
    /// Identity-provider subject id.
    pub subject_id: String,
    /// Device to bind.
    pub device_id: Uuid,
    /// Initial status. Defaults to `active`.
    #[serde(default = "default_binding_status")]
    pub status: String,
}

fn default_binding_status() -> String {
    "active".to_string()
}

// ── Proxy rules ──────────────────────────────────────────────────────────

/// A proxy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Record id.
    pub id: Uuid,
    /// Rule name. Unique.
    pub name: String,
    /// Rule type (e.g. `http-proxy`, `tcp-proxy`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Match expression (domain, ip:port, ...).
    #[serde(rename = "match")]
    pub matcher: String,
    /// Action to take (`proxy`, `block`, `direct`).
    pub action: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Payload for creating a rule.
#[derive(Debug, Deserialize)]
pub struct RuleDraft {
    /// Rule name. Required, unique.
    pub name: String,
    /// Rule type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Match expression.
    #[serde(rename = "match")]
    pub matcher: String,
    /// Action to take.
    pub action: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Payload for updating a rule. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct RuleUpdate {
    /// New name (still unique).
    pub name: Option<String>,
    /// New rule type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// New match expression.
    #[serde(rename = "match")]
    pub matcher: Option<String>,
    /// New action.
    pub action: Option<String>,
    /// New description.
    pub description: Option<String>,
}

// ── Catalog ──────────────────────────────────────────────────────────────

/// The in-memory catalog of managed records.
pub struct Catalog {
    devices: DashMap<Uuid, Device>,
    bindings: DashMap<Uuid, Binding>,
    rules: DashMap<Uuid, ProxyRule>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            bindings: DashMap::new(),
            rules: DashMap::new(),
        }
    }

    // ── Devices ─────────────────────────────────────────────────────────

    /// All devices, oldest first.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        let mut all: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Register a new device.
    ///
    /// # Errors
    ///
    /// `Validation` if the hardware id is empty; `Conflict` if a device with
    /// the same hardware id already exists.
    pub fn create_device(&self, draft: DeviceDraft) -> Result<Device> {
        if draft.unique_hardware_id.trim().is_empty() {
            return Err(Error::Validation(
                "unique_hardware_id is required".to_string(),
            ));
        }
        if self
            .devices
            .iter()
            .any(|e| e.value().unique_hardware_id == draft.unique_hardware_id)
        {
            return Err(Error::Conflict(format!(
                "device with hardware id '{}' already exists",
                draft.unique_hardware_id
            )));
        }

        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4(),
            unique_hardware_id: draft.unique_hardware_id,
            os: draft.os,
            hostname: draft.hostname,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        };
        self.devices.insert(device.id, device.clone());
        Ok(device)
    }

    /// Apply a partial update to a device.
    ///
    /// # Errors
    ///
    /// `NotFound` if no device has this id.
    pub fn update_device(&self, id: Uuid, update: DeviceUpdate) -> Result<Device> {
        let mut entry = self
            .devices
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("device {id}")))?;

        let device = entry.value_mut();
        if let Some(os) = update.os {
            device.os = os;
        }
        if let Some(hostname) = update.hostname {
            device.hostname = hostname;
        }
        if let Some(seen) = update.last_seen_at {
            device.last_seen_at = seen;
        }
        device.updated_at = Utc::now();
        Ok(device.clone())
    }

    /// Remove a device.
    ///
    /// # Errors
    ///
    /// `NotFound` if no device has this id.
    pub fn delete_device(&self, id: Uuid) -> Result<()> {
        self.devices
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("device {id}")))
    }

    // ── Bindings ────────────────────────────────────────────────────────

    /// All bindings, oldest first.
    #[must_use]
    pub fn bindings(&self) -> Vec<Binding> {
        let mut all: Vec<Binding> = self.bindings.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.bound_at.cmp(&b.bound_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Bind a subject to a device.
    ///
    /// # Errors
    ///
    /// `Validation` if the subject id is empty, `NotFound` if the device
    /// does not exist, `Conflict` if this subject/device pair is already
    /// bound.
    pub fn create_binding(&self, draft: BindingDraft) -> Result<Binding> {
        if draft.subject_id.trim().is_empty() {
            return Err(Error::Validation("subject_id is required".to_string()));
        }
        if !self.devices.contains_key(&draft.device_id) {
            return Err(Error::NotFound(format!("device {}", draft.device_id)));
        }
        if self.bindings.iter().any(|e| {
            e.value().subject_id == draft.subject_id && e.value().device_id == draft.device_id
        }) {
            return Err(Error::Conflict(format!(
                "subject '{}' is already bound to device {}",
                draft.subject_id, draft.device_id
            )));
        }

        let binding = Binding {
            id: Uuid::new_v4(),
            subject_id: draft.subject_id,
            device_id: draft.device_id,
            status: draft.status,
            bound_at: Utc::now(),
            unbound_at: None,
        };
        self.bindings.insert(binding.id, binding.clone());
        Ok(binding)
    }

    /// Remove a binding.
    ///
    /// # Errors
    ///
    /// `NotFound` if no binding has this id.
    pub fn delete_binding(&self, id: Uuid) -> Result<()> {
        self.bindings
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("binding {id}")))
    }

    // ── Rules ───────────────────────────────────────────────────────────

    /// All proxy rules, sorted by name.
    #[must_use]
    pub fn rules(&self) -> Vec<ProxyRule> {
        let mut all: Vec<ProxyRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Create a proxy rule.
    ///
    /// # Errors
    ///
    /// `Validation` if the name is empty; `Conflict` if the name is taken.
    pub fn create_rule(&self, draft: RuleDraft) -> Result<ProxyRule> {
        if draft.name.trim().is_empty() {
            return Err(Error::Validation("rule name is required".to_string()));
        }
        if self.rule_name_taken(&draft.name, None) {
            return Err(Error::Conflict(format!(
                "rule '{}' already exists",
                draft.name
            )));
        }

        let rule = ProxyRule {
            id: Uuid::new_v4(),
            name: draft.name,
            kind: draft.kind,
            matcher: draft.matcher,
            action: draft.action,
            description: draft.description,
        };
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Apply a partial update to a rule.
    ///
    /// # Errors
    ///
    /// `NotFound` if no rule has this id; `Conflict` if a rename collides
    /// with an existing rule name.
    pub fn update_rule(&self, id: Uuid, update: RuleUpdate) -> Result<ProxyRule> {
        // Check the rename target before taking a mutable entry: scanning
        // while holding one deadlocks on the same shard.
        if let Some(ref name) = update.name {
            if self.rule_name_taken(name, Some(id)) {
                return Err(Error::Conflict(format!("rule '{name}' already exists")));
            }
        }

        let mut entry = self
            .rules
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;

        let rule = entry.value_mut();
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(kind) = update.kind {
            rule.kind = kind;
        }
        if let Some(matcher) = update.matcher {
            rule.matcher = matcher;
        }
        if let Some(action) = update.action {
            rule.action = action;
        }
        if let Some(description) = update.description {
            rule.description = description;
        }
        Ok(rule.clone())
    }

    /// Remove a rule.
    ///
    /// # Errors
    ///
    /// `NotFound` if no rule has this id.
    pub fn delete_rule(&self, id: Uuid) -> Result<()> {
        self.rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))
    }

    fn rule_name_taken(&self, name: &str, excluding: Option<Uuid>) -> bool {
        self.rules
            .iter()
            .any(|e| e.value().name == name && Some(*e.key()) != excluding)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
