use crate::routing::{RouteRule, RoutesConfig};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
}

/// Directory record for a user, as stored by the external user service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRecord {
    #[serde(default)]
    pub extension: Option<String>,
    pub status: UserStatus,
}

impl UserRecord {
    /// Extension usable as a routing target, if the user is active and
    /// has a non-empty one.
    pub fn routable_extension(&self) -> Option<&str> {
        if self.status != UserStatus::Active {
            return None;
        }
        self.extension.as_deref().filter(|ext| !ext.is_empty())
    }
}

/// Assignment state of a provisioned phone number.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "assignment_type", rename_all = "snake_case")]
pub enum PhoneNumberAssignment {
    /// Directly assigned to a user; the routing fallback when no rule
    /// produces a decision
    User { user_id: String },
    Unassigned,
}

/// Read-only access to stored routing rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules for the number, ordered ascending by priority.
    async fn list_enabled_rules(&self, phone_number_id: &str) -> Result<Vec<RouteRule>>;
}

/// Read-only access to user and phone-number records.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;
    async fn get_phone_number(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<PhoneNumberAssignment>>;
}

pub struct MemoryRuleStore {
    rules: Mutex<Vec<RouteRule>>,
}

impl MemoryRuleStore {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    pub fn from_config(config: RoutesConfig) -> Self {
        Self::new(config.rules)
    }

    pub async fn add_rule(&self, rule: RouteRule) {
        self.rules.lock().await.push(rule);
    }

    pub async fn replace_rules(&self, rules: Vec<RouteRule>) {
        *self.rules.lock().await = rules;
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_enabled_rules(&self, phone_number_id: &str) -> Result<Vec<RouteRule>> {
        let mut rules: Vec<RouteRule> = self
            .rules
            .lock()
            .await
            .iter()
            .filter(|rule| rule.enabled && rule.phone_number_id == phone_number_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.priority);
        Ok(rules)
    }
}

pub struct MemorySubscriberStore {
    users: Mutex<HashMap<String, UserRecord>>,
    numbers: Mutex<HashMap<String, PhoneNumberAssignment>>,
}

impl MemorySubscriberStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            numbers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert_user(&self, user_id: &str, user: UserRecord) {
        self.users.lock().await.insert(user_id.to_string(), user);
    }

    pub async fn insert_phone_number(
        &self,
        phone_number_id: &str,
        assignment: PhoneNumberAssignment,
    ) {
        self.numbers
            .lock()
            .await
            .insert(phone_number_id.to_string(), assignment);
    }

    pub async fn set_user_status(&self, user_id: &str, status: UserStatus) {
        if let Some(user) = self.users.lock().await.get_mut(user_id) {
            user.status = status;
        }
    }
}

impl Default for MemorySubscriberStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriberStore for MemorySubscriberStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().await.get(user_id).cloned())
    }

    async fn get_phone_number(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<PhoneNumberAssignment>> {
        Ok(self.numbers.lock().await.get(phone_number_id).cloned())
    }
}
