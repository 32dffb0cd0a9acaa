//! Operation registry.
//!
//! Process-wide table of asynchronous operations. Image secrets live in the
//! metadata of a running operation, so the registry is also where a
//! presented secret is checked.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{DepotError, Result};
use crate::image::image_url;

/// Operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Running,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    /// Numeric status code carried in API documents.
    pub fn code(&self) -> u16 {
        match self {
            Self::Running => 103,
            Self::Success => 200,
            Self::Failure => 400,
            Self::Cancelled => 401,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Background task
    Task,
    /// Waits for websocket connections
    Websocket,
    /// Carries a token; completes when cancelled
    Token,
}

/// Operation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub class: OperationClass,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub status_code: u16,
    pub resources: HashMap<String, Vec<String>>,
    pub metadata: serde_json::Value,
    pub may_cancel: bool,
    pub err: String,
}

impl Operation {
    /// API URL of this operation.
    pub fn url(&self) -> String {
        format!("/{}/operations/{}", crate::API_VERSION, self.id)
    }
}

/// Registry of live operations.
///
/// One mutex guards the whole table; every lookup holds it for the
/// duration of the lookup only.
#[derive(Default)]
pub struct OperationRegistry {
    ops: Mutex<HashMap<Uuid, Operation>>,
    changed: Notify,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new running operation.
    pub fn create(
        &self,
        class: OperationClass,
        resources: HashMap<String, Vec<String>>,
        metadata: serde_json::Value,
    ) -> Operation {
        let now = Utc::now();
        let op = Operation {
            id: Uuid::new_v4(),
            class,
            created_at: now,
            updated_at: now,
            status: OperationStatus::Running,
            status_code: OperationStatus::Running.code(),
            resources,
            metadata,
            may_cancel: class != OperationClass::Task,
            err: String::new(),
        };

        self.ops.lock().insert(op.id, op.clone());
        tracing::debug!(id = %op.id, class = ?class, "Operation created");
        op
    }

    pub fn get(&self, id: &Uuid) -> Result<Operation> {
        self.ops
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| DepotError::NotFound(format!("operation {}", id)))
    }

    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.ops.lock().values().cloned().collect();
        ops.sort_by_key(|op| op.created_at);
        ops
    }

    /// Move a running operation to a final state.
    pub fn finish(&self, id: &Uuid, result: std::result::Result<(), String>) -> Result<()> {
        {
            let mut ops = self.ops.lock();
            let op = ops
                .get_mut(id)
                .ok_or_else(|| DepotError::NotFound(format!("operation {}", id)))?;
            op.status = match &result {
                Ok(()) => OperationStatus::Success,
                Err(_) => OperationStatus::Failure,
            };
            op.status_code = op.status.code();
            op.err = result.err().unwrap_or_default();
            op.updated_at = Utc::now();
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Cancel an operation and drop it from the registry.
    ///
    /// Any secret carried in its metadata stops being honoured.
    pub fn cancel(&self, id: &Uuid) -> Result<Operation> {
        let mut op = {
            let mut ops = self.ops.lock();
            let op = ops
                .get(id)
                .ok_or_else(|| DepotError::NotFound(format!("operation {}", id)))?;
            if !op.may_cancel {
                return Err(DepotError::BadRequest(format!(
                    "operation {} can't be cancelled",
                    id
                )));
            }
            ops.remove(id)
                .ok_or_else(|| DepotError::NotFound(format!("operation {}", id)))?
        };
        op.status = OperationStatus::Cancelled;
        op.status_code = op.status.code();
        op.updated_at = Utc::now();
        self.changed.notify_waiters();
        tracing::debug!(id = %id, "Operation cancelled");
        Ok(op)
    }

    /// Whether a running operation authorises `secret` for `fingerprint`.
    pub fn image_secret_valid(&self, fingerprint: &str, secret: &str) -> bool {
        if secret.is_empty() {
            return false;
        }
        let url = image_url(fingerprint);
        self.ops.lock().values().any(|op| {
            op.status == OperationStatus::Running
                && op
                    .resources
                    .get("images")
                    .is_some_and(|images| images.iter().any(|i| *i == url))
                && op.metadata.get("secret").and_then(|s| s.as_str()) == Some(secret)
        })
    }

    /// Wait until the operation leaves the running state or `timeout`
    /// elapses, then return its current record.
    ///
    /// A cancelled operation is no longer in the table; waiting on it
    /// returns `NotFound`.
    pub async fn wait(&self, id: &Uuid, timeout: Option<Duration>) -> Result<Operation> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let op = self.get(id)?;
            if op.status.is_final() {
                return Ok(op);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.get(id);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_op(registry: &OperationRegistry, fp: &str, secret: &str) -> Operation {
        let mut resources = HashMap::new();
        resources.insert("images".to_string(), vec![image_url(fp)]);
        registry.create(
            OperationClass::Token,
            resources,
            serde_json::json!({ "secret": secret }),
        )
    }

    #[test]
    fn test_create_and_get() {
        let registry = OperationRegistry::new();
        let op = registry.create(OperationClass::Task, HashMap::new(), serde_json::Value::Null);
        assert_eq!(op.status, OperationStatus::Running);
        assert_eq!(op.status_code, 103);
        assert!(!op.may_cancel);
        assert_eq!(registry.get(&op.id).unwrap().id, op.id);
        assert_eq!(op.url(), format!("/1.0/operations/{}", op.id));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_get_unknown() {
        let registry = OperationRegistry::new();
        assert!(matches!(
            registry.get(&Uuid::new_v4()),
            Err(DepotError::NotFound(_))
        ));
    }

    #[test]
    fn test_secret_scoped_to_fingerprint() {
        let registry = OperationRegistry::new();
        let fp_a = "a".repeat(64);
        let fp_b = "b".repeat(64);
        secret_op(&registry, &fp_a, "s3cret");

        assert!(registry.image_secret_valid(&fp_a, "s3cret"));
        assert!(!registry.image_secret_valid(&fp_a, "other"));
        assert!(!registry.image_secret_valid(&fp_b, "s3cret"));
        assert!(!registry.image_secret_valid(&fp_a, ""));
    }

    #[test]
    fn test_secret_revoked_by_cancel() {
        let registry = OperationRegistry::new();
        let fp = "c".repeat(64);
        let op = secret_op(&registry, &fp, "token");

        let cancelled = registry.cancel(&op.id).unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(!registry.image_secret_valid(&fp, "token"));
        assert!(registry.get(&op.id).is_err());
    }

    #[test]
    fn test_secret_requires_running() {
        let registry = OperationRegistry::new();
        let fp = "d".repeat(64);
        let op = secret_op(&registry, &fp, "token");
        registry.finish(&op.id, Ok(())).unwrap();
        assert!(!registry.image_secret_valid(&fp, "token"));
    }

    #[test]
    fn test_task_not_cancellable() {
        let registry = OperationRegistry::new();
        let op = registry.create(OperationClass::Task, HashMap::new(), serde_json::Value::Null);
        assert!(matches!(
            registry.cancel(&op.id),
            Err(DepotError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_returns_on_finish() {
        let registry = OperationRegistry::new();
        let op = registry.create(OperationClass::Task, HashMap::new(), serde_json::Value::Null);

        let waiter = {
            let registry = registry.clone();
            let id = op.id;
            tokio::spawn(async move { registry.wait(&id, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.finish(&op.id, Err("boom".to_string())).unwrap();

        let done = waiter.await.unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Failure);
        assert_eq!(done.err, "boom");
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_running() {
        let registry = OperationRegistry::new();
        let op = registry.create(OperationClass::Token, HashMap::new(), serde_json::Value::Null);
        let current = registry
            .wait(&op.id, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(current.status, OperationStatus::Running);
    }
}
